//! Rendering of [`MetadataFilter`] as parameterized SQLite expressions.
//!
//! Field names never reach the SQL text except for known columns; JSON paths
//! and values are always bound as parameters.

use rusqlite::types::Value as SqlValue;

use crate::models::{FilterOp, FilterValue, MetadataFilter};

/// How filter fields map onto a table: plain columns, or keys of a JSON column.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SqlFields<'a> {
    pub columns: &'a [&'a str],
    pub json_column: &'a str,
}

impl SqlFields<'_> {
    fn is_column(&self, field: &str) -> bool {
        self.columns.contains(&field)
    }

    fn expr(&self, field: &str, params: &mut Vec<SqlValue>) -> String {
        if self.is_column(field) {
            return field.to_string();
        }
        params.push(SqlValue::Text(json_path(field)));
        format!("json_extract({}, ?)", self.json_column)
    }
}

pub(crate) fn json_path(field: &str) -> String {
    format!("$.\"{field}\"")
}

pub(crate) fn sql_value(value: &FilterValue) -> SqlValue {
    match value {
        FilterValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        FilterValue::Integer(i) => SqlValue::Integer(*i),
        FilterValue::Float(f) => SqlValue::Real(*f),
        FilterValue::String(s) => SqlValue::Text(s.clone()),
    }
}

/// Render `filter` as a boolean expression, appending its bound parameters to
/// `params` in placeholder order.
pub(crate) fn translate(
    filter: &MetadataFilter,
    fields: &SqlFields<'_>,
    params: &mut Vec<SqlValue>,
) -> String {
    match filter {
        MetadataFilter::Field(predicate) => {
            let field = predicate.field.as_str();
            match &predicate.op {
                FilterOp::Eq { value } => {
                    let expr = fields.expr(field, params);
                    params.push(sql_value(value));
                    format!("{expr} = ?")
                }
                FilterOp::In { values } => {
                    let expr = fields.expr(field, params);
                    params.extend(values.iter().map(sql_value));
                    format!("{expr} IN ({})", vec!["?"; values.len()].join(", "))
                }
                FilterOp::Range(bounds) => {
                    let parts: Vec<String> = bounds
                        .comparisons()
                        .map(|(op, bound)| {
                            let expr = fields.expr(field, params);
                            params.push(sql_value(bound));
                            format!("{expr} {op} ?")
                        })
                        .collect();
                    format!("({})", parts.join(" AND "))
                }
                FilterOp::Exists => {
                    if fields.is_column(field) {
                        format!("{field} IS NOT NULL")
                    } else {
                        params.push(SqlValue::Text(json_path(field)));
                        params.push(SqlValue::Text(json_path(field)));
                        format!(
                            "(json_type({col}, ?) != 'null' AND json_extract({col}, ?) IS NOT '[]')",
                            col = fields.json_column
                        )
                    }
                }
            }
        }
        MetadataFilter::All(children) => join(children, " AND ", fields, params),
        MetadataFilter::Any(children) => join(children, " OR ", fields, params),
    }
}

fn join(
    children: &[MetadataFilter],
    sep: &str,
    fields: &SqlFields<'_>,
    params: &mut Vec<SqlValue>,
) -> String {
    let parts: Vec<String> = children
        .iter()
        .map(|child| translate(child, fields, params))
        .collect();
    format!("({})", parts.join(sep))
}
