//! Typed metadata predicates.
//!
//! Filters are plain data; each store translates them into its own native
//! syntax and rejects fields it has never seen.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static FIELD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,127}$").expect("field name pattern is valid")
});

/// Scalar operand of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl FilterValue {
    /// Parse a command-line literal: booleans, integers and floats are typed,
    /// everything else is a string.
    pub fn parse_literal(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(b) = raw.parse::<bool>() {
            return FilterValue::Bool(b);
        }
        if let Ok(i) = raw.parse::<i64>() {
            return FilterValue::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>()
            && f.is_finite()
        {
            return FilterValue::Float(f);
        }
        FilterValue::String(raw.trim_matches('"').to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

/// Inclusive/exclusive bounds of a range predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<FilterValue>,
}

impl RangeBounds {
    pub fn is_empty(&self) -> bool {
        self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
    }

    /// Bounds paired with their SQL comparison operator.
    pub fn comparisons(&self) -> impl Iterator<Item = (&'static str, &FilterValue)> {
        [
            (">", self.gt.as_ref()),
            (">=", self.gte.as_ref()),
            ("<", self.lt.as_ref()),
            ("<=", self.lte.as_ref()),
        ]
        .into_iter()
        .filter_map(|(op, bound)| bound.map(|b| (op, b)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOp {
    Eq { value: FilterValue },
    In { values: Vec<FilterValue> },
    Range(RangeBounds),
    /// Field is present, not null and not an empty list.
    Exists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

/// Structured filter over chunk metadata (or corpus columns for hybrid queries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFilter {
    Field(FieldPredicate),
    All(Vec<MetadataFilter>),
    Any(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::field(field, FilterOp::Eq {
            value: value.into(),
        })
    }

    pub fn one_of<V: Into<FilterValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::field(field, FilterOp::In {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        Self::field(field, FilterOp::Range(bounds))
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::field(field, FilterOp::Exists)
    }

    fn field(field: impl Into<String>, op: FilterOp) -> Self {
        MetadataFilter::Field(FieldPredicate {
            field: field.into(),
            op,
        })
    }

    /// Conjunction of `filters`; a single filter is returned unwrapped.
    pub fn all(mut filters: Vec<MetadataFilter>) -> Option<Self> {
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(MetadataFilter::All(filters)),
        }
    }

    /// Every field name referenced by this filter.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            MetadataFilter::Field(p) => out.push(p.field.as_str()),
            MetadataFilter::All(children) | MetadataFilter::Any(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
        }
    }

    /// Structural validation shared by every backend.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataFilter::Field(p) => {
                if !FIELD_NAME.is_match(&p.field) {
                    return Err(format!("invalid field name: {:?}", p.field));
                }
                match &p.op {
                    FilterOp::In { values } if values.is_empty() => {
                        Err(format!("'in' on {} needs at least one value", p.field))
                    }
                    FilterOp::Range(bounds) if bounds.is_empty() => {
                        Err(format!("range on {} needs at least one bound", p.field))
                    }
                    _ => Ok(()),
                }
            }
            MetadataFilter::All(children) | MetadataFilter::Any(children) => {
                if children.is_empty() {
                    return Err("empty filter group".to_string());
                }
                children.iter().try_for_each(MetadataFilter::validate)
            }
        }
    }
}

impl std::str::FromStr for MetadataFilter {
    type Err = String;

    /// Parses `field=value`, `field=a|b`, `field>=n`, `field>n`, `field<=n`,
    /// `field<n` and `field?`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(field) = s.strip_suffix('?') {
            return Ok(MetadataFilter::exists(field.trim()));
        }

        let comparisons: [(&str, fn(FilterValue) -> RangeBounds); 4] = [
            (">=", range_gte),
            ("<=", range_lte),
            (">", range_gt),
            ("<", range_lt),
        ];
        for (token, build) in comparisons {
            if let Some((field, value)) = s.split_once(token) {
                return Ok(MetadataFilter::range(
                    field.trim(),
                    build(FilterValue::parse_literal(value)),
                ));
            }
        }

        let (field, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected field=value, got {s:?}"))?;
        if value.contains('|') {
            return Ok(MetadataFilter::one_of(
                field.trim(),
                value.split('|').map(FilterValue::parse_literal),
            ));
        }
        Ok(MetadataFilter::eq(field.trim(), FilterValue::parse_literal(value)))
    }
}

fn range_gte(v: FilterValue) -> RangeBounds {
    RangeBounds {
        gte: Some(v),
        ..Default::default()
    }
}

fn range_lte(v: FilterValue) -> RangeBounds {
    RangeBounds {
        lte: Some(v),
        ..Default::default()
    }
}

fn range_gt(v: FilterValue) -> RangeBounds {
    RangeBounds {
        gt: Some(v),
        ..Default::default()
    }
}

fn range_lt(v: FilterValue) -> RangeBounds {
    RangeBounds {
        lt: Some(v),
        ..Default::default()
    }
}
