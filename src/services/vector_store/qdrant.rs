//! Qdrant vector store backend implementation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, GetPointsBuilder, ListValue,
    PayloadIncludeSelector, PointId, PointStruct, PointsIdsList, Range, ScrollPointsBuilder,
    SearchPointsBuilder, Struct, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
    vectors_config,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::Value as JsonValue;

use super::{
    BUILTIN_FIELDS, CollectionInfo, VectorQuery, VectorStore, check_filter, finalize_hits,
    validate_collection_name,
};
use crate::error::VectorStoreError;
use crate::models::{
    DistanceMetric, FilterOp, FilterValue, IndexEntry, Metadata, MetadataFilter, ScoredChunk,
    VectorStoreConfig,
};

const METADATA_KEY: &str = "metadata";
const SCROLL_BATCH: u32 = 256;

/// Qdrant vector store backend.
pub struct QdrantBackend {
    client: Qdrant,
    metric: DistanceMetric,
}

impl QdrantBackend {
    /// Create a new Qdrant backend from configuration.
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            metric: config.metric,
        })
    }

    async fn count(&self, name: &str, filter: Option<Filter>) -> Result<u64, VectorStoreError> {
        let mut builder = CountPointsBuilder::new(name).exact(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let response = self
            .client
            .count(builder)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;
        Ok(response.result.map_or(0, |r| r.count))
    }

    /// Registered metadata fields: every payload index under `metadata.`.
    async fn registered_fields(&self, name: &str) -> Result<HashSet<String>, VectorStoreError> {
        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        let prefix = format!("{METADATA_KEY}.");
        Ok(info
            .result
            .map(|r| {
                r.payload_schema
                    .into_keys()
                    .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_index(
        &self,
        name: &str,
        field: &str,
        field_type: FieldType,
    ) -> Result<(), VectorStoreError> {
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(name, field, field_type).wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        Ok(())
    }

    /// Stored checksums for the given point ids.
    async fn stored_checksums(
        &self,
        name: &str,
        ids: Vec<PointId>,
    ) -> Result<HashMap<String, String>, VectorStoreError> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(name, ids)
                    .with_payload(PayloadIncludeSelector {
                        fields: vec!["chunk_id".to_string(), "checksum".to_string()],
                    })
                    .with_vectors(false),
            )
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = payload_string(&point.payload, "chunk_id")?;
                let checksum = payload_string(&point.payload, "checksum")?;
                Some((id, checksum))
            })
            .collect())
    }

    /// Page through every point matching `filter`, returning the requested payload fields.
    async fn scroll_all(
        &self,
        name: &str,
        filter: Option<Filter>,
        fields: &[&str],
    ) -> Result<Vec<HashMap<String, QdrantValue>>, VectorStoreError> {
        let mut payloads = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut scroll_builder = ScrollPointsBuilder::new(name)
                .limit(SCROLL_BATCH)
                .with_payload(PayloadIncludeSelector {
                    fields: fields.iter().map(|f| f.to_string()).collect(),
                })
                .with_vectors(false);

            if let Some(f) = filter.clone() {
                scroll_builder = scroll_builder.filter(f);
            }
            if let Some(off) = offset {
                scroll_builder = scroll_builder.offset(off);
            }

            let response = self
                .client
                .scroll(scroll_builder)
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

            if response.result.is_empty() {
                break;
            }
            payloads.extend(response.result.into_iter().map(|p| p.payload));

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(payloads)
    }
}

fn to_distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Euclidean => Distance::Euclid,
        DistanceMetric::Dot => Distance::Dot,
    }
}

fn from_distance(distance: i32) -> DistanceMetric {
    match Distance::try_from(distance) {
        Ok(Distance::Euclid) => DistanceMetric::Euclidean,
        Ok(Distance::Dot) => DistanceMetric::Dot,
        _ => DistanceMetric::Cosine,
    }
}

fn field_type_for(value: &JsonValue) -> Option<FieldType> {
    match value {
        JsonValue::String(_) => Some(FieldType::Keyword),
        JsonValue::Bool(_) => Some(FieldType::Bool),
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
        JsonValue::Number(_) => Some(FieldType::Float),
        JsonValue::Array(items) => items.first().and_then(field_type_for),
        JsonValue::Null | JsonValue::Object(_) => None,
    }
}

fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn to_json(value: QdrantValue) -> JsonValue {
    match value.kind {
        None | Some(Kind::NullValue(_)) => JsonValue::Null,
        Some(Kind::BoolValue(b)) => JsonValue::Bool(b),
        Some(Kind::IntegerValue(i)) => JsonValue::from(i),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(Kind::StringValue(s)) => JsonValue::String(s),
        Some(Kind::ListValue(ListValue { values })) => {
            JsonValue::Array(values.into_iter().map(to_json).collect())
        }
        Some(Kind::StructValue(Struct { fields })) => JsonValue::Object(
            fields.into_iter().map(|(k, v)| (k, to_json(v))).collect(),
        ),
    }
}

fn entry_payload(entry: IndexEntry) -> Result<Payload, VectorStoreError> {
    let payload = serde_json::json!({
        "chunk_id": entry.chunk_id,
        "document_id": entry.document_id,
        "chunk_index": entry.chunk_index,
        "text": entry.text,
        "checksum": entry.checksum,
        "metadata": JsonValue::Object(entry.metadata),
    });
    Payload::try_from(payload).map_err(|e| VectorStoreError::UpsertError(e.to_string()))
}

fn field_key(field: &str) -> String {
    if BUILTIN_FIELDS.contains(&field) {
        field.to_string()
    } else {
        format!("{METADATA_KEY}.{field}")
    }
}

fn match_condition(key: &str, value: &FilterValue) -> Condition {
    match value {
        FilterValue::String(s) => Condition::matches(key, s.clone()),
        FilterValue::Integer(i) => Condition::matches(key, *i),
        FilterValue::Bool(b) => Condition::matches(key, *b),
        FilterValue::Float(f) => Condition::range(key, Range {
            gte: Some(*f),
            lte: Some(*f),
            ..Default::default()
        }),
    }
}

fn numeric_bound(field: &str, value: Option<&FilterValue>) -> Result<Option<f64>, VectorStoreError> {
    match value {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            VectorStoreError::InvalidFilter(format!("range bounds on {field} must be numeric"))
        }),
    }
}

fn translate_filter(filter: &MetadataFilter) -> Result<Filter, VectorStoreError> {
    Ok(match filter {
        MetadataFilter::Field(predicate) => {
            let key = field_key(&predicate.field);
            match &predicate.op {
                FilterOp::Eq { value } => Filter::must([match_condition(&key, value)]),
                FilterOp::In { values } => {
                    Filter::should(values.iter().map(|v| match_condition(&key, v)))
                }
                FilterOp::Range(bounds) => Filter::must([Condition::range(key, Range {
                    gt: numeric_bound(&predicate.field, bounds.gt.as_ref())?,
                    gte: numeric_bound(&predicate.field, bounds.gte.as_ref())?,
                    lt: numeric_bound(&predicate.field, bounds.lt.as_ref())?,
                    lte: numeric_bound(&predicate.field, bounds.lte.as_ref())?,
                })]),
                FilterOp::Exists => Filter::must_not([Condition::is_empty(key)]),
            }
        }
        MetadataFilter::All(children) => Filter::must(
            children
                .iter()
                .map(|c| translate_filter(c).map(Condition::from))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        MetadataFilter::Any(children) => Filter::should(
            children
                .iter()
                .map(|c| translate_filter(c).map(Condition::from))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}

fn document_filter(document_id: &str) -> Filter {
    Filter::must([Condition::matches("document_id", document_id.to_string())])
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn create_collection(
        &self,
        name: &str,
        dimension: usize,
    ) -> Result<(), VectorStoreError> {
        validate_collection_name(name)?;
        if let Some(info) = self.collection_info(name).await? {
            if info.dimension != dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: info.dimension,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        let create_collection = CreateCollectionBuilder::new(name).vectors_config(
            VectorParamsBuilder::new(dimension as u64, to_distance(self.metric)),
        );

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        self.create_index(name, "document_id", FieldType::Keyword)
            .await?;
        tracing::debug!(collection = name, dimension, "created qdrant collection");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, VectorStoreError> {
        validate_collection_name(name)?;
        if self.collection_info(name).await?.is_none() {
            return Ok(false);
        }

        self.client
            .delete_collection(name)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;
        Ok(true)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, VectorStoreError> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        let mut names: Vec<String> = response.collections.into_iter().map(|c| c.name).collect();
        names.sort();

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.collection_info(&name).await? {
                collections.push(info);
            }
        }
        Ok(collections)
    }

    async fn collection_info(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, VectorStoreError> {
        validate_collection_name(name)?;
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        if !exists {
            return Ok(None);
        }

        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        let Some(result) = info.result else {
            return Ok(None);
        };

        let params = result
            .config
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);
        let (dimension, metric) = match params {
            Some(vectors_config::Config::Params(p)) => (p.size as usize, from_distance(p.distance)),
            _ => {
                return Err(VectorStoreError::CollectionError(format!(
                    "collection {name} has no single unnamed vector"
                )));
            }
        };

        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension,
            metric,
            points_count: result.points_count.unwrap_or(0),
        }))
    }

    async fn upsert(&self, name: &str, entries: Vec<IndexEntry>) -> Result<u64, VectorStoreError> {
        validate_collection_name(name)?;
        if entries.is_empty() {
            return Ok(0);
        }

        let info = self
            .collection_info(name)
            .await?
            .ok_or_else(|| VectorStoreError::CollectionNotFound(name.to_string()))?;
        for entry in &entries {
            if entry.vector.len() != info.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: info.dimension,
                    actual: entry.vector.len(),
                });
            }
            if entry.vector.iter().any(|v| !v.is_finite()) {
                return Err(VectorStoreError::InvalidVector(format!(
                    "non-finite component in chunk {}",
                    entry.chunk_id
                )));
            }
        }

        let ids: Vec<PointId> = entries.iter().map(|e| e.chunk_id.clone().into()).collect();
        let stored = self.stored_checksums(name, ids).await?;
        let changed: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|e| stored.get(&e.chunk_id) != Some(&e.checksum))
            .collect();
        if changed.is_empty() {
            return Ok(0);
        }

        let registered = self.registered_fields(name).await?;
        let mut new_fields: HashMap<String, FieldType> = HashMap::new();
        for entry in &changed {
            for (key, value) in &entry.metadata {
                if registered.contains(key) || new_fields.contains_key(key) {
                    continue;
                }
                if let Some(field_type) = field_type_for(value) {
                    new_fields.insert(key.clone(), field_type);
                }
            }
        }

        let written = changed.len() as u64;
        let points = changed
            .into_iter()
            .map(|entry| {
                let id = entry.chunk_id.clone();
                let vector = entry.vector.clone();
                Ok(PointStruct::new(id, vector, entry_payload(entry)?))
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        for (field, field_type) in new_fields {
            self.create_index(name, &field_key(&field), field_type)
                .await?;
        }

        Ok(written)
    }

    async fn query(
        &self,
        name: &str,
        query: &VectorQuery,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        validate_collection_name(name)?;
        if query.top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(info) = self.collection_info(name).await? else {
            return Ok(Vec::new());
        };
        if info.points_count == 0 && self.count(name, None).await? == 0 {
            return Ok(Vec::new());
        }
        if query.vector.len() != info.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: info.dimension,
                actual: query.vector.len(),
            });
        }

        let mut search_builder =
            SearchPointsBuilder::new(name, query.vector.clone(), query.top_k as u64)
                .with_payload(true);

        if let Some(filter) = &query.filter {
            let fields = self.registered_fields(name).await?;
            check_filter(Some(filter), |f| fields.contains(f))?;
            search_builder = search_builder.filter(translate_filter(filter)?);
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        let hits: Vec<(f32, ScoredChunk)> = results
            .result
            .into_iter()
            .map(|point| {
                let mut payload = point.payload;
                let chunk_id = payload_string(&payload, "chunk_id")
                    .or_else(|| match point.id.and_then(|id| id.point_id_options) {
                        Some(PointIdOptions::Uuid(uuid)) => Some(uuid),
                        Some(PointIdOptions::Num(num)) => Some(num.to_string()),
                        None => None,
                    })
                    .unwrap_or_default();
                let document_id = payload_string(&payload, "document_id").unwrap_or_default();
                let text = payload_string(&payload, "text").unwrap_or_default();
                let metadata = match payload.remove(METADATA_KEY).map(to_json) {
                    Some(JsonValue::Object(map)) => map,
                    _ => Metadata::new(),
                };

                let hit = ScoredChunk {
                    chunk_id,
                    document_id,
                    text,
                    metadata,
                    score: info.metric.similarity(point.score),
                };
                (point.score, hit)
            })
            .collect();

        Ok(finalize_hits(info.metric, hits, query.top_k, query.min_similarity))
    }

    async fn delete_by_document(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<u64, VectorStoreError> {
        validate_collection_name(name)?;
        if self.collection_info(name).await?.is_none() {
            return Ok(0);
        }

        let filter = document_filter(document_id);
        let removed = self.count(name, Some(filter.clone())).await?;
        if removed == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(DeletePointsBuilder::new(name).points(filter).wait(true))
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(removed)
    }

    async fn delete_chunks(
        &self,
        name: &str,
        chunk_ids: &[String],
    ) -> Result<u64, VectorStoreError> {
        validate_collection_name(name)?;
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<PointId> = chunk_ids.iter().map(|id| id.clone().into()).collect();
        let existing = self.stored_checksums(name, ids.clone()).await?.len() as u64;

        self.client
            .delete_points(
                DeletePointsBuilder::new(name)
                    .points(PointsIdsList { ids })
                    .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(existing)
    }

    async fn chunk_fingerprints(
        &self,
        name: &str,
        document_id: &str,
    ) -> Result<HashMap<String, String>, VectorStoreError> {
        validate_collection_name(name)?;
        if self.collection_info(name).await?.is_none() {
            return Ok(HashMap::new());
        }

        let payloads = self
            .scroll_all(name, Some(document_filter(document_id)), &[
                "chunk_id", "checksum",
            ])
            .await?;
        Ok(payloads
            .iter()
            .filter_map(|p| Some((payload_string(p, "chunk_id")?, payload_string(p, "checksum")?)))
            .collect())
    }

    async fn list_documents(&self, name: &str) -> Result<Vec<(String, u64)>, VectorStoreError> {
        validate_collection_name(name)?;
        if self.collection_info(name).await?.is_none() {
            return Ok(Vec::new());
        }

        let mut counts: HashMap<String, u64> = HashMap::new();
        for payload in self.scroll_all(name, None, &["document_id"]).await? {
            if let Some(id) = payload_string(&payload, "document_id") {
                *counts.entry(id).or_insert(0) += 1;
            }
        }

        let mut documents: Vec<(String, u64)> = counts.into_iter().collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RangeBounds;

    #[test]
    fn test_distance_mapping() {
        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::Euclidean,
            DistanceMetric::Dot,
        ] {
            assert_eq!(from_distance(to_distance(metric) as i32), metric);
        }
    }

    #[test]
    fn test_field_keys() {
        assert_eq!(field_key("document_id"), "document_id");
        assert_eq!(field_key("lang"), "metadata.lang");
    }

    #[test]
    fn test_field_type_inference() {
        assert_eq!(field_type_for(&serde_json::json!("x")), Some(FieldType::Keyword));
        assert_eq!(field_type_for(&serde_json::json!(3)), Some(FieldType::Integer));
        assert_eq!(field_type_for(&serde_json::json!(0.5)), Some(FieldType::Float));
        assert_eq!(field_type_for(&serde_json::json!([true])), Some(FieldType::Bool));
        assert_eq!(field_type_for(&serde_json::json!({"a": 1})), None);
    }

    #[test]
    fn test_payload_values_convert_to_json() {
        let list: QdrantValue = vec![QdrantValue::from("a"), QdrantValue::from(1i64)].into();
        let mut fields = HashMap::new();
        fields.insert("k".to_string(), QdrantValue { kind: None });
        fields.insert("f".to_string(), QdrantValue::from(0.25f64));
        let nested = QdrantValue {
            kind: Some(Kind::StructValue(Struct { fields })),
        };

        assert_eq!(to_json(QdrantValue::from(false)), serde_json::json!(false));
        assert_eq!(to_json(list), serde_json::json!(["a", 1]));
        assert_eq!(to_json(nested), serde_json::json!({"k": null, "f": 0.25}));
    }

    #[test]
    fn test_range_needs_numeric_bounds() {
        let numeric = MetadataFilter::range("year", RangeBounds {
            gte: Some(FilterValue::Integer(2020)),
            ..Default::default()
        });
        assert!(translate_filter(&numeric).is_ok());

        let textual = MetadataFilter::range("name", RangeBounds {
            lt: Some(FilterValue::String("m".into())),
            ..Default::default()
        });
        assert!(matches!(
            translate_filter(&textual),
            Err(VectorStoreError::InvalidFilter(_))
        ));
    }
}
