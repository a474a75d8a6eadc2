use async_trait::async_trait;
use log::info;
use qdrant_client::qdrant::{
    value::Kind,
    vectors_config::Config as VectorsConfig,
    Condition,
    CreateCollectionBuilder,
    DeletePointsBuilder,
    Distance,
    Filter,
    PointStruct,
    SearchPointsBuilder,
    UpsertPointsBuilder,
    Value as QdrantValue,
    VectorParams,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{ ScoredPoint, VectorIndex };
use crate::error::{ ConfigurationError, RetrievalError };

/// Qdrant collection keyed by UUIDv5 of the chunk id. The chunk id and its
/// metadata (as a JSON string) travel in the payload.
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection_name: String,
    dimension: u64,
    ready: OnceCell<()>,
}

fn index_error(e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Index(e.to_string())
}

pub(crate) fn point_uuid(id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string()
}

fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Chunk id, serialized metadata and the owning document id (kept top-level so deletes can filter on it).
fn point_payload(id: &str, metadata: &Value) -> HashMap<String, QdrantValue> {
    let mut payload: HashMap<String, QdrantValue> = HashMap::new();
    payload.insert("doc_id".to_string(), id.to_string().into());
    payload.insert("metadata".to_string(), metadata.to_string().into());
    if let Some(document_id) = metadata.get("document_id").and_then(Value::as_str) {
        payload.insert("document_id".to_string(), document_id.to_string().into());
    }
    payload
}

impl QdrantVectorIndex {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection_name: &str,
        dimension: usize
    ) -> Result<Self, ConfigurationError> {
        if dimension == 0 {
            return Err(ConfigurationError::invalid("VECTOR_DIMENSION", "must be greater than zero"));
        }
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(|e| ConfigurationError::invalid("VECTOR_HOST", e))?;
        Ok(Self {
            client,
            collection_name: collection_name.to_string(),
            dimension: dimension as u64,
            ready: OnceCell::new(),
        })
    }

    async fn ensure_collection_exists(&self) -> Result<(), RetrievalError> {
        self.ready
            .get_or_try_init(|| async {
                let exists = self.client.collection_exists(&self.collection_name).await.map_err(index_error)?;
                if !exists {
                    let cfg = CreateCollectionBuilder::new(self.collection_name.clone())
                        .vectors_config(
                            VectorsConfig::Params(VectorParams {
                                size: self.dimension,
                                distance: Distance::Cosine.into(),
                                ..Default::default()
                            })
                        )
                        .build();
                    self.client.create_collection(cfg).await.map_err(index_error)?;
                    info!("Created Qdrant collection: {}", self.collection_name);
                }
                Ok(())
            }).await
            .map(|_| ())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), RetrievalError> {
        if (vector.len() as u64) != self.dimension {
            return Err(
                RetrievalError::Index(
                    format!("Embedding dimension mismatch: expected {}, got {}", self.dimension, vector.len())
                )
            );
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<(), RetrievalError> {
        self.check_dimension(&vector)?;
        self.ensure_collection_exists().await?;

        let point = PointStruct::new(point_uuid(id), vector, point_payload(id, &metadata));
        let op = UpsertPointsBuilder::new(self.collection_name.clone(), vec![point]).wait(true).build();
        self.client.upsert_points(op).await.map_err(index_error)?;
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredPoint>, RetrievalError> {
        self.check_dimension(&vector)?;
        self.ensure_collection_exists().await?;

        let resp = self.client
            .search_points(
                SearchPointsBuilder::new(self.collection_name.clone(), vector, k as u64)
                    .with_payload(true)
                    .build()
            ).await
            .map_err(index_error)?;

        Ok(
            resp.result
                .into_iter()
                .map(|pt| {
                    let id = payload_string(&pt.payload, "doc_id").unwrap_or_default();
                    let metadata = payload_string(&pt.payload, "metadata")
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or(Value::Null);
                    ScoredPoint { id, score: pt.score, metadata }
                })
                .collect()
        )
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        self.ensure_collection_exists().await?;
        let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);
        self.client
            .delete_points(DeletePointsBuilder::new(self.collection_name.clone()).points(filter).wait(true)).await
            .map_err(index_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_uuids() {
        let a = point_uuid("doc-1#0");
        assert_eq!(a, point_uuid("doc-1#0"));
        assert_ne!(a, point_uuid("doc-1#1"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(QdrantVectorIndex::new("http://localhost:6334", None, "docs", 0).is_err());
    }

    #[test]
    fn payload_carries_document_id_for_deletes() {
        let payload = point_payload("d#2", &serde_json::json!({"document_id": "d", "text": "x"}));
        assert_eq!(payload_string(&payload, "doc_id").as_deref(), Some("d#2"));
        assert_eq!(payload_string(&payload, "document_id").as_deref(), Some("d"));

        let bare = point_payload("x", &serde_json::json!({}));
        assert_eq!(payload_string(&bare, "document_id"), None);
    }

    #[test]
    fn payload_strings_are_read_back() {
        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("doc_id".into(), "d#0".to_string().into());
        payload.insert("n".into(), (3_i64).into());
        assert_eq!(payload_string(&payload, "doc_id").as_deref(), Some("d#0"));
        assert_eq!(payload_string(&payload, "n"), None);
    }
}
