pub mod memory;
pub mod qdrant;
pub mod retriever;

use async_trait::async_trait;
use log::info;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cli::Args;
use crate::error::{ ConfigurationError, RetrievalError };

pub use self::retriever::{ format_passages, Document, IngestOutcome, Passage, Retriever };

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

/// Similarity index over embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<(), RetrievalError>;

    /// Up to `k` points, best match first.
    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredPoint>, RetrievalError>;

    /// Drops every point whose metadata `document_id` equals `document_id`.
    async fn delete_document(&self, document_id: &str) -> Result<(), RetrievalError>;
}

pub fn create_vector_index(args: &Args) -> Result<Arc<dyn VectorIndex>, ConfigurationError> {
    match args.vector_type.to_lowercase().as_str() {
        "memory" => {
            info!("Vector index: in-memory ({} dims)", args.dimension);
            Ok(Arc::new(memory::InMemoryVectorIndex::new(args.dimension)))
        }
        "qdrant" => {
            info!("Vector index: qdrant at {} (collection {})", args.host, args.indexes);
            let api_key = Some(args.secret.clone()).filter(|k| !k.is_empty());
            Ok(Arc::new(qdrant::QdrantVectorIndex::new(&args.host, api_key, &args.indexes, args.dimension)?))
        }
        other =>
            Err(
                ConfigurationError::invalid(
                    "VECTOR_TYPE",
                    format!("unsupported vector index '{}' (expected memory or qdrant)", other)
                )
            ),
    }
}
