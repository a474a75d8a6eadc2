use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ ScoredPoint, VectorIndex };
use crate::error::RetrievalError;

/// Brute-force cosine index held in process memory.
pub struct InMemoryVectorIndex {
    dimension: usize,
    points: RwLock<HashMap<String, (Vec<f32>, Value)>>,
}

impl InMemoryVectorIndex {
    /// A `dimension` of 0 accepts whatever length the first vector has.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    fn check(&self, vector: &[f32], stored: Option<usize>) -> Result<(), RetrievalError> {
        let expected = if self.dimension > 0 { Some(self.dimension) } else { stored };
        match expected {
            Some(d) if d != vector.len() =>
                Err(RetrievalError::Index(format!("dimension mismatch: expected {}, got {}", d, vector.len()))),
            _ => Ok(()),
        }
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a
        .iter()
        .zip(b)
        .map(|(x, y)| x * y)
        .sum();
    let na = a
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    let nb = b
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<(), RetrievalError> {
        let mut points = self.points.write().await;
        let stored = points.values().next().map(|(v, _)| v.len());
        self.check(&vector, stored)?;
        points.insert(id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredPoint>, RetrievalError> {
        let points = self.points.read().await;
        let stored = points.values().next().map(|(v, _)| v.len());
        self.check(&vector, stored)?;

        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .map(|(id, (v, meta))| ScoredPoint {
                id: id.clone(),
                score: cosine(&vector, v),
                metadata: meta.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), RetrievalError> {
        self.points
            .write().await
            .retain(|_, (_, meta)| meta.get("document_id").and_then(Value::as_str) != Some(document_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn returns_nearest_first() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert("x", vec![1.0, 0.0], json!({"n": "x"})).await.unwrap();
        index.upsert("y", vec![0.0, 1.0], json!({"n": "y"})).await.unwrap();
        index.upsert("xy", vec![1.0, 1.0], json!({"n": "xy"})).await.unwrap();

        let hits = index.search(vec![1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[1].id, "xy");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let index = InMemoryVectorIndex::new(0);
        index.upsert("a", vec![1.0, 0.0], json!({"v": 1})).await.unwrap();
        index.upsert("a", vec![0.0, 1.0], json!({"v": 2})).await.unwrap();
        assert_eq!(index.len().await, 1);
        let hits = index.search(vec![0.0, 1.0], 5).await.unwrap();
        assert_eq!(hits[0].metadata["v"], 2);
    }

    #[tokio::test]
    async fn delete_document_only_drops_its_own_points() {
        let index = InMemoryVectorIndex::new(0);
        index.upsert("a#0", vec![1.0, 0.0], json!({"document_id": "a"})).await.unwrap();
        index.upsert("a#1", vec![0.0, 1.0], json!({"document_id": "a"})).await.unwrap();
        index.upsert("b#0", vec![1.0, 1.0], json!({"document_id": "b"})).await.unwrap();
        index.upsert("loose", vec![1.0, 1.0], json!({})).await.unwrap();

        index.delete_document("a").await.unwrap();
        index.delete_document("missing").await.unwrap();

        let mut ids: Vec<String> = index
            .search(vec![1.0, 1.0], 10).await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["b#0", "loose"]);
    }

    #[tokio::test]
    async fn rejects_wrong_dimension() {
        let index = InMemoryVectorIndex::new(3);
        assert!(index.upsert("a", vec![1.0], json!({})).await.is_err());
        assert!(index.search(vec![1.0, 2.0], 1).await.is_err());
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
