//! The vector-store port and an in-memory reference backend.
//!
//! Cosine similarity is the assumed metric; adapters over backends with a
//! different metric normalize before returning scores.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::MemoryError;

/// A scored match from a similarity query.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// Id of the matched record.
    pub id: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub score: f64,
    /// Metadata stored with the record.
    pub metadata: Value,
}

/// The vector-store port.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a record.
    async fn upsert(
        &self,
        id: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> Result<(), MemoryError>;

    /// Return the top-`k` records by cosine similarity, optionally filtered
    /// by exact metadata equality.
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<VectorMatch>, MemoryError>;

    /// Delete records by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<(), MemoryError>;
}

/// Cosine similarity between two vectors; zero for mismatched or empty input.
#[must_use]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// An in-memory [`VectorStore`] backed by a map.
///
/// Reference backend for tests and small runs; real deployments inject an
/// adapter over an external store.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<HashMap<String, (Vec<f32>, Value)>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` when the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn matches_filter(metadata: &Value, filter: Option<&HashMap<String, Value>>) -> bool {
    let Some(filter) = filter else { return true };
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        id: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        records.insert(id.to_owned(), (embedding.to_vec(), metadata));
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<VectorMatch>, MemoryError> {
        let records = self.records.read().await;
        let mut matches: Vec<VectorMatch> = records
            .iter()
            .filter(|(_, (_, metadata))| matches_filter(metadata, filter))
            .map(|(id, (vector, metadata))| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(embedding, vector),
                metadata: metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }
}
