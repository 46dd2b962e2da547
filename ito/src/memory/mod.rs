//! Multi-tier memory for agent runs.
//!
//! The [`MemoryManager`] stores `(content, metadata, importance)` tuples,
//! embeds them through an injected [`EmbeddingModel`], and indexes them in
//! an injected [`VectorStore`] for similarity recall. Tiers are a metadata
//! tag plus a retention policy:
//!
//! - **working** — bounded FIFO, evict-oldest, not vector-indexed;
//! - **short_term** — TTL-expired via [`MemoryManager::sweep_expired`];
//! - **long_term** — vector-indexed, kept until explicitly forgotten;
//! - **episodic** — long-term entries of `type=episode` aggregating the
//!   member ids of one execution.
//!
//! Structured payloads follow the `*_json` convention: the serialized
//! object is stashed in metadata (`trace_json`, `plan_json`) next to the
//! summary fields the recall query matches on in `content`.

mod store;

pub use store::{InMemoryVectorStore, VectorMatch, VectorStore};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::MemoryError;
use crate::plan::Plan;

/// Retention tier of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Bounded FIFO scratchpad for the current run.
    #[default]
    Working,
    /// Recent context, expired after a TTL.
    ShortTerm,
    /// Durable, vector-indexed knowledge.
    LongTerm,
    /// Aggregated record of one full execution.
    Episodic,
}

impl MemoryTier {
    /// String form used in metadata filters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Episodic => "episodic",
        }
    }

    /// Parse a tier tag; unknown tags fall back to working.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "short_term" => Self::ShortTerm,
            "long_term" => Self::LongTerm,
            "episodic" => Self::Episodic,
            _ => Self::Working,
        }
    }

    /// The next more durable tier, if any.
    #[must_use]
    pub const fn promoted(&self) -> Option<Self> {
        match self {
            Self::Working => Some(Self::ShortTerm),
            Self::ShortTerm => Some(Self::LongTerm),
            Self::LongTerm | Self::Episodic => None,
        }
    }

    /// Whether entries of this tier are indexed in the vector store.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        !matches!(self, Self::Working)
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored memory.
///
/// Entries returned from recall are read-only snapshots; mutating them does
/// not affect the manager's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique id.
    pub id: String,
    /// Retention tier.
    pub tier: MemoryTier,
    /// The text content, matched by recall queries.
    pub content: String,
    /// The content's embedding, when the tier is indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Caller metadata, including the `*_json` payloads.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Importance in `[0, 1]`; tie-breaker for decay.
    pub importance: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time this entry was returned by recall.
    pub last_accessed: DateTime<Utc>,
}

/// The embedding-model port.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Policy knobs for the manager.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum entries in the working FIFO before evict-oldest.
    pub working_capacity: usize,
    /// Time-to-live for short-term entries.
    pub short_term_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 64,
            short_term_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// The memory manager.
///
/// Owns the entries; the injected vector store owns its own locking. The
/// manager serializes only tier-policy bookkeeping.
pub struct MemoryManager {
    embedder: Arc<dyn EmbeddingModel>,
    store: Arc<dyn VectorStore>,
    config: MemoryConfig,
    entries: RwLock<HashMap<String, MemoryEntry>>,
    working: RwLock<VecDeque<String>>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    /// Create a manager over the given backends.
    #[must_use]
    pub fn new(embedder: Arc<dyn EmbeddingModel>, store: Arc<dyn VectorStore>) -> Self {
        Self::with_config(embedder, store, MemoryConfig::default())
    }

    /// Create a manager with explicit policy configuration.
    #[must_use]
    pub fn with_config(
        embedder: Arc<dyn EmbeddingModel>,
        store: Arc<dyn VectorStore>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            config,
            entries: RwLock::new(HashMap::new()),
            working: RwLock::new(VecDeque::new()),
        }
    }

    /// Store a memory.
    ///
    /// The target tier is read from `metadata["tier"]`, defaulting to
    /// working. Indexed tiers are embedded and upserted into the vector
    /// store; the working tier only enters the FIFO.
    pub async fn store(
        &self,
        content: impl Into<String>,
        metadata: HashMap<String, Value>,
        importance: f64,
    ) -> Result<MemoryEntry, MemoryError> {
        let content = content.into();
        let tier = metadata
            .get("tier")
            .and_then(Value::as_str)
            .map(MemoryTier::parse)
            .unwrap_or_default();

        let mut entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            tier,
            content,
            embedding: None,
            metadata,
            importance: importance.clamp(0.0, 1.0),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
        };
        entry
            .metadata
            .insert("tier".to_owned(), json!(tier.as_str()));

        if tier.is_indexed() {
            let embedding = self.embedder.embed(&entry.content).await?;
            self.store
                .upsert(&entry.id, &embedding, self.index_metadata(&entry))
                .await?;
            entry.embedding = Some(embedding);
        } else {
            self.push_working(&entry.id).await?;
        }

        debug!(id = %entry.id, tier = %tier, "Stored memory entry");
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    fn index_metadata(&self, entry: &MemoryEntry) -> Value {
        json!({
            "tier": entry.tier.as_str(),
            "type": entry.metadata.get("type").cloned().unwrap_or(Value::Null),
            "importance": entry.importance,
        })
    }

    async fn push_working(&self, id: &str) -> Result<(), MemoryError> {
        let evicted = {
            let mut working = self.working.write().await;
            working.push_back(id.to_owned());
            if working.len() > self.config.working_capacity {
                working.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            self.entries.write().await.remove(&old);
        }
        Ok(())
    }

    /// Recall the top-`k` entries of `tier` most similar to `query`.
    ///
    /// The working tier is not vector-indexed; recall there returns the
    /// most recent entries. Callers post-filter by `metadata["type"]`.
    pub async fn recall(
        &self,
        query: &str,
        tier: MemoryTier,
        k: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        if !tier.is_indexed() {
            let working = self.working.read().await;
            let ids: Vec<String> = working.iter().rev().take(k).cloned().collect();
            drop(working);
            return Ok(self.snapshot(&ids).await);
        }

        let embedding = self.embedder.embed(query).await?;
        let mut filter = HashMap::new();
        filter.insert("tier".to_owned(), json!(tier.as_str()));
        let matches = self.store.query(&embedding, k, Some(&filter)).await?;

        let ids: Vec<String> = matches.into_iter().map(|m| m.id).collect();
        Ok(self.snapshot(&ids).await)
    }

    async fn snapshot(&self, ids: &[String]) -> Vec<MemoryEntry> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        ids.iter()
            .filter_map(|id| {
                entries.get_mut(id).map(|entry| {
                    entry.last_accessed = now;
                    entry.clone()
                })
            })
            .collect()
    }

    /// Promote an entry to the next more durable tier.
    ///
    /// Working entries gain an embedding and enter the vector index;
    /// already-durable tiers are left unchanged.
    pub async fn promote(&self, id: &str) -> Result<MemoryEntry, MemoryError> {
        let mut entry = {
            let entries = self.entries.read().await;
            entries
                .get(id)
                .cloned()
                .ok_or_else(|| MemoryError::NotFound(id.to_owned()))?
        };

        let Some(next) = entry.tier.promoted() else {
            return Ok(entry);
        };

        if entry.tier == MemoryTier::Working {
            let mut working = self.working.write().await;
            working.retain(|w| w != id);
        }

        entry.tier = next;
        entry
            .metadata
            .insert("tier".to_owned(), json!(next.as_str()));
        if entry.embedding.is_none() {
            entry.embedding = Some(self.embedder.embed(&entry.content).await?);
        }
        if let Some(embedding) = &entry.embedding {
            self.store
                .upsert(&entry.id, embedding, self.index_metadata(&entry))
                .await?;
        }

        self.entries
            .write()
            .await
            .insert(entry.id.clone(), entry.clone());
        debug!(id = %id, tier = %next, "Promoted memory entry");
        Ok(entry)
    }

    /// Remove entries by id.
    pub async fn forget(&self, ids: &[String]) -> Result<(), MemoryError> {
        self.store.delete(ids).await?;
        let mut entries = self.entries.write().await;
        let mut working = self.working.write().await;
        for id in ids {
            entries.remove(id);
            working.retain(|w| w != id);
        }
        Ok(())
    }

    /// Expire short-term entries older than the configured TTL.
    ///
    /// Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> Result<usize, MemoryError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.short_term_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1));

        let expired: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|e| e.tier == MemoryTier::ShortTerm && e.created_at < cutoff)
                .map(|e| e.id.clone())
                .collect()
        };

        if !expired.is_empty() {
            self.forget(&expired).await?;
        }
        Ok(expired.len())
    }

    /// Store a plan outcome for later recall by the replan engine.
    ///
    /// The full plan JSON lands in `metadata["plan_json"]`; the content is a
    /// summary the goal query can match.
    pub async fn store_plan_outcome(
        &self,
        plan: &Plan,
        success: bool,
        detail: &str,
    ) -> Result<MemoryEntry, MemoryError> {
        let mut metadata = HashMap::new();
        metadata.insert("tier".to_owned(), json!(MemoryTier::LongTerm.as_str()));
        metadata.insert(
            "type".to_owned(),
            json!(if success { "successful_plan" } else { "failed_plan" }),
        );
        metadata.insert(
            "plan_json".to_owned(),
            json!(serde_json::to_string(plan).unwrap_or_default()),
        );
        metadata.insert("goal".to_owned(), json!(plan.goal));

        let outcome = if success { "succeeded" } else { "failed" };
        let content = format!("Plan for goal '{}' {outcome}: {detail}", plan.goal);
        self.store(content, metadata, if success { 0.7 } else { 0.8 })
            .await
    }

    /// Recall plans previously stored for a goal, filtered by outcome.
    pub async fn recall_plans(
        &self,
        goal: &str,
        success: bool,
        k: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let wanted = if success { "successful_plan" } else { "failed_plan" };
        let entries = self.recall(goal, MemoryTier::LongTerm, k * 4).await?;
        Ok(entries
            .into_iter()
            .filter(|e| {
                e.metadata
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t == wanted)
            })
            .take(k)
            .collect())
    }

    /// Aggregate the given member entries into one episodic record.
    pub async fn record_episode(
        &self,
        execution_id: &str,
        summary: impl Into<String>,
        member_ids: Vec<String>,
    ) -> Result<MemoryEntry, MemoryError> {
        let mut metadata = HashMap::new();
        metadata.insert("tier".to_owned(), json!(MemoryTier::Episodic.as_str()));
        metadata.insert("type".to_owned(), json!("episode"));
        metadata.insert("execution_id".to_owned(), json!(execution_id));
        metadata.insert("member_ids".to_owned(), json!(member_ids));
        self.store(summary, metadata, 0.6).await
    }

    /// Number of entries currently held, across all tiers.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` when no entries are held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Deterministic embedder: maps text onto a tiny vocabulary axis so
    /// identical texts embed identically.
    struct VocabEmbedder;

    #[async_trait]
    impl EmbeddingModel for VocabEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            let mut v = vec![0.0f32; 8];
            for (i, byte) in text.bytes().enumerate() {
                v[i % 8] += f32::from(byte) / 255.0;
            }
            Ok(v)
        }
    }

    fn manager() -> MemoryManager {
        MemoryManager::new(Arc::new(VocabEmbedder), Arc::new(InMemoryVectorStore::new()))
    }

    fn tier_meta(tier: MemoryTier) -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert("tier".to_owned(), json!(tier.as_str()));
        m
    }

    mod tiers {
        use super::*;

        #[test]
        fn parse_roundtrip() {
            for tier in [
                MemoryTier::Working,
                MemoryTier::ShortTerm,
                MemoryTier::LongTerm,
                MemoryTier::Episodic,
            ] {
                assert_eq!(MemoryTier::parse(tier.as_str()), tier);
            }
            assert_eq!(MemoryTier::parse("bogus"), MemoryTier::Working);
        }

        #[test]
        fn promotion_ladder() {
            assert_eq!(
                MemoryTier::Working.promoted(),
                Some(MemoryTier::ShortTerm)
            );
            assert_eq!(
                MemoryTier::ShortTerm.promoted(),
                Some(MemoryTier::LongTerm)
            );
            assert!(MemoryTier::LongTerm.promoted().is_none());
            assert!(MemoryTier::Episodic.promoted().is_none());
        }
    }

    mod store_recall {
        use super::*;

        #[tokio::test]
        async fn store_defaults_to_working() {
            let mgr = manager();
            let entry = mgr.store("note", HashMap::new(), 0.5).await.unwrap();
            assert_eq!(entry.tier, MemoryTier::Working);
            assert!(entry.embedding.is_none());
        }

        #[tokio::test]
        async fn importance_is_clamped() {
            let mgr = manager();
            let entry = mgr.store("note", HashMap::new(), 7.0).await.unwrap();
            assert!((entry.importance - 1.0).abs() < f64::EPSILON);
        }

        #[tokio::test]
        async fn long_term_store_then_recall_returns_entry() {
            let mgr = manager();
            let stored = mgr
                .store(
                    "the capital of France is Paris",
                    tier_meta(MemoryTier::LongTerm),
                    0.9,
                )
                .await
                .unwrap();
            assert!(stored.embedding.is_some());

            let recalled = mgr
                .recall("the capital of France is Paris", MemoryTier::LongTerm, 3)
                .await
                .unwrap();
            assert!(recalled.iter().any(|e| e.id == stored.id));
        }

        #[tokio::test]
        async fn recall_filters_by_tier() {
            let mgr = manager();
            mgr.store("short fact", tier_meta(MemoryTier::ShortTerm), 0.5)
                .await
                .unwrap();
            let long = mgr
                .store("long fact", tier_meta(MemoryTier::LongTerm), 0.5)
                .await
                .unwrap();

            let recalled = mgr
                .recall("long fact", MemoryTier::LongTerm, 5)
                .await
                .unwrap();
            assert_eq!(recalled.len(), 1);
            assert_eq!(recalled[0].id, long.id);
        }

        #[tokio::test]
        async fn working_recall_returns_most_recent() {
            let mgr = manager();
            for i in 0..5 {
                mgr.store(format!("note {i}"), HashMap::new(), 0.5)
                    .await
                    .unwrap();
            }
            let recalled = mgr.recall("ignored", MemoryTier::Working, 2).await.unwrap();
            assert_eq!(recalled.len(), 2);
            assert_eq!(recalled[0].content, "note 4");
            assert_eq!(recalled[1].content, "note 3");
        }

        #[tokio::test]
        async fn recall_zero_is_empty() {
            let mgr = manager();
            assert!(mgr
                .recall("x", MemoryTier::LongTerm, 0)
                .await
                .unwrap()
                .is_empty());
        }
    }

    mod policies {
        use super::*;

        #[tokio::test]
        async fn working_fifo_evicts_oldest() {
            let mgr = MemoryManager::with_config(
                Arc::new(VocabEmbedder),
                Arc::new(InMemoryVectorStore::new()),
                MemoryConfig {
                    working_capacity: 2,
                    ..MemoryConfig::default()
                },
            );
            let first = mgr.store("one", HashMap::new(), 0.5).await.unwrap();
            mgr.store("two", HashMap::new(), 0.5).await.unwrap();
            mgr.store("three", HashMap::new(), 0.5).await.unwrap();

            assert_eq!(mgr.len().await, 2);
            let recalled = mgr.recall("", MemoryTier::Working, 10).await.unwrap();
            assert!(recalled.iter().all(|e| e.id != first.id));
        }

        #[tokio::test]
        async fn promote_moves_working_to_short_term() {
            let mgr = manager();
            let entry = mgr.store("fact", HashMap::new(), 0.5).await.unwrap();
            let promoted = mgr.promote(&entry.id).await.unwrap();

            assert_eq!(promoted.tier, MemoryTier::ShortTerm);
            assert!(promoted.embedding.is_some());
            assert!(mgr
                .recall("", MemoryTier::Working, 10)
                .await
                .unwrap()
                .is_empty());
        }

        #[tokio::test]
        async fn promote_unknown_id_errors() {
            let mgr = manager();
            assert!(matches!(
                mgr.promote("nope").await,
                Err(MemoryError::NotFound(_))
            ));
        }

        #[tokio::test]
        async fn sweep_removes_only_expired_short_term() {
            let mgr = MemoryManager::with_config(
                Arc::new(VocabEmbedder),
                Arc::new(InMemoryVectorStore::new()),
                MemoryConfig {
                    working_capacity: 8,
                    short_term_ttl: Duration::from_secs(0),
                },
            );
            mgr.store("ephemeral", tier_meta(MemoryTier::ShortTerm), 0.5)
                .await
                .unwrap();
            mgr.store("durable", tier_meta(MemoryTier::LongTerm), 0.5)
                .await
                .unwrap();

            // Zero TTL: any short-term entry is already expired.
            tokio::time::sleep(Duration::from_millis(5)).await;
            let removed = mgr.sweep_expired().await.unwrap();
            assert_eq!(removed, 1);
            assert_eq!(mgr.len().await, 1);
        }

        #[tokio::test]
        async fn forget_removes_everywhere() {
            let mgr = manager();
            let entry = mgr
                .store("fact", tier_meta(MemoryTier::LongTerm), 0.5)
                .await
                .unwrap();
            mgr.forget(&[entry.id.clone()]).await.unwrap();
            assert!(mgr
                .recall("fact", MemoryTier::LongTerm, 5)
                .await
                .unwrap()
                .is_empty());
        }
    }

    mod structured {
        use super::*;
        use crate::plan::PlanStep;

        #[tokio::test]
        async fn plan_outcomes_roundtrip_through_recall() {
            let mgr = manager();
            let mut plan = Plan::new("agent-1", "set up webhook");
            plan.steps.push(PlanStep::new(0, "create endpoint"));

            mgr.store_plan_outcome(&plan, true, "all steps completed")
                .await
                .unwrap();
            mgr.store_plan_outcome(&plan, false, "registration failed")
                .await
                .unwrap();

            let wins = mgr.recall_plans("set up webhook", true, 3).await.unwrap();
            assert_eq!(wins.len(), 1);
            let stored: Plan = serde_json::from_str(
                wins[0].metadata["plan_json"].as_str().unwrap(),
            )
            .unwrap();
            assert_eq!(stored.goal, "set up webhook");

            let losses = mgr.recall_plans("set up webhook", false, 3).await.unwrap();
            assert_eq!(losses.len(), 1);
        }

        #[tokio::test]
        async fn episodes_carry_member_ids() {
            let mgr = manager();
            let a = mgr
                .store("step one", tier_meta(MemoryTier::LongTerm), 0.5)
                .await
                .unwrap();
            let episode = mgr
                .record_episode("exec_9", "solved the task", vec![a.id.clone()])
                .await
                .unwrap();

            assert_eq!(episode.tier, MemoryTier::Episodic);
            assert_eq!(episode.metadata["type"], "episode");
            assert_eq!(episode.metadata["member_ids"], json!([a.id]));
        }
    }
}
