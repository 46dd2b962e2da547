//! The plan-store port, an in-memory backend, and a caching wrapper.
//!
//! Stores clone on save and on load so caller mutations never bleed into
//! persisted state. Absence is the [`PlanError::NotFound`] sentinel,
//! distinguishable from backend failures.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::PlanError;

use super::{Plan, PlanStatus};

/// The plan-store port.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Persist a plan, replacing any existing plan with the same id.
    async fn save(&self, plan: &Plan) -> Result<(), PlanError>;

    /// Load a plan by id.
    async fn load(&self, id: &str) -> Result<Plan, PlanError>;

    /// Delete a plan by id. Deleting an absent plan is not an error.
    async fn delete(&self, id: &str) -> Result<(), PlanError>;

    /// List all plans for an agent.
    async fn list(&self, agent_id: &str) -> Result<Vec<Plan>, PlanError>;

    /// List an agent's plans with the given status.
    async fn list_by_status(
        &self,
        agent_id: &str,
        status: PlanStatus,
    ) -> Result<Vec<Plan>, PlanError> {
        Ok(self
            .list(agent_id)
            .await?
            .into_iter()
            .filter(|p| p.status == status)
            .collect())
    }
}

/// An in-memory [`PlanStore`].
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<String, Plan>>,
}

impl InMemoryPlanStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored plans.
    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }

    /// Returns `true` when the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn save(&self, plan: &Plan) -> Result<(), PlanError> {
        let mut stored = plan.clone();
        stored.updated_at = Utc::now();
        self.plans.write().await.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Plan, PlanError> {
        self.plans
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PlanError::NotFound(id.to_owned()))
    }

    async fn delete(&self, id: &str) -> Result<(), PlanError> {
        self.plans.write().await.remove(id);
        Ok(())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Plan>, PlanError> {
        let plans = self.plans.read().await;
        let mut matching: Vec<Plan> = plans
            .values()
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

/// Callback fired after a store operation succeeds.
pub type PlanStoreCallback = Arc<dyn Fn(&Plan) + Send + Sync>;

/// A bounded evict-oldest cache in front of a backing [`PlanStore`].
///
/// Cache reads take a shared lock, writes an exclusive one. The optional
/// on-save/on-load/on-delete callbacks fire only after the underlying store
/// reports success.
pub struct CachingPlanStore {
    inner: Arc<dyn PlanStore>,
    capacity: usize,
    cache: RwLock<CacheState>,
    on_save: Option<PlanStoreCallback>,
    on_load: Option<PlanStoreCallback>,
    on_delete: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

#[derive(Default)]
struct CacheState {
    plans: HashMap<String, Plan>,
    order: VecDeque<String>,
}

impl std::fmt::Debug for CachingPlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingPlanStore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl CachingPlanStore {
    /// Wrap a store with a cache of the given capacity.
    #[must_use]
    pub fn new(inner: Arc<dyn PlanStore>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            cache: RwLock::new(CacheState::default()),
            on_save: None,
            on_load: None,
            on_delete: None,
        }
    }

    /// Register a callback fired after each successful save.
    #[must_use]
    pub fn on_save(mut self, callback: PlanStoreCallback) -> Self {
        self.on_save = Some(callback);
        self
    }

    /// Register a callback fired after each successful load.
    #[must_use]
    pub fn on_load(mut self, callback: PlanStoreCallback) -> Self {
        self.on_load = Some(callback);
        self
    }

    /// Register a callback fired after each successful delete.
    #[must_use]
    pub fn on_delete(mut self, callback: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.on_delete = Some(callback);
        self
    }

    async fn cache_put(&self, plan: Plan) {
        let mut cache = self.cache.write().await;
        if !cache.plans.contains_key(&plan.id) {
            cache.order.push_back(plan.id.clone());
        }
        cache.plans.insert(plan.id.clone(), plan);
        while cache.order.len() > self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.plans.remove(&oldest);
            }
        }
    }

    /// Number of cached plans.
    pub async fn cached(&self) -> usize {
        self.cache.read().await.plans.len()
    }
}

#[async_trait]
impl PlanStore for CachingPlanStore {
    async fn save(&self, plan: &Plan) -> Result<(), PlanError> {
        self.inner.save(plan).await?;
        self.cache_put(plan.clone()).await;
        if let Some(callback) = &self.on_save {
            callback(plan);
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Plan, PlanError> {
        let cached = {
            let cache = self.cache.read().await;
            cache.plans.get(id).cloned()
        };
        let plan = match cached {
            Some(plan) => plan,
            None => {
                let plan = self.inner.load(id).await?;
                self.cache_put(plan.clone()).await;
                plan
            }
        };
        if let Some(callback) = &self.on_load {
            callback(&plan);
        }
        Ok(plan)
    }

    async fn delete(&self, id: &str) -> Result<(), PlanError> {
        self.inner.delete(id).await?;
        {
            let mut cache = self.cache.write().await;
            cache.plans.remove(id);
            cache.order.retain(|entry| entry != id);
        }
        if let Some(callback) = &self.on_delete {
            callback(id);
        }
        Ok(())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Plan>, PlanError> {
        self.inner.list(agent_id).await
    }
}
