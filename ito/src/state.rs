//! The state-store port.
//!
//! Hosts persist per-session agent state through this port; the runtime
//! consumes it opaquely and attaches no semantics to the payload. Stores
//! clone on save and load, like plan stores.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::MemoryError;

/// Persisted state for one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Id of the owning agent.
    pub agent_id: String,
    /// Id of the session within the agent.
    pub session_id: String,
    /// Opaque host payload.
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// Last save time.
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    /// Create an empty state record.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
            data: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// The state-store port.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist a state record.
    async fn save(&self, state: &AgentState) -> Result<(), MemoryError>;

    /// Load the state for a session.
    async fn load(&self, agent_id: &str, session_id: &str) -> Result<AgentState, MemoryError>;

    /// Delete the state for a session. Absence is not an error.
    async fn delete(&self, agent_id: &str, session_id: &str) -> Result<(), MemoryError>;

    /// List all states for an agent.
    async fn list(&self, agent_id: &str) -> Result<Vec<AgentState>, MemoryError>;
}

/// An in-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<(String, String), AgentState>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &AgentState) -> Result<(), MemoryError> {
        let mut stored = state.clone();
        stored.updated_at = Utc::now();
        let key = (stored.agent_id.clone(), stored.session_id.clone());
        self.states.write().await.insert(key, stored);
        Ok(())
    }

    async fn load(&self, agent_id: &str, session_id: &str) -> Result<AgentState, MemoryError> {
        self.states
            .read()
            .await
            .get(&(agent_id.to_owned(), session_id.to_owned()))
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(format!("{agent_id}/{session_id}")))
    }

    async fn delete(&self, agent_id: &str, session_id: &str) -> Result<(), MemoryError> {
        self.states
            .write()
            .await
            .remove(&(agent_id.to_owned(), session_id.to_owned()));
        Ok(())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<AgentState>, MemoryError> {
        let states = self.states.read().await;
        let mut matching: Vec<AgentState> = states
            .values()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(matching)
    }
}
