//! Checkpoint persistence - which steps finished and what they produced

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteCheckpointStore;

use crate::core::handle::HandleValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckpointError {
    /// A step is recorded as completed but one of its handles cannot be restored
    #[error("checkpoint for step '{step}' is inconsistent: handle '{handle}' {reason}")]
    CheckpointMismatch {
        step: String,
        handle: String,
        reason: String,
    },

    /// The storage backend failed
    #[error("checkpoint store error: {0}")]
    Backend(String),
}

/// A completed step as recorded in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub step: String,
    pub completed_at: DateTime<Utc>,
    pub handles: Vec<(String, HandleValue)>,
}

/// Trait for checkpoint backends
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether a step was recorded as completed
    async fn has_completed(&self, step: &str) -> Result<bool, CheckpointError>;

    /// Record a step as completed together with the handles it produced
    async fn record_completed(
        &self,
        step: &str,
        handles: &[(String, HandleValue)],
    ) -> Result<(), CheckpointError>;

    /// Load a handle recorded by any completed step
    async fn load_handle(&self, name: &str) -> Result<Option<HandleValue>, CheckpointError>;

    /// Every completed step, oldest first
    async fn list_completed(&self) -> Result<Vec<CheckpointRecord>, CheckpointError>;

    /// Forget everything
    async fn clear(&self) -> Result<(), CheckpointError>;
}

/// In-memory checkpoints (for testing or `--no-checkpoint` runs)
pub struct InMemoryCheckpointStore {
    completed: tokio::sync::RwLock<HashMap<String, CheckpointRecord>>,
    handles: tokio::sync::RwLock<HashMap<String, HandleValue>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            completed: tokio::sync::RwLock::new(HashMap::new()),
            handles: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Record a completed step up front, as a previous run would have
    pub async fn seed(
        &self,
        step: &str,
        handles: Vec<(String, HandleValue)>,
    ) -> Result<(), CheckpointError> {
        self.record_completed(step, &handles).await
    }

    /// Drop a recorded handle while keeping the step marked completed
    pub async fn forget_handle(&self, name: &str) {
        self.handles.write().await.remove(name);
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn has_completed(&self, step: &str) -> Result<bool, CheckpointError> {
        Ok(self.completed.read().await.contains_key(step))
    }

    async fn record_completed(
        &self,
        step: &str,
        handles: &[(String, HandleValue)],
    ) -> Result<(), CheckpointError> {
        let mut completed = self.completed.write().await;
        let mut stored = self.handles.write().await;

        for (name, value) in handles {
            stored.insert(name.clone(), value.clone());
        }
        completed.insert(
            step.to_string(),
            CheckpointRecord {
                step: step.to_string(),
                completed_at: Utc::now(),
                handles: handles.to_vec(),
            },
        );

        Ok(())
    }

    async fn load_handle(&self, name: &str) -> Result<Option<HandleValue>, CheckpointError> {
        Ok(self.handles.read().await.get(name).cloned())
    }

    async fn list_completed(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let completed = self.completed.read().await;
        let mut records: Vec<_> = completed.values().cloned().collect();
        records.sort_by(|a, b| a.completed_at.cmp(&b.completed_at).then(a.step.cmp(&b.step)));
        Ok(records)
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        self.completed.write().await.clear();
        self.handles.write().await.clear();
        Ok(())
    }
}
