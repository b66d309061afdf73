//! Checkpoint sink for execution state snapshots.
//!
//! After every node body the engine offers the current `ExecutionState` to a
//! sink keyed by execution id. Snapshots are immutable: writers append, never
//! mutate prior entries. The in-memory store is the default sink; it backs
//! approval resume and partial-progress reconstruction.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::state::ExecutionState;

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint store error: {0}")]
    Store(String),

    #[error("no checkpoint for execution {0}")]
    NotFound(Uuid),
}

/// Sink for execution state snapshots, totally ordered per execution.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait CheckpointSink: Send + Sync {
    /// Append a snapshot for the execution.
    fn save(
        &self,
        execution_id: Uuid,
        state: &ExecutionState,
    ) -> impl std::future::Future<Output = Result<(), CheckpointError>> + Send;

    /// Load the most recent snapshot for the execution.
    fn load_latest(
        &self,
        execution_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionState>, CheckpointError>> + Send;
}

/// In-memory checkpoint store: an append-only snapshot list per execution.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    snapshots: Mutex<HashMap<Uuid, Vec<ExecutionState>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots recorded for an execution (test/diagnostic aid).
    pub fn snapshot_count(&self, execution_id: Uuid) -> usize {
        self.snapshots
            .lock()
            .map(|m| m.get(&execution_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl CheckpointSink for InMemoryCheckpointStore {
    async fn save(
        &self,
        execution_id: Uuid,
        state: &ExecutionState,
    ) -> Result<(), CheckpointError> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|e| CheckpointError::Store(e.to_string()))?;
        snapshots
            .entry(execution_id)
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn load_latest(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<ExecutionState>, CheckpointError> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|e| CheckpointError::Store(e.to_string()))?;
        Ok(snapshots
            .get(&execution_id)
            .and_then(|list| list.last())
            .cloned())
    }
}
