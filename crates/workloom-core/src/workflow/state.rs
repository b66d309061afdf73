//! The in-memory working set driven by the engine during one execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use workloom_types::workflow::{Step, StepStatus};

/// One recorded step failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub step_id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Mutable execution state owned by one execution task.
///
/// Invariants:
/// - `step_statuses` is monotone: pending -> running -> terminal, never back.
/// - `step_outputs[step_id]` is set exactly once per completed step.
/// - `should_stop = true` prevents any further step from leaving pending.
/// - `errors` accumulates in insertion order and is never mutated.
///
/// Checkpoints are snapshots (clones) taken by the owner; no other task
/// reads or writes this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub current_step_index: usize,
    pub step_statuses: HashMap<Uuid, StepStatus>,
    pub variables: HashMap<String, Value>,
    pub step_outputs: HashMap<Uuid, Value>,
    pub errors: Vec<ExecutionError>,
    pub should_stop: bool,
    pub waiting_approval: bool,
    pub approval_step_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub logs: Vec<String>,
}

impl ExecutionState {
    /// Initialize state for a fresh run: every step pending, variables seeded.
    pub fn new(
        workflow_id: Uuid,
        execution_id: Uuid,
        steps: &[Step],
        initial_variables: HashMap<String, Value>,
    ) -> Self {
        let step_statuses = steps
            .iter()
            .map(|s| (s.id, StepStatus::Pending))
            .collect();

        let mut state = Self {
            workflow_id,
            execution_id,
            current_step_index: 0,
            step_statuses,
            variables: initial_variables,
            step_outputs: HashMap::new(),
            errors: Vec::new(),
            should_stop: false,
            waiting_approval: false,
            approval_step_id: None,
            started_at: Utc::now(),
            logs: Vec::new(),
        };
        state.log("workflow started");
        state
    }

    /// Append a timestamped log line.
    pub fn log(&mut self, message: impl AsRef<str>) {
        self.logs
            .push(format!("[{}] {}", Utc::now().to_rfc3339(), message.as_ref()));
    }

    /// Record a step failure and stop the graph.
    pub fn record_failure(&mut self, step_id: Uuid, message: impl Into<String>) {
        let message = message.into();
        self.errors.push(ExecutionError {
            step_id,
            message: message.clone(),
            timestamp: Utc::now(),
        });
        self.step_statuses.insert(step_id, StepStatus::Failed);
        self.should_stop = true;
        self.log(format!("step failed: {message}"));
    }

    /// The first recorded error, which becomes the execution's terminal error.
    pub fn first_error(&self) -> Option<&ExecutionError> {
        self.errors.first()
    }

    /// True iff any step finished in `Failed`.
    pub fn any_failed(&self) -> bool {
        self.step_statuses
            .values()
            .any(|s| *s == StepStatus::Failed)
    }
}
