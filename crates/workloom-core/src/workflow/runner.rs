//! Execution runner: the lifecycle around one engine run.
//!
//! Creates the execution record and one step-execution row per step, drives
//! the engine with a persistence hook, computes the terminal status from the
//! final `ExecutionState`, and persists the outcome. Also owns cross-run
//! concerns: retrying a finished execution, approving or rejecting a
//! suspended one, and cooperative cancellation of a running one.
//!
//! The runner never throws across its boundary for runtime failures; a step
//! failure or engine-internal fault comes back as a summary with status
//! `failed`. Errors are reserved for precondition violations (unknown
//! workflow, execution not waiting for approval, storage faults).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use workloom_types::error::RepositoryError;
use workloom_types::workflow::{
    Execution, ExecutionStatus, Step, StepExecution, StepStatus,
};

use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointSink};
use super::dispatcher::StepExecutionContext;
use super::engine::{StateGraphEngine, StepCompletion, StepCompletionHook};
use super::state::ExecutionState;

// ---------------------------------------------------------------------------
// Summary & errors
// ---------------------------------------------------------------------------

/// What the caller gets back from a run.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub final_variables: HashMap<String, Value>,
    pub error: Option<String>,
    /// Set when the execution is suspended at an approval step.
    pub approval_step_id: Option<Uuid>,
}

/// Precondition and storage failures of the runner surface.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("execution {0} is not waiting for approval")]
    NotWaitingApproval(Uuid),

    #[error("no checkpoint available for execution {0}")]
    CheckpointMissing(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Drives workflow executions end to end.
///
/// Executions run in parallel across tasks; within one execution, steps are
/// strictly sequential (the engine's guarantee). Cancellation tokens are
/// keyed by execution id for the lifetime of the run.
pub struct ExecutionRunner<R, C, K>
where
    R: WorkflowRepository + 'static,
    C: StepExecutionContext,
    K: CheckpointSink,
{
    repo: Arc<R>,
    engine: StateGraphEngine<C, K>,
    checkpoints: Arc<K>,
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<R, C, K> ExecutionRunner<R, C, K>
where
    R: WorkflowRepository + 'static,
    C: StepExecutionContext,
    K: CheckpointSink,
{
    pub fn new(repo: Arc<R>, ctx: Arc<C>, checkpoints: Arc<K>) -> Self {
        Self {
            repo,
            engine: StateGraphEngine::new(ctx, Arc::clone(&checkpoints)),
            checkpoints,
            cancellations: DashMap::new(),
        }
    }

    /// Execute a workflow from step 0.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        input_data: HashMap<String, Value>,
        trigger_id: Option<Uuid>,
    ) -> Result<ExecutionSummary, RunnerError> {
        let workflow = self
            .repo
            .get_workflow(&workflow_id)
            .await?
            .ok_or(RunnerError::WorkflowNotFound(workflow_id))?;
        let steps = self.repo.list_steps(&workflow_id).await?;

        let execution_id = Uuid::now_v7();
        let mut initial_variables = workflow.variables.clone();
        initial_variables.extend(input_data.clone());

        let execution = Execution {
            id: execution_id,
            workflow_id,
            status: ExecutionStatus::Running,
            trigger_id,
            input_variables: input_data,
            final_variables: HashMap::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.repo.create_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution_id,
            workflow = workflow.name.as_str(),
            steps = steps.len(),
            "starting workflow execution"
        );

        // One pending step-execution row per step, created up front.
        let mut row_ids = HashMap::with_capacity(steps.len());
        for step in &steps {
            let row = StepExecution {
                id: Uuid::now_v7(),
                execution_id,
                step_id: step.id,
                status: StepStatus::Pending,
                attempt: 0,
                output: None,
                logs: None,
                error: None,
                started_at: None,
                completed_at: None,
            };
            self.repo.create_step_execution(&row).await?;
            row_ids.insert(step.id, row.id);
        }

        let state = ExecutionState::new(workflow_id, execution_id, &steps, initial_variables);
        self.drive_and_finalize(execution_id, workflow_id, &steps, state, false, row_ids)
            .await
    }

    /// Retry a finished execution: a new execution row whose input is the
    /// prior run's final variables, re-run from step 0.
    pub async fn retry(&self, execution_id: Uuid) -> Result<ExecutionSummary, RunnerError> {
        let prior = self
            .repo
            .get_execution(&execution_id)
            .await?
            .ok_or(RunnerError::ExecutionNotFound(execution_id))?;

        tracing::info!(prior = %execution_id, "retrying execution");
        self.execute(prior.workflow_id, prior.final_variables, prior.trigger_id)
            .await
    }

    /// Approve or reject an execution suspended at an approval step.
    pub async fn approve(
        &self,
        execution_id: Uuid,
        approved: bool,
    ) -> Result<ExecutionSummary, RunnerError> {
        let execution = self
            .repo
            .get_execution(&execution_id)
            .await?
            .ok_or(RunnerError::ExecutionNotFound(execution_id))?;

        if execution.status != ExecutionStatus::WaitingApproval {
            return Err(RunnerError::NotWaitingApproval(execution_id));
        }

        if !approved {
            self.repo
                .finalize_execution(
                    &execution_id,
                    ExecutionStatus::Cancelled,
                    &execution.final_variables,
                    Some("approval rejected"),
                )
                .await?;
            tracing::info!(execution_id = %execution_id, "approval rejected, execution cancelled");
            return Ok(ExecutionSummary {
                execution_id,
                workflow_id: execution.workflow_id,
                status: ExecutionStatus::Cancelled,
                final_variables: execution.final_variables,
                error: Some("approval rejected".to_string()),
                approval_step_id: None,
            });
        }

        let state = self
            .checkpoints
            .load_latest(execution_id)
            .await?
            .ok_or(RunnerError::CheckpointMissing(execution_id))?;

        let steps = self.repo.list_steps(&execution.workflow_id).await?;
        let rows = self.repo.list_step_executions(&execution_id).await?;
        let row_ids: HashMap<Uuid, Uuid> =
            rows.iter().map(|r| (r.step_id, r.id)).collect();

        // Reflect the approval decision on the approval step's row.
        if let Some(approval_step_id) = state.approval_step_id {
            if let Some(row_id) = row_ids.get(&approval_step_id) {
                self.repo
                    .update_step_execution(
                        row_id,
                        StepStatus::Success,
                        Some(&serde_json::json!({ "approved": true })),
                        None,
                        None,
                        1,
                    )
                    .await?;
            }
        }

        tracing::info!(execution_id = %execution_id, "approval granted, resuming execution");
        self.drive_and_finalize(
            execution_id,
            execution.workflow_id,
            &steps,
            state,
            true,
            row_ids,
        )
        .await
    }

    /// Request cooperative cancellation of a running execution. The current
    /// step completes normally, then the router stops the graph. Returns
    /// `false` when no run with that id is in flight.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.cancellations.get(&execution_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(execution_id = %execution_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn drive_and_finalize(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        steps: &[Step],
        state: ExecutionState,
        resume: bool,
        row_ids: HashMap<Uuid, Uuid>,
    ) -> Result<ExecutionSummary, RunnerError> {
        let cancel = CancellationToken::new();
        self.cancellations.insert(execution_id, cancel.clone());

        let hook = self.persistence_hook(row_ids);
        let result = if resume {
            self.engine
                .resume_after_approval(steps, state, &cancel, Some(&hook))
                .await
        } else {
            self.engine.run(steps, state, &cancel, Some(&hook)).await
        };

        self.cancellations.remove(&execution_id);

        let state = match result {
            Ok(state) => state,
            Err(e) => {
                // Engine-internal fault: terminate as failed, never throw.
                let message = format!("internal error: {e}");
                tracing::error!(execution_id = %execution_id, error = %e, "engine fault");
                self.repo
                    .finalize_execution(
                        &execution_id,
                        ExecutionStatus::Failed,
                        &HashMap::new(),
                        Some(&message),
                    )
                    .await?;
                return Ok(ExecutionSummary {
                    execution_id,
                    workflow_id,
                    status: ExecutionStatus::Failed,
                    final_variables: HashMap::new(),
                    error: Some(message),
                    approval_step_id: None,
                });
            }
        };

        let (status, error) = if state.any_failed() {
            (
                ExecutionStatus::Failed,
                state.first_error().map(|e| e.message.clone()),
            )
        } else if state.waiting_approval {
            (ExecutionStatus::WaitingApproval, None)
        } else if state.should_stop {
            // Stopped without a failure: cooperative cancellation.
            (
                ExecutionStatus::Cancelled,
                Some("execution cancelled".to_string()),
            )
        } else {
            (ExecutionStatus::Success, None)
        };

        self.repo
            .finalize_execution(&execution_id, status, &state.variables, error.as_deref())
            .await?;

        tracing::info!(
            execution_id = %execution_id,
            status = ?status,
            "execution finalized"
        );

        Ok(ExecutionSummary {
            execution_id,
            workflow_id,
            status,
            final_variables: state.variables,
            error,
            approval_step_id: state.approval_step_id,
        })
    }

    /// Build the hook that upserts the matching step-execution row after
    /// each step completion.
    fn persistence_hook(&self, row_ids: HashMap<Uuid, Uuid>) -> StepCompletionHook {
        let repo = Arc::clone(&self.repo);
        Arc::new(move |completion: StepCompletion| {
            let repo = Arc::clone(&repo);
            let row_id = row_ids.get(&completion.step_id).copied();
            Box::pin(async move {
                let Some(row_id) = row_id else {
                    tracing::warn!(step_id = %completion.step_id, "no step execution row");
                    return;
                };
                let output = completion.record.get("output").cloned();
                let logs = completion
                    .record
                    .get("logs")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let error = completion
                    .record
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                if let Err(e) = repo
                    .update_step_execution(
                        &row_id,
                        completion.status,
                        output.as_ref(),
                        logs.as_deref(),
                        error.as_deref(),
                        completion.attempt,
                    )
                    .await
                {
                    tracing::error!(error = %e, "failed to persist step completion");
                }
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
