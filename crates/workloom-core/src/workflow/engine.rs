//! The state-graph interpreter: drives one execution over its `ExecutionState`.
//!
//! Steps run strictly sequentially in declared order; step N is never entered
//! before step N-1 reaches a terminal status. A failed step stops the graph
//! and leaves downstream steps pending. After every node body the state is
//! offered to the checkpoint sink, enabling approval resume and partial
//! progress reconstruction. Cancellation is cooperative: the signal sets
//! `should_stop` and the current step completes normally.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use workloom_types::workflow::{Step, StepStatus};

use crate::expression::ConditionEvaluator;

use super::checkpoint::{CheckpointError, CheckpointSink};
use super::dispatcher::{
    apply_output_mapping, StepDispatcher, StepExecutionContext, StepResult,
};
use super::graph::{build_graph, route, GraphError, Route, StepGraph};
use super::state::ExecutionState;

// ---------------------------------------------------------------------------
// Completion hook
// ---------------------------------------------------------------------------

/// What the persistence hook sees after each step reaches a terminal status.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub step_id: Uuid,
    pub status: StepStatus,
    /// The step result record: `{ success, output, error?, logs? }`.
    pub record: Value,
    pub duration: Duration,
    /// 1-based attempt count, including retries.
    pub attempt: u32,
}

/// Callback fired after each step completes; the runner uses it to upsert
/// the matching `StepExecution` row.
pub type StepCompletionHook =
    Arc<dyn Fn(StepCompletion) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Engine-internal failures. Step failures are NOT errors here; they are
/// captured in the state and surfaced through the execution status.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("graph references unknown step {0}")]
    MissingStep(Uuid),

    #[error("execution is not waiting for approval")]
    NotWaitingApproval,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// State-machine interpreter over an [`ExecutionState`].
pub struct StateGraphEngine<C: StepExecutionContext, K: CheckpointSink> {
    dispatcher: StepDispatcher,
    evaluator: ConditionEvaluator,
    ctx: Arc<C>,
    checkpoints: Arc<K>,
}

impl<C: StepExecutionContext, K: CheckpointSink> StateGraphEngine<C, K> {
    pub fn new(ctx: Arc<C>, checkpoints: Arc<K>) -> Self {
        Self {
            dispatcher: StepDispatcher::new(),
            evaluator: ConditionEvaluator::new(),
            ctx,
            checkpoints,
        }
    }

    /// Run an execution from its entry node.
    ///
    /// An empty step list returns the state unchanged; the runner maps that
    /// directly to `success`.
    pub async fn run(
        &self,
        steps: &[Step],
        state: ExecutionState,
        cancel: &CancellationToken,
        on_step_complete: Option<&StepCompletionHook>,
    ) -> Result<ExecutionState, EngineError> {
        let graph = build_graph(steps)?;
        let entry = graph.entry();
        self.drive(steps, &graph, entry, state, cancel, on_step_complete)
            .await
    }

    /// Resume an execution suspended at an approval step.
    ///
    /// Marks the approval step as succeeded, clears the waiting flag, and
    /// continues from the approval step's successor.
    pub async fn resume_after_approval(
        &self,
        steps: &[Step],
        mut state: ExecutionState,
        cancel: &CancellationToken,
        on_step_complete: Option<&StepCompletionHook>,
    ) -> Result<ExecutionState, EngineError> {
        if !state.waiting_approval {
            return Err(EngineError::NotWaitingApproval);
        }
        let approval_id = state
            .approval_step_id
            .ok_or(EngineError::NotWaitingApproval)?;

        state.waiting_approval = false;
        state.approval_step_id = None;
        state
            .step_statuses
            .insert(approval_id, StepStatus::Success);
        state
            .step_outputs
            .insert(approval_id, json!({ "approved": true }));
        state.log("approval granted, resuming");

        let graph = build_graph(steps)?;
        let start = graph.successor(&approval_id);
        self.drive(steps, &graph, start, state, cancel, on_step_complete)
            .await
    }

    async fn drive(
        &self,
        steps: &[Step],
        graph: &StepGraph,
        start: Option<Uuid>,
        mut state: ExecutionState,
        cancel: &CancellationToken,
        on_step_complete: Option<&StepCompletionHook>,
    ) -> Result<ExecutionState, EngineError> {
        let step_by_id: HashMap<Uuid, &Step> = steps.iter().map(|s| (s.id, s)).collect();

        let mut cursor = start;
        while let Some(step_id) = cursor {
            if cancel.is_cancelled() && !state.should_stop {
                state.should_stop = true;
                state.log("cancellation requested");
            }

            match route(&state) {
                Route::Stop | Route::WaitApproval => break,
                Route::Continue => {}
            }

            let step = step_by_id
                .get(&step_id)
                .copied()
                .ok_or(EngineError::MissingStep(step_id))?;

            self.execute_node(step, &mut state, on_step_complete).await;

            self.checkpoints.save(state.execution_id, &state).await?;

            cursor = match route(&state) {
                Route::Continue => graph.successor(&step_id),
                Route::Stop | Route::WaitApproval => None,
            };
        }

        Ok(state)
    }

    /// One node body: gate, project, dispatch (with bounded retry), fold.
    async fn execute_node(
        &self,
        step: &Step,
        state: &mut ExecutionState,
        on_step_complete: Option<&StepCompletionHook>,
    ) {
        if state.should_stop || state.waiting_approval {
            return;
        }

        let step_id = step.id;
        state.step_statuses.insert(step_id, StepStatus::Running);
        state.current_step_index += 1;
        state.log(format!("starting step: {}", step.name));

        tracing::info!(
            execution_id = %state.execution_id,
            step = step.name.as_str(),
            index = state.current_step_index,
            "executing step"
        );

        // Optional per-step gate; falsy skips the step, variables untouched.
        if let Some(gate) = &step.condition {
            let met = self
                .evaluator
                .evaluate_bool(gate, &state.variables)
                .unwrap_or_else(|e| {
                    tracing::warn!(
                        step = step.name.as_str(),
                        error = %e,
                        "gate expression failed, treating as false"
                    );
                    false
                });

            if !met {
                state.step_statuses.insert(step_id, StepStatus::Skipped);
                state.step_outputs.insert(step_id, Value::Null);
                state.log(format!("step skipped (condition not met): {}", step.name));

                self.fire(
                    on_step_complete,
                    StepCompletion {
                        step_id,
                        status: StepStatus::Skipped,
                        record: json!({ "success": true, "output": null }),
                        duration: Duration::ZERO,
                        attempt: 0,
                    },
                )
                .await;
                return;
            }
        }

        let view = StepDispatcher::project_input(step, &state.variables);

        let started = std::time::Instant::now();
        let mut attempt = 1u32;
        let result = loop {
            let result = self.dispatcher.execute_step(self.ctx.as_ref(), step, &view).await;
            if result.success || result.requires_approval {
                break result;
            }

            match &step.retry_config {
                Some(retry) if attempt <= retry.max_retries => {
                    let delay = retry.retry_delay_seconds
                        * 2u64.saturating_pow(attempt.saturating_sub(1));
                    tracing::warn!(
                        step = step.name.as_str(),
                        attempt,
                        max_retries = retry.max_retries,
                        delay_seconds = delay,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "step failed, retrying"
                    );
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                    }
                    attempt += 1;
                }
                _ => break result,
            }
        };
        let duration = started.elapsed();

        self.fold_result(step, state, result, duration, attempt, on_step_complete)
            .await;
    }

    async fn fold_result(
        &self,
        step: &Step,
        state: &mut ExecutionState,
        result: StepResult,
        duration: Duration,
        attempt: u32,
        on_step_complete: Option<&StepCompletionHook>,
    ) {
        let step_id = step.id;
        let record = result.to_record();

        if result.requires_approval {
            state.waiting_approval = true;
            state.approval_step_id = Some(step_id);
            state
                .step_statuses
                .insert(step_id, StepStatus::WaitingApproval);
            state.log(format!("waiting for approval: {}", step.name));

            self.fire(
                on_step_complete,
                StepCompletion {
                    step_id,
                    status: StepStatus::WaitingApproval,
                    record,
                    duration,
                    attempt,
                },
            )
            .await;
            return;
        }

        if result.success {
            state.step_outputs.insert(step_id, result.output.clone());
            apply_output_mapping(step, &result.output, &mut state.variables);
            state.step_statuses.insert(step_id, StepStatus::Success);
            state.log(format!(
                "step completed: {} ({:.2}s)",
                step.name,
                duration.as_secs_f64()
            ));

            self.fire(
                on_step_complete,
                StepCompletion {
                    step_id,
                    status: StepStatus::Success,
                    record,
                    duration,
                    attempt,
                },
            )
            .await;
        } else {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| format!("step '{}' failed", step.name));
            state.record_failure(step_id, message);

            self.fire(
                on_step_complete,
                StepCompletion {
                    step_id,
                    status: StepStatus::Failed,
                    record,
                    duration,
                    attempt,
                },
            )
            .await;
        }
    }

    async fn fire(&self, hook: Option<&StepCompletionHook>, completion: StepCompletion) {
        if let Some(hook) = hook {
            hook(completion).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::checkpoint::InMemoryCheckpointStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use workloom_types::error::LlmError;
    use workloom_types::http::{ApiCallConfig, ApiCallOutput};
    use workloom_types::workflow::{NotificationConfig, RetryConfig, StepType};

    use crate::workflow::dispatcher::ScriptOutcome;

    /// Mock context whose script behavior is selected by a marker in the
    /// code body: `emit_n`, `square`, `incr`, `consume`, or `fail`.
    #[derive(Default)]
    struct ScriptedContext {
        script_calls: AtomicU32,
    }

    impl StepExecutionContext for ScriptedContext {
        async fn call_api(&self, _config: ApiCallConfig) -> ApiCallOutput {
            ApiCallOutput {
                data: Value::Null,
                status_code: 500,
                headers: HashMap::new(),
                status: "error".to_string(),
                error: Some("HTTP 500".to_string()),
            }
        }

        async fn run_script(
            &self,
            code: &str,
            variables: &HashMap<String, Value>,
        ) -> ScriptOutcome {
            self.script_calls.fetch_add(1, Ordering::SeqCst);
            let get = |name: &str| variables.get(name).and_then(Value::as_i64).unwrap_or(0);

            if code.contains("fail") {
                ScriptOutcome {
                    success: false,
                    output: Value::Null,
                    logs: "boom".to_string(),
                    error: Some("script exited with code 1: boom".to_string()),
                }
            } else if code.contains("emit_n") {
                ScriptOutcome {
                    success: true,
                    output: json!({"n": 2}),
                    logs: String::new(),
                    error: None,
                }
            } else if code.contains("square") {
                ScriptOutcome {
                    success: true,
                    output: json!({"m": get("n") * get("n")}),
                    logs: String::new(),
                    error: None,
                }
            } else if code.contains("incr") {
                ScriptOutcome {
                    success: true,
                    output: json!({"r": get("m") + 1}),
                    logs: String::new(),
                    error: None,
                }
            } else if code.contains("consume") {
                ScriptOutcome {
                    success: true,
                    output: json!({"seen": get("x")}),
                    logs: String::new(),
                    error: None,
                }
            } else {
                ScriptOutcome {
                    success: true,
                    output: json!({}),
                    logs: String::new(),
                    error: None,
                }
            }
        }

        async fn complete_llm(
            &self,
            _prompt: &str,
            _system_prompt: &str,
            _model: Option<&str>,
        ) -> Result<String, LlmError> {
            Ok("ok".to_string())
        }

        async fn notify(&self, _config: &NotificationConfig) -> Result<(), String> {
            Ok(())
        }
    }

    fn script_step(
        workflow_id: Uuid,
        order: i64,
        marker: &str,
        output_mapping: &[(&str, &str)],
    ) -> Step {
        Step {
            id: Uuid::now_v7(),
            workflow_id,
            order,
            name: format!("step-{order}"),
            step_type: StepType::PythonScript,
            config: json!({}),
            code: Some(marker.to_string()),
            input_mapping: HashMap::new(),
            output_mapping: output_mapping
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            retry_config: None,
            condition: None,
        }
    }

    fn approval_step(workflow_id: Uuid, order: i64) -> Step {
        Step {
            id: Uuid::now_v7(),
            workflow_id,
            order,
            name: format!("approval-{order}"),
            step_type: StepType::Approval,
            config: json!({"message": "review"}),
            code: None,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            retry_config: None,
            condition: None,
        }
    }

    fn engine() -> StateGraphEngine<ScriptedContext, InMemoryCheckpointStore> {
        StateGraphEngine::new(
            Arc::new(ScriptedContext::default()),
            Arc::new(InMemoryCheckpointStore::new()),
        )
    }

    fn fresh_state(steps: &[Step]) -> ExecutionState {
        ExecutionState::new(Uuid::now_v7(), Uuid::now_v7(), steps, HashMap::new())
    }

    // -------------------------------------------------------------------
    // Linear pipeline: n=2 -> m=n*n -> r=m+1
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_linear_three_step_numeric_pipeline() {
        let workflow_id = Uuid::now_v7();
        let steps = vec![
            script_step(workflow_id, 1, "emit_n", &[("n", "output.n")]),
            script_step(workflow_id, 2, "square", &[("m", "output.m")]),
            script_step(workflow_id, 3, "incr", &[("r", "output.r")]),
        ];

        let eng = engine();
        let cancel = CancellationToken::new();
        let state = eng
            .run(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap();

        assert_eq!(state.variables["n"], json!(2));
        assert_eq!(state.variables["m"], json!(4));
        assert_eq!(state.variables["r"], json!(5));
        assert!(state
            .step_statuses
            .values()
            .all(|s| *s == StepStatus::Success));
        assert!(!state.should_stop);
        assert_eq!(state.errors.len(), 0);
    }

    // -------------------------------------------------------------------
    // Stop on failure: downstream steps stay pending
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_failure_stops_graph_downstream_pending() {
        let workflow_id = Uuid::now_v7();
        let steps = vec![
            script_step(workflow_id, 1, "emit_n", &[]),
            script_step(workflow_id, 2, "fail", &[]),
            script_step(workflow_id, 3, "incr", &[]),
        ];

        let eng = engine();
        let cancel = CancellationToken::new();
        let state = eng
            .run(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap();

        assert_eq!(state.step_statuses[&steps[0].id], StepStatus::Success);
        assert_eq!(state.step_statuses[&steps[1].id], StepStatus::Failed);
        assert_eq!(state.step_statuses[&steps[2].id], StepStatus::Pending);
        assert!(state.should_stop);
        assert!(state.first_error().unwrap().message.contains("boom"));
        assert_eq!(state.errors.len(), 1);
    }

    // -------------------------------------------------------------------
    // Approval suspend and resume
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_approval_suspends_then_resume_completes() {
        let workflow_id = Uuid::now_v7();
        let produce = script_step(workflow_id, 1, "emit_n", &[("x", "output.n")]);
        let approval = approval_step(workflow_id, 2);
        let consume = script_step(workflow_id, 3, "consume", &[("seen", "output.seen")]);
        let consume_id = consume.id;
        let steps = vec![produce, approval.clone(), consume];

        let eng = engine();
        let cancel = CancellationToken::new();
        let state = eng
            .run(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap();

        assert!(state.waiting_approval);
        assert_eq!(state.approval_step_id, Some(approval.id));
        assert_eq!(
            state.step_statuses[&approval.id],
            StepStatus::WaitingApproval
        );
        assert_eq!(state.step_statuses[&consume_id], StepStatus::Pending);
        assert_eq!(state.variables["x"], json!(2));

        // Approve and resume.
        let resumed = eng
            .resume_after_approval(&steps, state, &cancel, None)
            .await
            .unwrap();

        assert!(!resumed.waiting_approval);
        assert_eq!(resumed.step_statuses[&approval.id], StepStatus::Success);
        assert_eq!(resumed.step_statuses[&consume_id], StepStatus::Success);
        assert_eq!(resumed.variables["seen"], json!(2));
    }

    #[tokio::test]
    async fn test_resume_without_waiting_errors() {
        let steps: Vec<Step> = vec![];
        let eng = engine();
        let cancel = CancellationToken::new();
        let err = eng
            .resume_after_approval(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotWaitingApproval));
    }

    // -------------------------------------------------------------------
    // Gate condition: falsy skips, variables unchanged
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_falsy_gate_skips_step_variables_unchanged() {
        let workflow_id = Uuid::now_v7();
        let mut gated = script_step(workflow_id, 1, "emit_n", &[("n", "output.n")]);
        gated.condition = Some("ready".to_string());
        let steps = vec![gated.clone()];

        let eng = engine();
        let cancel = CancellationToken::new();
        let mut initial = fresh_state(&steps);
        initial
            .variables
            .insert("ready".to_string(), json!(false));
        let before = initial.variables.clone();

        let state = eng.run(&steps, initial, &cancel, None).await.unwrap();
        assert_eq!(state.step_statuses[&gated.id], StepStatus::Skipped);
        assert_eq!(state.variables, before);
        // Skipped steps still get a step_outputs entry.
        assert!(state.step_outputs.contains_key(&gated.id));
    }

    // -------------------------------------------------------------------
    // Retry: bounded attempts, no graph rewind
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_retry_exhausts_then_fails() {
        let workflow_id = Uuid::now_v7();
        let mut failing = script_step(workflow_id, 1, "fail", &[]);
        failing.retry_config = Some(RetryConfig {
            max_retries: 2,
            retry_delay_seconds: 0,
        });
        let steps = vec![failing.clone()];

        let ctx = Arc::new(ScriptedContext::default());
        let eng = StateGraphEngine::new(
            Arc::clone(&ctx),
            Arc::new(InMemoryCheckpointStore::new()),
        );
        let cancel = CancellationToken::new();
        let state = eng
            .run(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap();

        // Three total attempts: the original plus two retries.
        assert_eq!(ctx.script_calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.step_statuses[&failing.id], StepStatus::Failed);
        assert_eq!(state.errors.len(), 1);
    }

    // -------------------------------------------------------------------
    // Cancellation: cooperative, nothing transitions after the flag
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_pre_cancelled_token_runs_no_steps() {
        let workflow_id = Uuid::now_v7();
        let steps = vec![
            script_step(workflow_id, 1, "emit_n", &[]),
            script_step(workflow_id, 2, "incr", &[]),
        ];

        let eng = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = eng
            .run(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap();

        assert!(state.should_stop);
        assert!(state
            .step_statuses
            .values()
            .all(|s| *s == StepStatus::Pending));
    }

    // -------------------------------------------------------------------
    // Empty workflow and checkpointing
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_empty_steps_returns_state_unchanged() {
        let steps: Vec<Step> = vec![];
        let eng = engine();
        let cancel = CancellationToken::new();
        let mut initial = fresh_state(&steps);
        initial.variables.insert("a".to_string(), json!(1));

        let state = eng.run(&steps, initial, &cancel, None).await.unwrap();
        assert_eq!(state.variables["a"], json!(1));
        assert!(!state.should_stop);
        assert!(state.step_statuses.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_after_every_node() {
        let workflow_id = Uuid::now_v7();
        let steps = vec![
            script_step(workflow_id, 1, "emit_n", &[]),
            script_step(workflow_id, 2, "incr", &[]),
        ];

        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let eng = StateGraphEngine::new(
            Arc::new(ScriptedContext::default()),
            Arc::clone(&checkpoints),
        );
        let cancel = CancellationToken::new();
        let state = eng
            .run(&steps, fresh_state(&steps), &cancel, None)
            .await
            .unwrap();

        assert_eq!(checkpoints.snapshot_count(state.execution_id), 2);
    }

    // -------------------------------------------------------------------
    // Completion hook
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_hook_fires_per_step_with_status() {
        let workflow_id = Uuid::now_v7();
        let steps = vec![
            script_step(workflow_id, 1, "emit_n", &[]),
            script_step(workflow_id, 2, "fail", &[]),
        ];

        let seen: Arc<std::sync::Mutex<Vec<(Uuid, StepStatus)>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let hook: StepCompletionHook = Arc::new(move |completion: StepCompletion| {
            let seen = Arc::clone(&seen_clone);
            Box::pin(async move {
                seen.lock()
                    .unwrap()
                    .push((completion.step_id, completion.status));
            })
        });

        let eng = engine();
        let cancel = CancellationToken::new();
        eng.run(&steps, fresh_state(&steps), &cancel, Some(&hook))
            .await
            .unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (steps[0].id, StepStatus::Success));
        assert_eq!(events[1], (steps[1].id, StepStatus::Failed));
    }
}
