//! Step dispatcher: one entry point per step, branching on step type.
//!
//! The dispatcher projects the step's input view from the workflow variables,
//! parses the step config into its typed sum, and delegates side-effecting
//! work (REST calls, sandboxed scripts, LLM completions, notifications) to a
//! [`StepExecutionContext`] implemented by the infrastructure layer.
//!
//! Every step returns the same result shape so output mappings can address
//! any step type uniformly: `{ success, output: {...}, error?, logs? }`.

use std::collections::HashMap;

use serde_json::{json, Value};

use workloom_types::error::LlmError;
use workloom_types::http::{ApiCallConfig, ApiCallOutput, AuthConfig};
use workloom_types::workflow::{NotificationConfig, Step, StepAction};

use crate::expression::ConditionEvaluator;
use crate::template;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Result of executing one step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    /// Structured output; output mappings walk into this value.
    pub output: Value,
    pub error: Option<String>,
    /// Captured stderr or transport logs.
    pub logs: Option<String>,
    /// Set only by approval steps; the engine suspends the graph.
    pub requires_approval: bool,
}

impl StepResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            logs: None,
            requires_approval: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            logs: None,
            requires_approval: false,
        }
    }

    fn with_logs(mut self, logs: Option<String>) -> Self {
        self.logs = logs;
        self
    }

    /// The persisted record shape: `{ success, output, error?, logs? }`.
    pub fn to_record(&self) -> Value {
        let mut record = json!({
            "success": self.success,
            "output": self.output,
        });
        if let Some(error) = &self.error {
            record["error"] = json!(error);
        }
        if let Some(logs) = &self.logs {
            record["logs"] = json!(logs);
        }
        record
    }
}

/// Result of one sandboxed script run, as reported by the sandbox adapter.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub success: bool,
    /// Parsed stdout JSON, or `{"result": <raw stdout>}` when not JSON.
    pub output: Value,
    /// Captured stderr.
    pub logs: String,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution context (implemented by workloom-infra)
// ---------------------------------------------------------------------------

/// Side-effecting capabilities a step may need. The dispatcher stays pure;
/// the infrastructure layer supplies the live implementation, tests supply
/// mocks.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait StepExecutionContext: Send + Sync {
    /// Perform one REST call. Never fails across the boundary: transport
    /// errors come back inside the output with `status = "error"`.
    fn call_api(
        &self,
        config: ApiCallConfig,
    ) -> impl std::future::Future<Output = ApiCallOutput> + Send;

    /// Run a script body in the sandbox with the given variable view.
    fn run_script(
        &self,
        code: &str,
        variables: &HashMap<String, Value>,
    ) -> impl std::future::Future<Output = ScriptOutcome> + Send;

    /// Complete an LLM prompt.
    fn complete_llm(
        &self,
        prompt: &str,
        system_prompt: &str,
        model: Option<&str>,
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;

    /// Dispatch a notification (fields already formatted).
    fn notify(
        &self,
        config: &NotificationConfig,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Executes one step per step type, applying input projection up front.
pub struct StepDispatcher {
    evaluator: ConditionEvaluator,
}

impl StepDispatcher {
    pub fn new() -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Compute the per-step view `V'`: the workflow variables merged with,
    /// for each `(local, workflow)` input mapping entry, `V'[local] =
    /// variables[workflow]`. Unresolved names are tolerated and logged; the
    /// local stays absent.
    pub fn project_input(
        step: &Step,
        variables: &HashMap<String, Value>,
    ) -> HashMap<String, Value> {
        let mut view = variables.clone();
        for (local, workflow_var) in &step.input_mapping {
            match variables.get(workflow_var) {
                Some(value) => {
                    view.insert(local.clone(), value.clone());
                }
                None => tracing::warn!(
                    step = step.name.as_str(),
                    local = local.as_str(),
                    workflow_var = workflow_var.as_str(),
                    "input mapping variable not found"
                ),
            }
        }
        view
    }

    /// Execute one step against its projected variable view.
    ///
    /// Never panics or errors across this boundary; every failure mode comes
    /// back as a `StepResult` with `success = false`.
    pub async fn execute_step<C: StepExecutionContext>(
        &self,
        ctx: &C,
        step: &Step,
        variables: &HashMap<String, Value>,
    ) -> StepResult {
        let action = match StepAction::parse(step.step_type, &step.config) {
            Ok(action) => action,
            Err(e) => {
                return StepResult::failure(format!(
                    "invalid {:?} config for step '{}': {e}",
                    step.step_type, step.name
                ));
            }
        };

        match action {
            StepAction::PythonScript(_) => self.run_script(ctx, step, variables).await,
            StepAction::ApiCall(config) => self.run_api_call(ctx, config, variables).await,
            StepAction::LlmCall(config) => {
                let prompt = template::format_template(&config.prompt, variables);
                let system_prompt = config
                    .system_prompt
                    .as_deref()
                    .map(|s| template::format_template(s, variables))
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

                match ctx
                    .complete_llm(&prompt, &system_prompt, config.model.as_deref())
                    .await
                {
                    Ok(response) => StepResult::ok(json!({
                        "response": response,
                        "prompt": prompt,
                        "system_prompt": system_prompt,
                        "model": config.model,
                        "raw_response": response,
                    })),
                    Err(e) => StepResult::failure(format!("llm call failed: {e}")),
                }
            }
            StepAction::Condition(config) => {
                match self.evaluator.evaluate_bool(&config.condition, variables) {
                    Ok(met) => StepResult::ok(json!({ "condition_met": met })),
                    Err(e) => StepResult::failure(format!(
                        "condition evaluation failed for '{}': {e}",
                        config.condition
                    )),
                }
            }
            StepAction::Approval(config) => {
                let message = config
                    .message
                    .as_deref()
                    .map(|m| template::format_template(m, variables))
                    .unwrap_or_else(|| "Please review and approve to continue".to_string());
                StepResult {
                    success: true,
                    output: json!({
                        "message": message,
                        "approvers": config.approvers,
                    }),
                    error: None,
                    logs: None,
                    requires_approval: true,
                }
            }
            StepAction::Notification(config) => {
                let formatted = NotificationConfig {
                    kind: config.kind,
                    message: template::format_template(&config.message, variables),
                    subject: config
                        .subject
                        .as_deref()
                        .map(|s| template::format_template(s, variables)),
                    recipients: config.recipients.clone(),
                };

                // Failures are reported but non-fatal by default.
                match ctx.notify(&formatted).await {
                    Ok(()) => StepResult::ok(json!({
                        "notification_sent": true,
                        "message": formatted.message,
                    })),
                    Err(e) => {
                        tracing::warn!(error = e.as_str(), "notification dispatch failed");
                        StepResult::ok(json!({
                            "notification_sent": false,
                            "message": formatted.message,
                            "error": e,
                        }))
                    }
                }
            }
            StepAction::DataTransform(config) => {
                let mut output = serde_json::Map::new();
                for rule in &config.rules {
                    match self.evaluator.evaluate_value(&rule.expression, variables) {
                        Ok(value) => {
                            output.insert(rule.target.clone(), value);
                        }
                        Err(e) => {
                            return StepResult::failure(format!(
                                "transform rule '{}' failed: {e}",
                                rule.target
                            ));
                        }
                    }
                }
                StepResult::ok(Value::Object(output))
            }
        }
    }

    async fn run_script<C: StepExecutionContext>(
        &self,
        ctx: &C,
        step: &Step,
        variables: &HashMap<String, Value>,
    ) -> StepResult {
        let Some(code) = step.code.as_deref() else {
            return StepResult::failure(format!(
                "python_script step '{}' has no code body",
                step.name
            ));
        };

        let outcome = ctx.run_script(code, variables).await;
        StepResult {
            success: outcome.success,
            output: outcome.output,
            error: outcome.error,
            logs: if outcome.logs.is_empty() {
                None
            } else {
                Some(outcome.logs)
            },
            requires_approval: false,
        }
    }

    async fn run_api_call<C: StepExecutionContext>(
        &self,
        ctx: &C,
        config: ApiCallConfig,
        variables: &HashMap<String, Value>,
    ) -> StepResult {
        let formatted = format_api_config(config, variables);
        let output = ctx.call_api(formatted).await;

        let success = output.status == "success";
        let error = output.error.clone();
        let value = match serde_json::to_value(&output) {
            Ok(v) => v,
            Err(e) => return StepResult::failure(format!("api output serialization: {e}")),
        };

        StepResult {
            success,
            output: value,
            error,
            logs: None,
            requires_approval: false,
        }
    }
}

impl Default for StepDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Format every templated field of an API call config from the variable view:
/// URL, query parameter values, header values, auth parameters, and the body
/// recursively.
pub fn format_api_config(
    mut config: ApiCallConfig,
    variables: &HashMap<String, Value>,
) -> ApiCallConfig {
    config.url = template::format_template(&config.url, variables);
    config.query_params = template::format_map(&config.query_params, variables);
    config.headers = config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), template::format_template(v, variables)))
        .collect();
    config.body = config
        .body
        .as_ref()
        .map(|b| template::format_value(b, variables));
    config.auth = match config.auth {
        AuthConfig::ApiKey { key, name, location } => AuthConfig::ApiKey {
            key: template::format_template(&key, variables),
            name,
            location,
        },
        AuthConfig::Basic { username, password } => AuthConfig::Basic {
            username: template::format_template(&username, variables),
            password: template::format_template(&password, variables),
        },
        AuthConfig::Oauth { token } => AuthConfig::Oauth {
            token: template::format_template(&token, variables),
        },
        AuthConfig::Jwt { token } => AuthConfig::Jwt {
            token: template::format_template(&token, variables),
        },
        other => other,
    };
    config
}

// ---------------------------------------------------------------------------
// Output mapping
// ---------------------------------------------------------------------------

/// Walk a dotted key path into a value. Object keys and numeric array
/// indices are supported; a missing segment returns `None`.
pub fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Apply a step's output mapping onto the workflow variables.
///
/// Paths address the step result's `output` value; a leading `output`
/// segment is accepted and stripped, and an empty or bare `output` path
/// assigns the entire output. Missing paths warn and leave the target
/// variable unchanged.
pub fn apply_output_mapping(
    step: &Step,
    output: &Value,
    variables: &mut HashMap<String, Value>,
) {
    for (workflow_var, raw_path) in &step.output_mapping {
        let path = raw_path
            .strip_prefix("output.")
            .unwrap_or_else(|| {
                if raw_path == "output" {
                    ""
                } else {
                    raw_path.as_str()
                }
            });

        let resolved = if path.is_empty() {
            Some(output)
        } else {
            walk_path(output, path)
        };

        match resolved {
            Some(value) => {
                variables.insert(workflow_var.clone(), value.clone());
            }
            None => tracing::warn!(
                step = step.name.as_str(),
                path = raw_path.as_str(),
                workflow_var = workflow_var.as_str(),
                "output mapping path not found, variable left unchanged"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
