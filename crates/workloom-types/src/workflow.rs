//! Workflow domain types for Workloom.
//!
//! Defines the persisted workflow shape (workflow, ordered steps, typed step
//! configurations), execution tracking records (`Execution`, `StepExecution`),
//! trigger configuration, and the on-wire `WorkflowDefinition` that authoring
//! agents emit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::http::ApiCallConfig;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Archived,
}

/// Extensible workflow metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Python packages the workflow's script steps require.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_requirements: Vec<String>,
}

/// A persisted workflow: identity, human metadata, status, and initial variables.
///
/// The ordered steps live in their own records (`Step`); deleting a workflow
/// cascades to steps, executions, and versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on first save.
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonic version counter; each modification bumps it and snapshots
    /// the prior definition into a `WorkflowVersion`.
    pub version: u32,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional folder grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Uuid>,
    /// Initial workflow variables, merged with caller input at execution start.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The kind of step in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LlmCall,
    ApiCall,
    PythonScript,
    Condition,
    Approval,
    Notification,
    DataTransform,
}

/// Retry configuration for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(default)]
    pub retry_delay_seconds: u64,
}

/// A single step in a workflow.
///
/// Steps are ordered by `order` with ties broken by `id`. Order is dense but
/// need not be contiguous. `config` is a JSON object whose schema depends on
/// `step_type`; the dispatcher parses it into a [`StepAction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub order: i64,
    pub name: String,
    pub step_type: StepType,
    /// Step-type-specific configuration payload.
    #[serde(default)]
    pub config: Value,
    /// Script body (python_script steps only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// local name -> workflow variable name (how the step sees inputs).
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    /// workflow variable name -> key path into the step's structured output.
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
    /// Optional per-step gate expression; falsy means the step is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ---------------------------------------------------------------------------
// Typed step configurations
// ---------------------------------------------------------------------------

/// Configuration for an llm_call step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Configuration for a python_script step. The script body itself lives in
/// `Step::code`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Configuration for a condition step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Expression in the restricted evaluator.
    pub condition: String,
}

/// Configuration for an approval step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub approvers: Vec<String>,
}

/// Transport for a notification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Email,
    Log,
}

/// Configuration for a notification step. Textual fields are formatted
/// through the variable formatter before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// One projection rule in a data_transform step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRule {
    /// Output variable name.
    pub target: String,
    /// Expression in the restricted evaluator.
    pub expression: String,
}

/// Configuration for a data_transform step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataTransformConfig {
    #[serde(default)]
    pub rules: Vec<TransformRule>,
}

/// A step's parsed configuration: one case per step type.
///
/// The dispatcher is a closed `match` over this sum; adding a new step type
/// is a single-site change (variant + config schema + dispatcher arm).
#[derive(Debug, Clone)]
pub enum StepAction {
    LlmCall(LlmCallConfig),
    ApiCall(ApiCallConfig),
    PythonScript(ScriptConfig),
    Condition(ConditionConfig),
    Approval(ApprovalConfig),
    Notification(NotificationConfig),
    DataTransform(DataTransformConfig),
}

impl StepAction {
    /// Parse a raw step `config` object into the typed sum for its step type.
    pub fn parse(step_type: StepType, config: &Value) -> Result<Self, serde_json::Error> {
        let config = config.clone();
        Ok(match step_type {
            StepType::LlmCall => StepAction::LlmCall(serde_json::from_value(config)?),
            StepType::ApiCall => StepAction::ApiCall(serde_json::from_value(config)?),
            StepType::PythonScript => StepAction::PythonScript(serde_json::from_value(config)?),
            StepType::Condition => StepAction::Condition(serde_json::from_value(config)?),
            StepType::Approval => StepAction::Approval(serde_json::from_value(config)?),
            StepType::Notification => StepAction::Notification(serde_json::from_value(config)?),
            StepType::DataTransform => StepAction::DataTransform(serde_json::from_value(config)?),
        })
    }
}

// ---------------------------------------------------------------------------
// On-wire workflow definition
// ---------------------------------------------------------------------------

/// One step as emitted by the authoring agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub step_type: StepType,
    pub order: i64,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// The on-wire shape a workflow definition takes between the authoring agents
/// and the persistence layer. IDs and versions are assigned on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    WaitingApproval,
    Cancelled,
}

/// Status of an individual step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    WaitingApproval,
}

/// One run of a workflow. Created by the runner at start, finalized at the
/// terminal transition, never mutated thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    /// Trigger that started this run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<Uuid>,
    #[serde(default)]
    pub input_variables: HashMap<String, Value>,
    #[serde(default)]
    pub final_variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Execution record for a single step attempt within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    /// Attempt number (1-based, increments on retry).
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Captured stderr / transport logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Versions, folders, triggers
// ---------------------------------------------------------------------------

/// Snapshot of a workflow definition preserved when a workflow is modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub version: u32,
    /// Full definition JSON at that version.
    pub definition: Value,
    pub created_at: DateTime<Utc>,
}

/// Folder grouping for workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How a workflow can be triggered. The scheduler loop that fires cron
/// triggers lives outside the core; these records are its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    Manual {},
    Cron {
        schedule: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    Webhook {
        path: String,
    },
}

/// A persisted trigger attached to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub config: TriggerConfig,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_step(step_type: StepType, config: Value) -> Step {
        Step {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            order: 1,
            name: "Test Step".to_string(),
            step_type,
            config,
            code: None,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            retry_config: None,
            condition: None,
        }
    }

    // -------------------------------------------------------------------
    // StepAction parsing per step type
    // -------------------------------------------------------------------

    #[test]
    fn test_parse_llm_call_config() {
        let step = sample_step(
            StepType::LlmCall,
            json!({"prompt": "Summarize {text}", "model": "gpt-4o-mini"}),
        );
        let action = StepAction::parse(step.step_type, &step.config).unwrap();
        match action {
            StepAction::LlmCall(cfg) => {
                assert_eq!(cfg.prompt, "Summarize {text}");
                assert_eq!(cfg.model.as_deref(), Some("gpt-4o-mini"));
                assert!(cfg.system_prompt.is_none());
            }
            other => panic!("expected LlmCall, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_condition_config() {
        let step = sample_step(StepType::Condition, json!({"condition": "count > 3"}));
        let action = StepAction::parse(step.step_type, &step.config).unwrap();
        assert!(matches!(action, StepAction::Condition(_)));
    }

    #[test]
    fn test_parse_approval_config_defaults() {
        let step = sample_step(StepType::Approval, json!({}));
        let action = StepAction::parse(step.step_type, &step.config).unwrap();
        match action {
            StepAction::Approval(cfg) => {
                assert!(cfg.message.is_none());
                assert!(cfg.approvers.is_empty());
            }
            other => panic!("expected Approval, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification_config() {
        let step = sample_step(
            StepType::Notification,
            json!({"type": "log", "message": "done: {result}"}),
        );
        let action = StepAction::parse(step.step_type, &step.config).unwrap();
        match action {
            StepAction::Notification(cfg) => {
                assert_eq!(cfg.kind, NotificationKind::Log);
                assert_eq!(cfg.message, "done: {result}");
            }
            other => panic!("expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_data_transform_config() {
        let step = sample_step(
            StepType::DataTransform,
            json!({"rules": [{"target": "total", "expression": "a + b"}]}),
        );
        let action = StepAction::parse(step.step_type, &step.config).unwrap();
        match action {
            StepAction::DataTransform(cfg) => {
                assert_eq!(cfg.rules.len(), 1);
                assert_eq!(cfg.rules[0].target, "total");
            }
            other => panic!("expected DataTransform, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_api_call_config() {
        let step = sample_step(
            StepType::ApiCall,
            json!({
                "method": "GET",
                "url": "https://api.example.test/v1/items",
                "query_params": {"q": "{term}"},
                "auth": {"type": "none"}
            }),
        );
        let action = StepAction::parse(step.step_type, &step.config).unwrap();
        assert!(matches!(action, StepAction::ApiCall(_)));
    }

    #[test]
    fn test_parse_invalid_config_errors() {
        // Condition config without the condition field
        let step = sample_step(StepType::Condition, json!({}));
        assert!(StepAction::parse(step.step_type, &step.config).is_err());
    }

    // -------------------------------------------------------------------
    // Wire definition roundtrip
    // -------------------------------------------------------------------

    #[test]
    fn test_workflow_definition_json_roundtrip() {
        let def = WorkflowDefinition {
            name: "news-digest".to_string(),
            description: Some("Fetch, summarize, notify".to_string()),
            tags: vec!["news".to_string()],
            folder: None,
            steps: vec![StepDefinition {
                name: "Fetch".to_string(),
                step_type: StepType::ApiCall,
                order: 1,
                config: json!({"method": "GET", "url": "https://example.test/api", "auth": {"type": "none"}}),
                code: None,
                input_mapping: HashMap::new(),
                output_mapping: HashMap::from([(
                    "items".to_string(),
                    "output.data".to_string(),
                )]),
                retry_config: Some(RetryConfig {
                    max_retries: 2,
                    retry_delay_seconds: 1,
                }),
                condition: None,
            }],
            variables: HashMap::from([("term".to_string(), json!("rust"))]),
            metadata: WorkflowMetadata {
                python_requirements: vec!["requests".to_string()],
            },
        };

        let text = serde_json::to_string_pretty(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.name, "news-digest");
        assert_eq!(parsed.steps.len(), 1);
        assert_eq!(parsed.steps[0].step_type, StepType::ApiCall);
        assert_eq!(
            parsed.steps[0].output_mapping.get("items").map(String::as_str),
            Some("output.data")
        );
        assert_eq!(parsed.variables["term"], json!("rust"));
    }

    #[test]
    fn test_step_type_serde_names() {
        for (ty, name) in [
            (StepType::LlmCall, "\"llm_call\""),
            (StepType::ApiCall, "\"api_call\""),
            (StepType::PythonScript, "\"python_script\""),
            (StepType::Condition, "\"condition\""),
            (StepType::Approval, "\"approval\""),
            (StepType::Notification, "\"notification\""),
            (StepType::DataTransform, "\"data_transform\""),
        ] {
            assert_eq!(serde_json::to_string(&ty).unwrap(), name);
        }
    }

    // -------------------------------------------------------------------
    // Status enums
    // -------------------------------------------------------------------

    #[test]
    fn test_execution_status_serde() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::WaitingApproval,
            ExecutionStatus::Cancelled,
        ] {
            let text = serde_json::to_string(&status).unwrap();
            let parsed: ExecutionStatus = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_step_status_serde() {
        for status in [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Success,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::WaitingApproval,
        ] {
            let text = serde_json::to_string(&status).unwrap();
            let parsed: StepStatus = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_waiting_approval_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::WaitingApproval).unwrap(),
            "\"waiting_approval\""
        );
    }

    // -------------------------------------------------------------------
    // Trigger config variants
    // -------------------------------------------------------------------

    #[test]
    fn test_trigger_config_cron_serde() {
        let trigger = TriggerConfig::Cron {
            schedule: "0 9 * * *".to_string(),
            timezone: Some("Asia/Seoul".to_string()),
        };
        let text = serde_json::to_string(&trigger).unwrap();
        assert!(text.contains("\"type\":\"cron\""));
        let parsed: TriggerConfig = serde_json::from_str(&text).unwrap();
        assert!(matches!(parsed, TriggerConfig::Cron { .. }));
    }

    #[test]
    fn test_trigger_config_manual_serde() {
        let text = serde_json::to_string(&TriggerConfig::Manual {}).unwrap();
        assert!(text.contains("\"type\":\"manual\""));
    }

    #[test]
    fn test_execution_record_roundtrip() {
        let run = Execution {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            status: ExecutionStatus::Running,
            trigger_id: None,
            input_variables: HashMap::from([("n".to_string(), json!(1))]),
            final_variables: HashMap::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        let text = serde_json::to_string(&run).unwrap();
        let parsed: Execution = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.status, ExecutionStatus::Running);
        assert_eq!(parsed.input_variables["n"], json!(1));
    }
}
