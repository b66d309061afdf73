//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflows, steps, versions, folders,
//! triggers, and execution records. The infrastructure layer implements this
//! trait with SQLite persistence.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use workloom_types::error::RepositoryError;
use workloom_types::workflow::{
    Execution, ExecutionStatus, Folder, Step, StepExecution, StepStatus, Trigger, Workflow,
    WorkflowStatus, WorkflowVersion,
};

/// Per-workflow execution counts.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub waiting_approval: u64,
}

/// Repository trait for workflow persistence.
///
/// Covers four entity families:
/// - **Workflows & steps:** the persisted definition.
/// - **Versions & folders:** modification history and grouping.
/// - **Triggers:** persisted trigger configuration.
/// - **Executions & step executions:** the run audit trail.
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows & steps
    // -----------------------------------------------------------------------

    /// Upsert a workflow and replace its step set atomically.
    fn save_workflow(
        &self,
        workflow: &Workflow,
        steps: &[Step],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    fn get_workflow_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> impl Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    /// Delete a workflow; cascades to steps, executions, and versions.
    /// Returns `true` if it existed.
    fn delete_workflow(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Steps of a workflow, ordered by `order` with ties broken by id.
    fn list_steps(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<Step>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Versions & folders
    // -----------------------------------------------------------------------

    fn create_version(
        &self,
        version: &WorkflowVersion,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn list_versions(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowVersion>, RepositoryError>> + Send;

    fn create_folder(
        &self,
        folder: &Folder,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_folder_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Folder>, RepositoryError>> + Send;

    fn list_folders(&self)
        -> impl Future<Output = Result<Vec<Folder>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    fn create_trigger(
        &self,
        trigger: &Trigger,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn list_triggers(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<Trigger>, RepositoryError>> + Send;

    fn set_trigger_enabled(
        &self,
        trigger_id: &Uuid,
        enabled: bool,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn touch_trigger(
        &self,
        trigger_id: &Uuid,
        last_run_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &Execution,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Finalize an execution: status, final variables, terminal error, and
    /// (for terminal statuses) `completed_at`.
    fn finalize_execution(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        final_variables: &HashMap<String, Value>,
        error: Option<&str>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// Executions, newest first, optionally filtered by workflow and status.
    fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    fn execution_stats(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<ExecutionStats, RepositoryError>> + Send;

    /// Delete executions completed before the cutoff. Returns the count.
    fn delete_executions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step executions
    // -----------------------------------------------------------------------

    fn create_step_execution(
        &self,
        step_execution: &StepExecution,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn update_step_execution(
        &self,
        id: &Uuid,
        status: StepStatus,
        output: Option<&Value>,
        logs: Option<&str>,
        error: Option<&str>,
        attempt: u32,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Step execution records for a run, in step order.
    fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<StepExecution>, RepositoryError>> + Send;
}
