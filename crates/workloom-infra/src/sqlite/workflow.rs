//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `workloom-core` using sqlx with split
//! read/write pools. Steps are separate rows keyed by workflow; JSON-shaped
//! columns (tags, variables, mappings, configs) are stored as TEXT. Deleting
//! a workflow cascades to steps, executions, and versions through the
//! schema's foreign keys.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use workloom_core::repository::workflow::{ExecutionStats, WorkflowRepository};
use workloom_types::error::RepositoryError;
use workloom_types::workflow::{
    Execution, ExecutionStatus, Folder, Step, StepExecution, StepStatus, Trigger, Workflow,
    WorkflowStatus, WorkflowVersion,
};

use super::pool::DatabasePool;
use super::{enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn json_column<T: serde::de::DeserializeOwned>(
    text: &str,
    what: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(text)
        .map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn json_text<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn workflow_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let tags: String = row.try_get("tags").map_err(query_err)?;
    let variables: String = row.try_get("variables").map_err(query_err)?;
    let metadata: String = row.try_get("metadata").map_err(query_err)?;
    let folder_id: Option<String> = row.try_get("folder_id").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_err)?;

    Ok(Workflow {
        id: parse_uuid(&id)?,
        name: row.try_get("name").map_err(query_err)?,
        description: row.try_get("description").map_err(query_err)?,
        version: row.try_get::<i64, _>("version").map_err(query_err)? as u32,
        status: enum_from_str::<WorkflowStatus>(&status)?,
        tags: json_column(&tags, "tags")?,
        folder_id: folder_id.as_deref().map(parse_uuid).transpose()?,
        variables: json_column(&variables, "variables")?,
        metadata: json_column(&metadata, "metadata")?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn step_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Step, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_err)?;
    let step_type: String = row.try_get("step_type").map_err(query_err)?;
    let config: String = row.try_get("config").map_err(query_err)?;
    let input_mapping: String = row.try_get("input_mapping").map_err(query_err)?;
    let output_mapping: String = row.try_get("output_mapping").map_err(query_err)?;
    let retry_config: Option<String> = row.try_get("retry_config").map_err(query_err)?;

    Ok(Step {
        id: parse_uuid(&id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        order: row.try_get("step_order").map_err(query_err)?,
        name: row.try_get("name").map_err(query_err)?,
        step_type: enum_from_str(&step_type)?,
        config: json_column(&config, "step config")?,
        code: row.try_get("code").map_err(query_err)?,
        input_mapping: json_column(&input_mapping, "input_mapping")?,
        output_mapping: json_column(&output_mapping, "output_mapping")?,
        retry_config: retry_config
            .as_deref()
            .map(|s| json_column(s, "retry_config"))
            .transpose()?,
        condition: row.try_get("condition_expr").map_err(query_err)?,
    })
}

fn execution_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let trigger_id: Option<String> = row.try_get("trigger_id").map_err(query_err)?;
    let input_variables: String = row.try_get("input_variables").map_err(query_err)?;
    let final_variables: String = row.try_get("final_variables").map_err(query_err)?;
    let started_at: String = row.try_get("started_at").map_err(query_err)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_err)?;

    Ok(Execution {
        id: parse_uuid(&id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        status: enum_from_str::<ExecutionStatus>(&status)?,
        trigger_id: trigger_id.as_deref().map(parse_uuid).transpose()?,
        input_variables: json_column(&input_variables, "input_variables")?,
        final_variables: json_column(&final_variables, "final_variables")?,
        error: row.try_get("error").map_err(query_err)?,
        started_at: parse_datetime(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
    })
}

fn step_execution_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<StepExecution, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let execution_id: String = row.try_get("execution_id").map_err(query_err)?;
    let step_id: String = row.try_get("step_id").map_err(query_err)?;
    let status: String = row.try_get("status").map_err(query_err)?;
    let output: Option<String> = row.try_get("output").map_err(query_err)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(query_err)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(query_err)?;

    Ok(StepExecution {
        id: parse_uuid(&id)?,
        execution_id: parse_uuid(&execution_id)?,
        step_id: parse_uuid(&step_id)?,
        status: enum_from_str::<StepStatus>(&status)?,
        attempt: row.try_get::<i64, _>("attempt").map_err(query_err)? as u32,
        output: output
            .as_deref()
            .map(|s| json_column(s, "step output"))
            .transpose()?,
        logs: row.try_get("logs").map_err(query_err)?,
        error: row.try_get("error").map_err(query_err)?,
        started_at: started_at.as_deref().map(parse_datetime).transpose()?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
    })
}

fn trigger_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Trigger, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let workflow_id: String = row.try_get("workflow_id").map_err(query_err)?;
    let config: String = row.try_get("config").map_err(query_err)?;
    let last_run_at: Option<String> = row.try_get("last_run_at").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;

    Ok(Trigger {
        id: parse_uuid(&id)?,
        workflow_id: parse_uuid(&workflow_id)?,
        config: json_column(&config, "trigger config")?,
        enabled: row.try_get::<i64, _>("enabled").map_err(query_err)? != 0,
        last_run_at: last_run_at.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(
        &self,
        workflow: &Workflow,
        steps: &[Step],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO workflows
               (id, name, description, version, status, tags, folder_id, variables, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 version = excluded.version,
                 status = excluded.status,
                 tags = excluded.tags,
                 folder_id = excluded.folder_id,
                 variables = excluded.variables,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.version as i64)
        .bind(enum_to_str(&workflow.status)?)
        .bind(json_text(&workflow.tags)?)
        .bind(workflow.folder_id.map(|id| id.to_string()))
        .bind(json_text(&workflow.variables)?)
        .bind(json_text(&workflow.metadata)?)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        // Replace the step set wholesale.
        sqlx::query("DELETE FROM steps WHERE workflow_id = ?")
            .bind(workflow.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        for step in steps {
            sqlx::query(
                r#"INSERT INTO steps
                   (id, workflow_id, step_order, name, step_type, config, code,
                    input_mapping, output_mapping, retry_config, condition_expr)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(step.id.to_string())
            .bind(step.workflow_id.to_string())
            .bind(step.order)
            .bind(&step.name)
            .bind(enum_to_str(&step.step_type)?)
            .bind(json_text(&step.config)?)
            .bind(&step.code)
            .bind(json_text(&step.input_mapping)?)
            .bind(json_text(&step.output_mapping)?)
            .bind(
                step.retry_config
                    .as_ref()
                    .map(json_text)
                    .transpose()?,
            )
            .bind(&step.condition)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn get_workflow_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM workflows WHERE status = ? ORDER BY name ASC")
                    .bind(enum_to_str(&s)?)
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM workflows ORDER BY name ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;

        rows.iter().map(workflow_from_row).collect()
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_steps(&self, workflow_id: &Uuid) -> Result<Vec<Step>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM steps WHERE workflow_id = ? ORDER BY step_order ASC, id ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(step_from_row).collect()
    }

    async fn create_version(&self, version: &WorkflowVersion) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO versions (id, workflow_id, version, definition, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(version.id.to_string())
        .bind(version.workflow_id.to_string())
        .bind(version.version as i64)
        .bind(json_text(&version.definition)?)
        .bind(format_datetime(&version.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn list_versions(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowVersion>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM versions WHERE workflow_id = ? ORDER BY version DESC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_err)?;
                let workflow_id: String = row.try_get("workflow_id").map_err(query_err)?;
                let definition: String = row.try_get("definition").map_err(query_err)?;
                let created_at: String = row.try_get("created_at").map_err(query_err)?;
                Ok(WorkflowVersion {
                    id: parse_uuid(&id)?,
                    workflow_id: parse_uuid(&workflow_id)?,
                    version: row.try_get::<i64, _>("version").map_err(query_err)? as u32,
                    definition: json_column(&definition, "version definition")?,
                    created_at: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }

    async fn create_folder(&self, folder: &Folder) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO folders (id, name, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(folder.id.to_string())
        .bind(&folder.name)
        .bind(&folder.description)
        .bind(format_datetime(&folder.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_folder_by_name(&self, name: &str) -> Result<Option<Folder>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM folders WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            let id: String = row.try_get("id").map_err(query_err)?;
            let created_at: String = row.try_get("created_at").map_err(query_err)?;
            Ok(Folder {
                id: parse_uuid(&id)?,
                name: row.try_get("name").map_err(query_err)?,
                description: row.try_get("description").map_err(query_err)?,
                created_at: parse_datetime(&created_at)?,
            })
        })
        .transpose()
    }

    async fn list_folders(&self) -> Result<Vec<Folder>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM folders ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_err)?;
                let created_at: String = row.try_get("created_at").map_err(query_err)?;
                Ok(Folder {
                    id: parse_uuid(&id)?,
                    name: row.try_get("name").map_err(query_err)?,
                    description: row.try_get("description").map_err(query_err)?,
                    created_at: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }

    async fn create_trigger(&self, trigger: &Trigger) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO triggers (id, workflow_id, config, enabled, last_run_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(trigger.id.to_string())
        .bind(trigger.workflow_id.to_string())
        .bind(json_text(&trigger.config)?)
        .bind(trigger.enabled as i64)
        .bind(trigger.last_run_at.as_ref().map(format_datetime))
        .bind(format_datetime(&trigger.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn list_triggers(&self, workflow_id: &Uuid) -> Result<Vec<Trigger>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM triggers WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(trigger_from_row).collect()
    }

    async fn set_trigger_enabled(
        &self,
        trigger_id: &Uuid,
        enabled: bool,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE triggers SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(trigger_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_trigger(
        &self,
        trigger_id: &Uuid,
        last_run_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE triggers SET last_run_at = ? WHERE id = ?")
            .bind(format_datetime(&last_run_at))
            .bind(trigger_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_id, status, trigger_id, input_variables, final_variables, error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(enum_to_str(&execution.status)?)
        .bind(execution.trigger_id.map(|id| id.to_string()))
        .bind(json_text(&execution.input_variables)?)
        .bind(json_text(&execution.final_variables)?)
        .bind(&execution.error)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn finalize_execution(
        &self,
        execution_id: &Uuid,
        status: ExecutionStatus,
        final_variables: &HashMap<String, Value>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let is_terminal = matches!(
            status,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        );
        let completed_at = is_terminal.then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            "UPDATE executions SET status = ?, final_variables = ?, error = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(enum_to_str(&status)?)
        .bind(json_text(final_variables)?)
        .bind(error)
        .bind(&completed_at)
        .bind(execution_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut sql = String::from("SELECT * FROM executions WHERE 1=1");
        if workflow_id.is_some() {
            sql.push_str(" AND workflow_id = ?");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY started_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(id) = workflow_id {
            query = query.bind(id.to_string());
        }
        if let Some(s) = status {
            query = query.bind(enum_to_str(&s)?);
        }
        query = query.bind(limit as i64);

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn execution_stats(
        &self,
        workflow_id: &Uuid,
    ) -> Result<ExecutionStats, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM executions WHERE workflow_id = ? GROUP BY status",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut stats = ExecutionStats::default();
        for row in &rows {
            let status: String = row.try_get("status").map_err(query_err)?;
            let n: i64 = row.try_get("n").map_err(query_err)?;
            let n = n as u64;
            stats.total += n;
            match status.as_str() {
                "success" => stats.succeeded += n,
                "failed" => stats.failed += n,
                "cancelled" => stats.cancelled += n,
                "waiting_approval" => stats.waiting_approval += n,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn delete_executions_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM executions WHERE completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected())
    }

    async fn create_step_execution(
        &self,
        step_execution: &StepExecution,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO step_executions
               (id, execution_id, step_id, status, attempt, output, logs, error, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step_execution.id.to_string())
        .bind(step_execution.execution_id.to_string())
        .bind(step_execution.step_id.to_string())
        .bind(enum_to_str(&step_execution.status)?)
        .bind(step_execution.attempt as i64)
        .bind(
            step_execution
                .output
                .as_ref()
                .map(json_text)
                .transpose()?,
        )
        .bind(&step_execution.logs)
        .bind(&step_execution.error)
        .bind(step_execution.started_at.as_ref().map(format_datetime))
        .bind(step_execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn update_step_execution(
        &self,
        id: &Uuid,
        status: StepStatus,
        output: Option<&Value>,
        logs: Option<&str>,
        error: Option<&str>,
        attempt: u32,
    ) -> Result<(), RepositoryError> {
        let is_terminal = matches!(
            status,
            StepStatus::Success
                | StepStatus::Failed
                | StepStatus::Skipped
                | StepStatus::WaitingApproval
        );
        let completed_at = is_terminal.then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            r#"UPDATE step_executions
               SET status = ?, attempt = ?,
                   output = COALESCE(?, output),
                   logs = COALESCE(?, logs),
                   error = COALESCE(?, error),
                   completed_at = COALESCE(?, completed_at)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(attempt as i64)
        .bind(output.map(json_text).transpose()?)
        .bind(logs)
        .bind(error)
        .bind(&completed_at)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT se.* FROM step_executions se
               LEFT JOIN steps s ON s.id = se.step_id
               WHERE se.execution_id = ?
               ORDER BY s.step_order ASC, se.id ASC"#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(step_execution_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workloom_types::workflow::{
        RetryConfig, StepType, TriggerConfig, WorkflowMetadata,
    };

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_workflow() -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            name: "news-digest".to_string(),
            description: Some("Fetch and summarize".to_string()),
            version: 1,
            status: WorkflowStatus::Active,
            tags: vec!["news".to_string()],
            folder_id: None,
            variables: HashMap::from([("term".to_string(), json!("rust"))]),
            metadata: WorkflowMetadata::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_steps(workflow_id: Uuid) -> Vec<Step> {
        vec![
            Step {
                id: Uuid::now_v7(),
                workflow_id,
                order: 2,
                name: "Summarize".to_string(),
                step_type: StepType::LlmCall,
                config: json!({"prompt": "Summarize {items}"}),
                code: None,
                input_mapping: HashMap::new(),
                output_mapping: HashMap::new(),
                retry_config: None,
                condition: Some("items|len > 0".to_string()),
            },
            Step {
                id: Uuid::now_v7(),
                workflow_id,
                order: 1,
                name: "Fetch".to_string(),
                step_type: StepType::ApiCall,
                config: json!({"method": "GET", "url": "https://example.test/api", "auth": {"type": "none"}}),
                code: None,
                input_mapping: HashMap::from([("q".to_string(), "term".to_string())]),
                output_mapping: HashMap::from([("items".to_string(), "output.data".to_string())]),
                retry_config: Some(RetryConfig {
                    max_retries: 2,
                    retry_delay_seconds: 1,
                }),
                condition: None,
            },
        ]
    }

    fn sample_execution(workflow_id: Uuid) -> Execution {
        Execution {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Running,
            trigger_id: None,
            input_variables: HashMap::from([("term".to_string(), json!("rust"))]),
            final_variables: HashMap::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    // -- Workflows & steps --

    #[tokio::test]
    async fn test_save_and_get_workflow_with_steps() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        let steps = sample_steps(wf.id);

        repo.save_workflow(&wf, &steps).await.unwrap();

        let loaded = repo.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "news-digest");
        assert_eq!(loaded.variables["term"], json!("rust"));

        let loaded_steps = repo.list_steps(&wf.id).await.unwrap();
        assert_eq!(loaded_steps.len(), 2);
        // Ordered by step_order, not insertion order.
        assert_eq!(loaded_steps[0].name, "Fetch");
        assert_eq!(loaded_steps[1].name, "Summarize");
        assert_eq!(
            loaded_steps[0].retry_config.as_ref().unwrap().max_retries,
            2
        );
        assert_eq!(
            loaded_steps[1].condition.as_deref(),
            Some("items|len > 0")
        );
    }

    #[tokio::test]
    async fn test_save_workflow_replaces_steps() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &sample_steps(wf.id)).await.unwrap();

        let one_step = vec![sample_steps(wf.id).remove(0)];
        repo.save_workflow(&wf, &one_step).await.unwrap();

        let loaded = repo.list_steps(&wf.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_get_workflow_by_name() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();

        let loaded = repo
            .get_workflow_by_name("news-digest")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, wf.id);
        assert!(repo.get_workflow_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_workflows_by_status() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let mut active = sample_workflow();
        active.name = "active-wf".to_string();
        let mut draft = sample_workflow();
        draft.id = Uuid::now_v7();
        draft.name = "draft-wf".to_string();
        draft.status = WorkflowStatus::Draft;

        repo.save_workflow(&active, &[]).await.unwrap();
        repo.save_workflow(&draft, &[]).await.unwrap();

        let drafts = repo
            .list_workflows(Some(WorkflowStatus::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "draft-wf");
        assert_eq!(repo.list_workflows(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_workflow_cascades() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        let steps = sample_steps(wf.id);
        repo.save_workflow(&wf, &steps).await.unwrap();

        let execution = sample_execution(wf.id);
        repo.create_execution(&execution).await.unwrap();

        assert!(repo.delete_workflow(&wf.id).await.unwrap());
        assert!(repo.get_workflow(&wf.id).await.unwrap().is_none());
        assert!(repo.list_steps(&wf.id).await.unwrap().is_empty());
        assert!(repo.get_execution(&execution.id).await.unwrap().is_none());
    }

    // -- Versions, folders, triggers --

    #[tokio::test]
    async fn test_versions_roundtrip() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();

        repo.create_version(&WorkflowVersion {
            id: Uuid::now_v7(),
            workflow_id: wf.id,
            version: 1,
            definition: json!({"workflow": {"name": "news-digest"}}),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let versions = repo.list_versions(&wf.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].definition["workflow"]["name"], "news-digest");
    }

    #[tokio::test]
    async fn test_folders_roundtrip() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let folder = Folder {
            id: Uuid::now_v7(),
            name: "crawlers".to_string(),
            description: None,
            created_at: Utc::now(),
        };
        repo.create_folder(&folder).await.unwrap();

        let loaded = repo.get_folder_by_name("crawlers").await.unwrap().unwrap();
        assert_eq!(loaded.id, folder.id);
        assert_eq!(repo.list_folders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_triggers_roundtrip() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();

        let trigger = Trigger {
            id: Uuid::now_v7(),
            workflow_id: wf.id,
            config: TriggerConfig::Cron {
                schedule: "0 9 * * *".to_string(),
                timezone: None,
            },
            enabled: true,
            last_run_at: None,
            created_at: Utc::now(),
        };
        repo.create_trigger(&trigger).await.unwrap();

        let loaded = repo.list_triggers(&wf.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(matches!(loaded[0].config, TriggerConfig::Cron { .. }));

        repo.set_trigger_enabled(&trigger.id, false).await.unwrap();
        repo.touch_trigger(&trigger.id, Utc::now()).await.unwrap();
        let loaded = repo.list_triggers(&wf.id).await.unwrap();
        assert!(!loaded[0].enabled);
        assert!(loaded[0].last_run_at.is_some());
    }

    // -- Executions --

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();

        let execution = sample_execution(wf.id);
        repo.create_execution(&execution).await.unwrap();

        let finals = HashMap::from([("r".to_string(), json!(5))]);
        repo.finalize_execution(&execution.id, ExecutionStatus::Success, &finals, None)
            .await
            .unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Success);
        assert_eq!(loaded.final_variables["r"], json!(5));
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_waiting_approval_not_terminal() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();
        let execution = sample_execution(wf.id);
        repo.create_execution(&execution).await.unwrap();

        repo.finalize_execution(
            &execution.id,
            ExecutionStatus::WaitingApproval,
            &HashMap::new(),
            None,
        )
        .await
        .unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::WaitingApproval);
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_list_executions_filters() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();

        for _ in 0..3 {
            repo.create_execution(&sample_execution(wf.id)).await.unwrap();
        }
        let failed = sample_execution(wf.id);
        repo.create_execution(&failed).await.unwrap();
        repo.finalize_execution(
            &failed.id,
            ExecutionStatus::Failed,
            &HashMap::new(),
            Some("boom"),
        )
        .await
        .unwrap();

        let all = repo.list_executions(Some(&wf.id), None, 10).await.unwrap();
        assert_eq!(all.len(), 4);

        let only_failed = repo
            .list_executions(Some(&wf.id), Some(ExecutionStatus::Failed), 10)
            .await
            .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].error.as_deref(), Some("boom"));

        let stats = repo.execution_stats(&wf.id).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_delete_old_executions() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        repo.save_workflow(&wf, &[]).await.unwrap();

        let execution = sample_execution(wf.id);
        repo.create_execution(&execution).await.unwrap();
        repo.finalize_execution(
            &execution.id,
            ExecutionStatus::Success,
            &HashMap::new(),
            None,
        )
        .await
        .unwrap();

        // Cutoff in the future removes the completed run.
        let deleted = repo
            .delete_executions_before(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    // -- Step executions --

    #[tokio::test]
    async fn test_step_execution_upsert() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let wf = sample_workflow();
        let steps = sample_steps(wf.id);
        repo.save_workflow(&wf, &steps).await.unwrap();
        let execution = sample_execution(wf.id);
        repo.create_execution(&execution).await.unwrap();

        let row = StepExecution {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            step_id: steps[1].id, // "Fetch" (order 1)
            status: StepStatus::Pending,
            attempt: 0,
            output: None,
            logs: None,
            error: None,
            started_at: None,
            completed_at: None,
        };
        repo.create_step_execution(&row).await.unwrap();

        repo.update_step_execution(
            &row.id,
            StepStatus::Success,
            Some(&json!({"data": [1, 2]})),
            Some("fetched ok"),
            None,
            1,
        )
        .await
        .unwrap();

        let rows = repo.list_step_executions(&execution.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, StepStatus::Success);
        assert_eq!(rows[0].attempt, 1);
        assert_eq!(rows[0].output.as_ref().unwrap()["data"], json!([1, 2]));
        assert_eq!(rows[0].logs.as_deref(), Some("fetched ok"));
        assert!(rows[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_step_execution_not_found() {
        let repo = SqliteWorkflowRepository::new(test_pool().await);
        let err = repo
            .update_step_execution(&Uuid::now_v7(), StepStatus::Success, None, None, None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
