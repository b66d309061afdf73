//! The interface the authoring and modification agents consume.
//!
//! Three operations: retrieve a rendered context window for a prompt,
//! validate a generated script body, and persist a workflow definition.
//! Persistence validates every python_script step body first and allocates
//! a new version when the workflow already exists, preserving the prior
//! definition as a version snapshot.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use workloom_types::error::RepositoryError;
use workloom_types::knowledge::DocumentCategory;
use workloom_types::workflow::{
    Folder, Step, StepType, Workflow, WorkflowDefinition, WorkflowStatus, WorkflowVersion,
};

use crate::knowledge::index::{
    Embedder, KnowledgeIndex, VectorIndex, DEFAULT_CONTEXT_TOKENS, DEFAULT_SEMANTIC_WEIGHT,
};
use crate::repository::knowledge::KnowledgeRepository;
use crate::repository::workflow::WorkflowRepository;
use crate::validator::{self, ValidationIssue, ValidationReport};

/// How many hits feed one context window.
const CONTEXT_HIT_LIMIT: usize = 8;

/// Why the agent is retrieving context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPurpose {
    /// Authoring a new workflow from a prompt.
    Create,
    /// Fixing a failed script or execution.
    Fix,
}

/// Validation findings for one step, keyed by step name.
#[derive(Debug, Clone)]
pub struct StepValidationFailure {
    pub step_name: String,
    pub issues: Vec<ValidationIssue>,
}

/// Errors from persisting a definition.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("script validation failed for {} step(s)", .0.len())]
    Validation(Vec<StepValidationFailure>),

    #[error("definition has no steps")]
    EmptyDefinition,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// The contract surface for authoring agents.
pub struct AuthoringInterface<R, Kr, V, E>
where
    R: WorkflowRepository,
    Kr: KnowledgeRepository,
    V: VectorIndex,
    E: Embedder,
{
    workflows: Arc<R>,
    knowledge: Arc<KnowledgeIndex<Kr, V, E>>,
}

impl<R, Kr, V, E> AuthoringInterface<R, Kr, V, E>
where
    R: WorkflowRepository,
    Kr: KnowledgeRepository,
    V: VectorIndex,
    E: Embedder,
{
    pub fn new(workflows: Arc<R>, knowledge: Arc<KnowledgeIndex<Kr, V, E>>) -> Self {
        Self {
            workflows,
            knowledge,
        }
    }

    /// Retrieve a rendered context window for an agent prompt.
    ///
    /// For `Fix`, error-solution documents are moved to the front so the
    /// agent sees known failure remedies before general patterns.
    pub async fn retrieve_context(
        &self,
        query: &str,
        purpose: RetrievalPurpose,
    ) -> Result<String, RepositoryError> {
        let mut hits = self
            .knowledge
            .search_metadata(query, None, CONTEXT_HIT_LIMIT, DEFAULT_SEMANTIC_WEIGHT)
            .await?;

        if purpose == RetrievalPurpose::Fix {
            hits.sort_by_key(|h| h.document.category != DocumentCategory::ErrorSolutions);
        }

        Ok(self.knowledge.build_context(&hits, DEFAULT_CONTEXT_TOKENS))
    }

    /// Validate one generated script body.
    pub fn validate_code(&self, script_body: &str) -> ValidationReport {
        validator::validate_script(script_body)
    }

    /// Persist a workflow definition.
    ///
    /// Every python_script step body is validated; any fatal issue rejects
    /// the whole definition. A name collision bumps the existing workflow's
    /// version and snapshots its prior definition first.
    pub async fn persist_workflow(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Uuid, PersistError> {
        if definition.steps.is_empty() {
            return Err(PersistError::EmptyDefinition);
        }

        let mut failures = Vec::new();
        for step in &definition.steps {
            if step.step_type == StepType::PythonScript {
                let code = step.code.as_deref().unwrap_or("");
                let report = validator::validate_script(code);
                if !report.ok {
                    failures.push(StepValidationFailure {
                        step_name: step.name.clone(),
                        issues: report.issues,
                    });
                }
            }
        }
        if !failures.is_empty() {
            return Err(PersistError::Validation(failures));
        }

        let folder_id = match &definition.folder {
            Some(name) => Some(self.resolve_folder(name).await?),
            None => None,
        };

        let existing = self
            .workflows
            .get_workflow_by_name(&definition.name)
            .await?;

        let (workflow_id, version) = match existing {
            Some(prior) => {
                // Preserve the outgoing definition before replacing it.
                let prior_steps = self.workflows.list_steps(&prior.id).await?;
                let snapshot = json!({
                    "workflow": prior,
                    "steps": prior_steps,
                });
                self.workflows
                    .create_version(&WorkflowVersion {
                        id: Uuid::now_v7(),
                        workflow_id: prior.id,
                        version: prior.version,
                        definition: snapshot,
                        created_at: Utc::now(),
                    })
                    .await?;
                (prior.id, prior.version + 1)
            }
            None => (Uuid::now_v7(), 1),
        };

        let now = Utc::now();
        let workflow = Workflow {
            id: workflow_id,
            name: definition.name.clone(),
            description: definition.description.clone(),
            version,
            status: WorkflowStatus::Active,
            tags: definition.tags.clone(),
            folder_id,
            variables: definition.variables.clone(),
            metadata: definition.metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        let steps: Vec<Step> = definition
            .steps
            .iter()
            .map(|s| Step {
                id: Uuid::now_v7(),
                workflow_id,
                order: s.order,
                name: s.name.clone(),
                step_type: s.step_type,
                config: s.config.clone(),
                code: s.code.clone(),
                input_mapping: s.input_mapping.clone(),
                output_mapping: s.output_mapping.clone(),
                retry_config: s.retry_config.clone(),
                condition: s.condition.clone(),
            })
            .collect();

        self.workflows.save_workflow(&workflow, &steps).await?;

        tracing::info!(
            workflow_id = %workflow_id,
            name = definition.name.as_str(),
            version,
            steps = steps.len(),
            "persisted workflow definition"
        );
        Ok(workflow_id)
    }

    async fn resolve_folder(&self, name: &str) -> Result<Uuid, RepositoryError> {
        if let Some(folder) = self.workflows.get_folder_by_name(name).await? {
            return Ok(folder.id);
        }
        let folder = Folder {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: None,
            created_at: Utc::now(),
        };
        self.workflows.create_folder(&folder).await?;
        Ok(folder.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::workflow::ExecutionStats;
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use workloom_types::knowledge::{Domain, KnowledgeBase, KnowledgeDocument, QueryRecord};
    use workloom_types::workflow::{
        Execution, ExecutionStatus, StepDefinition, StepExecution, StepStatus, Trigger,
        WorkflowMetadata,
    };

    // -------------------------------------------------------------------
    // Minimal in-memory workflow repository
    // -------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryRepo {
        workflows: Mutex<HashMap<Uuid, Workflow>>,
        steps: Mutex<HashMap<Uuid, Vec<Step>>>,
        versions: Mutex<Vec<WorkflowVersion>>,
        folders: Mutex<Vec<Folder>>,
    }

    impl WorkflowRepository for MemoryRepo {
        async fn save_workflow(
            &self,
            workflow: &Workflow,
            steps: &[Step],
        ) -> Result<(), RepositoryError> {
            self.workflows
                .lock()
                .unwrap()
                .insert(workflow.id, workflow.clone());
            self.steps
                .lock()
                .unwrap()
                .insert(workflow.id, steps.to_vec());
            Ok(())
        }

        async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, RepositoryError> {
            Ok(self.workflows.lock().unwrap().get(id).cloned())
        }

        async fn get_workflow_by_name(
            &self,
            name: &str,
        ) -> Result<Option<Workflow>, RepositoryError> {
            Ok(self
                .workflows
                .lock()
                .unwrap()
                .values()
                .find(|w| w.name == name)
                .cloned())
        }

        async fn list_workflows(
            &self,
            _status: Option<WorkflowStatus>,
        ) -> Result<Vec<Workflow>, RepositoryError> {
            Ok(self.workflows.lock().unwrap().values().cloned().collect())
        }

        async fn delete_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(self.workflows.lock().unwrap().remove(id).is_some())
        }

        async fn list_steps(&self, workflow_id: &Uuid) -> Result<Vec<Step>, RepositoryError> {
            Ok(self
                .steps
                .lock()
                .unwrap()
                .get(workflow_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_version(&self, v: &WorkflowVersion) -> Result<(), RepositoryError> {
            self.versions.lock().unwrap().push(v.clone());
            Ok(())
        }

        async fn list_versions(
            &self,
            workflow_id: &Uuid,
        ) -> Result<Vec<WorkflowVersion>, RepositoryError> {
            Ok(self
                .versions
                .lock()
                .unwrap()
                .iter()
                .filter(|v| v.workflow_id == *workflow_id)
                .cloned()
                .collect())
        }

        async fn create_folder(&self, folder: &Folder) -> Result<(), RepositoryError> {
            self.folders.lock().unwrap().push(folder.clone());
            Ok(())
        }

        async fn get_folder_by_name(
            &self,
            name: &str,
        ) -> Result<Option<Folder>, RepositoryError> {
            Ok(self
                .folders
                .lock()
                .unwrap()
                .iter()
                .find(|f| f.name == name)
                .cloned())
        }

        async fn list_folders(&self) -> Result<Vec<Folder>, RepositoryError> {
            Ok(self.folders.lock().unwrap().clone())
        }

        async fn create_trigger(&self, _t: &Trigger) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn list_triggers(&self, _w: &Uuid) -> Result<Vec<Trigger>, RepositoryError> {
            Ok(vec![])
        }

        async fn set_trigger_enabled(
            &self,
            _t: &Uuid,
            _enabled: bool,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn touch_trigger(
            &self,
            _t: &Uuid,
            _at: DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn create_execution(&self, _e: &Execution) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn finalize_execution(
            &self,
            _id: &Uuid,
            _status: ExecutionStatus,
            _vars: &HashMap<String, Value>,
            _error: Option<&str>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn get_execution(&self, _id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
            Ok(None)
        }

        async fn list_executions(
            &self,
            _w: Option<&Uuid>,
            _s: Option<ExecutionStatus>,
            _limit: u32,
        ) -> Result<Vec<Execution>, RepositoryError> {
            Ok(vec![])
        }

        async fn execution_stats(
            &self,
            _w: &Uuid,
        ) -> Result<ExecutionStats, RepositoryError> {
            Ok(ExecutionStats::default())
        }

        async fn delete_executions_before(
            &self,
            _cutoff: DateTime<Utc>,
        ) -> Result<u64, RepositoryError> {
            Ok(0)
        }

        async fn create_step_execution(&self, _s: &StepExecution) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn update_step_execution(
            &self,
            _id: &Uuid,
            _status: StepStatus,
            _output: Option<&Value>,
            _logs: Option<&str>,
            _error: Option<&str>,
            _attempt: u32,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn list_step_executions(
            &self,
            _e: &Uuid,
        ) -> Result<Vec<StepExecution>, RepositoryError> {
            Ok(vec![])
        }
    }

    // -------------------------------------------------------------------
    // Minimal knowledge stack (empty index is fine for persist tests)
    // -------------------------------------------------------------------

    #[derive(Default)]
    struct EmptyKnowledgeRepo;

    impl KnowledgeRepository for EmptyKnowledgeRepo {
        async fn create_knowledge_base(&self, _kb: &KnowledgeBase) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn get_knowledge_base(
            &self,
            _id: &Uuid,
        ) -> Result<Option<KnowledgeBase>, RepositoryError> {
            Ok(None)
        }
        async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>, RepositoryError> {
            Ok(vec![])
        }
        async fn insert_document(&self, _d: &KnowledgeDocument) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn update_document(&self, _d: &KnowledgeDocument) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn delete_document(&self, _id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(false)
        }
        async fn get_document(
            &self,
            _id: &Uuid,
        ) -> Result<Option<KnowledgeDocument>, RepositoryError> {
            Ok(None)
        }
        async fn get_documents(
            &self,
            _ids: &[Uuid],
        ) -> Result<Vec<KnowledgeDocument>, RepositoryError> {
            Ok(vec![])
        }
        async fn list_documents(
            &self,
            _kb: &Uuid,
        ) -> Result<Vec<KnowledgeDocument>, RepositoryError> {
            Ok(vec![])
        }
        async fn upsert_domain(&self, _d: &Domain) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_domains(&self, _active_only: bool) -> Result<Vec<Domain>, RepositoryError> {
            Ok(vec![])
        }
        async fn get_domain_by_name(&self, _n: &str) -> Result<Option<Domain>, RepositoryError> {
            Ok(None)
        }
        async fn bump_domain_document_count(
            &self,
            _id: &Uuid,
            _delta: i64,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn record_query(&self, _r: &QueryRecord) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    struct NullEmbedder;

    impl Embedder for NullEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RepositoryError> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
        fn model_name(&self) -> &str {
            "null"
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    #[derive(Default)]
    struct EmptyVectorIndex;

    impl VectorIndex for EmptyVectorIndex {
        async fn add(
            &self,
            _c: &str,
            _e: &workloom_types::knowledge::VectorEntry,
            _v: &[f32],
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn search(
            &self,
            _c: &str,
            _v: &[f32],
            _limit: usize,
        ) -> Result<Vec<crate::knowledge::index::ScoredEntry>, RepositoryError> {
            Ok(vec![])
        }
        async fn delete(&self, _c: &str, _id: &Uuid) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn list_collections(&self) -> Result<Vec<String>, RepositoryError> {
            Ok(vec![])
        }
    }

    type TestInterface =
        AuthoringInterface<MemoryRepo, EmptyKnowledgeRepo, EmptyVectorIndex, NullEmbedder>;

    fn interface() -> TestInterface {
        AuthoringInterface::new(
            Arc::new(MemoryRepo::default()),
            Arc::new(KnowledgeIndex::new(
                Arc::new(EmptyKnowledgeRepo),
                Arc::new(EmptyVectorIndex),
                Arc::new(NullEmbedder),
            )),
        )
    }

    fn script_definition(name: &str, code: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.to_string(),
            description: None,
            tags: vec![],
            folder: None,
            steps: vec![StepDefinition {
                name: "script".to_string(),
                step_type: StepType::PythonScript,
                order: 1,
                config: json!({}),
                code: Some(code.to_string()),
                input_mapping: HashMap::new(),
                output_mapping: HashMap::new(),
                retry_config: None,
                condition: None,
            }],
            variables: HashMap::new(),
            metadata: WorkflowMetadata::default(),
        }
    }

    const VALID_CODE: &str =
        "import json\nimport sys\ntry:\n    print(json.dumps({'ok': True}))\nexcept Exception:\n    sys.exit(1)\n";

    // -------------------------------------------------------------------
    // Persist
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_persist_valid_definition() {
        let iface = interface();
        let id = iface
            .persist_workflow(&script_definition("wf", VALID_CODE))
            .await
            .unwrap();

        let stored = iface.workflows.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(stored.name, "wf");
        assert_eq!(stored.version, 1);
        let steps = iface.workflows.list_steps(&id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].workflow_id, id);
    }

    #[tokio::test]
    async fn test_persist_rejects_broken_script() {
        let iface = interface();
        let err = iface
            .persist_workflow(&script_definition("wf", "x = 'unterminated\n"))
            .await
            .unwrap_err();
        match err {
            PersistError::Validation(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].step_name, "script");
                assert!(!failures[0].issues.is_empty());
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persist_rejects_empty_definition() {
        let iface = interface();
        let mut def = script_definition("wf", VALID_CODE);
        def.steps.clear();
        assert!(matches!(
            iface.persist_workflow(&def).await.unwrap_err(),
            PersistError::EmptyDefinition
        ));
    }

    #[tokio::test]
    async fn test_modification_bumps_version_and_snapshots() {
        let iface = interface();
        let first = iface
            .persist_workflow(&script_definition("wf", VALID_CODE))
            .await
            .unwrap();

        let second = iface
            .persist_workflow(&script_definition("wf", VALID_CODE))
            .await
            .unwrap();

        assert_eq!(first, second, "same name keeps the same workflow id");
        let stored = iface
            .workflows
            .get_workflow(&first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);

        let versions = iface.workflows.list_versions(&first).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert!(versions[0].definition["workflow"]["name"] == json!("wf"));
    }

    #[tokio::test]
    async fn test_folder_resolved_or_created() {
        let iface = interface();
        let mut def = script_definition("wf", VALID_CODE);
        def.folder = Some("crawlers".to_string());

        let id = iface.persist_workflow(&def).await.unwrap();
        let stored = iface.workflows.get_workflow(&id).await.unwrap().unwrap();
        assert!(stored.folder_id.is_some());

        let folders = iface.workflows.list_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "crawlers");

        // Second persist with the same folder reuses it.
        let mut def2 = script_definition("wf2", VALID_CODE);
        def2.folder = Some("crawlers".to_string());
        iface.persist_workflow(&def2).await.unwrap();
        assert_eq!(iface.workflows.list_folders().await.unwrap().len(), 1);
    }

    // -------------------------------------------------------------------
    // validate_code passthrough
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_validate_code_passthrough() {
        let iface = interface();
        assert!(iface.validate_code(VALID_CODE).ok);
        assert!(!iface.validate_code("x = 'broken\n").ok);
    }

    // -------------------------------------------------------------------
    // retrieve_context (empty index renders empty context)
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_retrieve_context_empty_index() {
        let iface = interface();
        let context = iface
            .retrieve_context("anything", RetrievalPurpose::Create)
            .await
            .unwrap();
        assert!(context.is_empty());
    }
}
