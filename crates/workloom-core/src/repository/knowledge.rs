//! Knowledge repository trait definition.
//!
//! Storage interface for knowledge bases, documents (with their canonical
//! bodies), the registered-domain table, and the query log.

use uuid::Uuid;

use workloom_types::error::RepositoryError;
use workloom_types::knowledge::{Domain, KnowledgeBase, KnowledgeDocument, QueryRecord};

/// Repository trait for knowledge persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait KnowledgeRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Knowledge bases
    // -----------------------------------------------------------------------

    fn create_knowledge_base(
        &self,
        kb: &KnowledgeBase,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_knowledge_base(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<KnowledgeBase>, RepositoryError>> + Send;

    fn list_knowledge_bases(
        &self,
    ) -> impl Future<Output = Result<Vec<KnowledgeBase>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    fn insert_document(
        &self,
        document: &KnowledgeDocument,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn update_document(
        &self,
        document: &KnowledgeDocument,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Returns `true` if the document existed.
    fn delete_document(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_document(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<KnowledgeDocument>, RepositoryError>> + Send;

    /// Bulk rehydration for search hits; missing ids are silently absent.
    fn get_documents(
        &self,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<KnowledgeDocument>, RepositoryError>> + Send;

    fn list_documents(
        &self,
        knowledge_base_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<KnowledgeDocument>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Domains
    // -----------------------------------------------------------------------

    fn upsert_domain(
        &self,
        domain: &Domain,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn list_domains(
        &self,
        active_only: bool,
    ) -> impl Future<Output = Result<Vec<Domain>, RepositoryError>> + Send;

    fn get_domain_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Domain>, RepositoryError>> + Send;

    fn bump_domain_document_count(
        &self,
        domain_id: &Uuid,
        delta: i64,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Query log
    // -----------------------------------------------------------------------

    fn record_query(
        &self,
        record: &QueryRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}
