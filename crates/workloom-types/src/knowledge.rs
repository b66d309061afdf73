//! Knowledge retrieval domain types.
//!
//! Documents live in the relational store with their full body; the vector
//! index only mirrors the metadata blob (title + keywords + tags + truncated
//! summary), partitioned into one collection per domain plus `common`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a knowledge document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    WorkflowPatterns,
    ErrorSolutions,
    CodeTemplates,
    IntegrationExamples,
    BestPractices,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::WorkflowPatterns => "workflow_patterns",
            DocumentCategory::ErrorSolutions => "error_solutions",
            DocumentCategory::CodeTemplates => "code_templates",
            DocumentCategory::IntegrationExamples => "integration_examples",
            DocumentCategory::BestPractices => "best_practices",
        }
    }
}

/// A grouping of knowledge documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: DocumentCategory,
    pub created_at: DateTime<Utc>,
}

/// A knowledge document. The body is canonical text kept in the relational
/// store; it is never embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub title: String,
    /// Topical partition tag (e.g. `naver`, `weather`, `common`).
    pub domain: String,
    pub category: DocumentCategory,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub summary: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The metadata mirror stored in the vector index, one entry per document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Same as the document id.
    pub id: Uuid,
    /// Domain-partitioned collection this entry lives in.
    pub collection: String,
    pub title: String,
    pub domain: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub summary: String,
}

/// One scored retrieval hit, rehydrated with the full document body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: KnowledgeDocument,
    /// Cosine similarity of the embedded query against the embedded metadata.
    pub semantic_score: f32,
    /// Keyword-overlap score over the metadata fields.
    pub lexical_score: f32,
    /// Blended final score.
    pub score: f32,
    /// Collection the entry was found in.
    pub collection: String,
}

/// Record of one knowledge query, kept for later analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub query: String,
    #[serde(default)]
    pub detected_domains: Vec<String>,
    pub hit_count: u32,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A registered domain with its distinguishing terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub document_count: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
