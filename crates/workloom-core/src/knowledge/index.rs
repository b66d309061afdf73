//! Metadata-only knowledge index with hybrid retrieval.
//!
//! Documents keep their canonical body in the relational store. The vector
//! index mirrors only the metadata blob (title + keywords + tags + truncated
//! summary), one entry per document, partitioned into one collection per
//! domain plus `common`. Queries blend a semantic score (cosine similarity
//! of the embedded query against the embedded metadata) with a lexical
//! keyword-overlap score, then rehydrate hits with full bodies before
//! returning. Every query is recorded for later analysis.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use workloom_types::error::RepositoryError;
use workloom_types::knowledge::{
    DocumentCategory, KnowledgeDocument, QueryRecord, SearchHit, VectorEntry,
};

use crate::repository::knowledge::KnowledgeRepository;

use super::domain::{DomainClassifier, COMMON_DOMAIN};
use super::lexical;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on the embedded metadata blob, in characters. Bodies are
/// never embedded; this cap keeps the mirror strictly metadata-sized.
pub const METADATA_BLOB_LIMIT: usize = 1_200;

/// Words taken from the head of the body for the stored summary.
const SUMMARY_WORD_LIMIT: usize = 60;

/// Keywords extracted per document.
const KEYWORD_LIMIT: usize = 10;

/// Default blend between semantic and lexical scores.
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.7;

/// Default token budget for a rendered context window.
pub const DEFAULT_CONTEXT_TOKENS: usize = 30_000;

/// Rough chars-per-token estimate used for context budgeting.
const CHARS_PER_TOKEN: usize = 4;

// ---------------------------------------------------------------------------
// Port traits (implemented by workloom-infra)
// ---------------------------------------------------------------------------

/// Trait for converting text into embedding vectors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait Embedder: Send + Sync {
    /// Embed one or more texts. Returns one vector per input.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, RepositoryError>> + Send;

    /// The model name used for embeddings.
    fn model_name(&self) -> &str;

    /// Dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}

/// One raw vector-index hit: the stored entry and its cosine distance.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: VectorEntry,
    pub distance: f32,
}

/// Per-collection vector index over metadata entries.
pub trait VectorIndex: Send + Sync {
    fn add(
        &self,
        collection: &str,
        entry: &VectorEntry,
        embedding: &[f32],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Nearest entries by cosine distance, closest first.
    fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScoredEntry>, RepositoryError>> + Send;

    /// Remove a document's entry from one collection (idempotent).
    fn delete(
        &self,
        collection: &str,
        id: &Uuid,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn list_collections(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// Metadata extraction
// ---------------------------------------------------------------------------

/// The text that gets embedded for a document: title, keywords, tags, and
/// the summary, truncated to [`METADATA_BLOB_LIMIT`] characters.
pub fn metadata_blob(
    title: &str,
    keywords: &[String],
    tags: &[String],
    summary: &str,
) -> String {
    let blob = format!(
        "{title}\nkeywords: {}\ntags: {}\n{summary}",
        keywords.join(", "),
        tags.join(", "),
    );
    blob.chars().take(METADATA_BLOB_LIMIT).collect()
}

/// First words of the body, used as the stored summary.
pub fn extract_summary(body: &str) -> String {
    body.split_whitespace()
        .take(SUMMARY_WORD_LIMIT)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Simple frequency-based keyword extraction over the body.
pub fn extract_keywords(body: &str) -> Vec<String> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in lexical::tokenize(body) {
        if token.chars().count() >= 3 {
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(KEYWORD_LIMIT)
        .map(|(token, _)| token)
        .collect()
}

fn entry_metadata_text(entry: &VectorEntry) -> String {
    metadata_blob(&entry.title, &entry.keywords, &entry.tags, &entry.summary)
}

// ---------------------------------------------------------------------------
// KnowledgeIndex
// ---------------------------------------------------------------------------

/// The retrieval service: ingest, update, delete, hybrid search, and context
/// building.
pub struct KnowledgeIndex<R, V, E>
where
    R: KnowledgeRepository,
    V: VectorIndex,
    E: Embedder,
{
    repo: Arc<R>,
    vectors: Arc<V>,
    embedder: Arc<E>,
}

impl<R, V, E> KnowledgeIndex<R, V, E>
where
    R: KnowledgeRepository,
    V: VectorIndex,
    E: Embedder,
{
    pub fn new(repo: Arc<R>, vectors: Arc<V>, embedder: Arc<E>) -> Self {
        Self {
            repo,
            vectors,
            embedder,
        }
    }

    /// Access the backing repository.
    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    async fn classifier(&self) -> Result<DomainClassifier, RepositoryError> {
        let domains = self.repo.list_domains(true).await?;
        Ok(DomainClassifier::new(domains))
    }

    // -----------------------------------------------------------------------
    // Ingest / update / delete
    // -----------------------------------------------------------------------

    /// Ingest a document: extract summary and keywords, detect the domain
    /// when none is given, store the document, and mirror the metadata blob
    /// into the detected domain's collection plus `common`.
    pub async fn ingest_document(
        &self,
        knowledge_base_id: Uuid,
        title: &str,
        body: &str,
        domain: Option<String>,
        category: DocumentCategory,
        tags: Vec<String>,
    ) -> Result<KnowledgeDocument, RepositoryError> {
        let summary = extract_summary(body);
        let keywords = extract_keywords(body);

        let domain = match domain {
            Some(d) => d,
            None => {
                let classifier = self.classifier().await?;
                let probe = format!("{title} {}", body.chars().take(500).collect::<String>());
                classifier
                    .classify(&probe)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| COMMON_DOMAIN.to_string())
            }
        };

        let now = Utc::now();
        let document = KnowledgeDocument {
            id: Uuid::now_v7(),
            knowledge_base_id,
            title: title.to_string(),
            domain: domain.clone(),
            category,
            keywords,
            tags,
            summary,
            body: body.to_string(),
            created_at: now,
            updated_at: now,
        };

        self.repo.insert_document(&document).await?;
        self.index_document(&document).await?;

        if let Some(registered) = self.repo.get_domain_by_name(&domain).await? {
            self.repo
                .bump_domain_document_count(&registered.id, 1)
                .await?;
        }

        tracing::info!(
            document_id = %document.id,
            domain = domain.as_str(),
            "ingested knowledge document"
        );
        Ok(document)
    }

    /// Replace a document: prior vector entries are deleted by id, then the
    /// document is re-indexed.
    pub async fn update_document(
        &self,
        mut document: KnowledgeDocument,
    ) -> Result<KnowledgeDocument, RepositoryError> {
        self.remove_from_all_collections(&document.id).await?;

        document.summary = extract_summary(&document.body);
        document.keywords = extract_keywords(&document.body);
        document.updated_at = Utc::now();

        self.repo.update_document(&document).await?;
        self.index_document(&document).await?;
        Ok(document)
    }

    /// Delete a document and invalidate its mirror everywhere.
    pub async fn delete_document(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let existed = self.repo.delete_document(id).await?;
        if existed {
            self.remove_from_all_collections(id).await?;
        }
        Ok(existed)
    }

    async fn index_document(
        &self,
        document: &KnowledgeDocument,
    ) -> Result<(), RepositoryError> {
        let blob = metadata_blob(
            &document.title,
            &document.keywords,
            &document.tags,
            &document.summary,
        );
        let embeddings = self.embedder.embed(std::slice::from_ref(&blob)).await?;
        let embedding = embeddings
            .first()
            .ok_or_else(|| RepositoryError::Query("embedder returned no vector".to_string()))?;

        let mut collections = vec![document.domain.clone()];
        if document.domain != COMMON_DOMAIN {
            collections.push(COMMON_DOMAIN.to_string());
        }

        for collection in collections {
            let entry = VectorEntry {
                id: document.id,
                collection: collection.clone(),
                title: document.title.clone(),
                domain: document.domain.clone(),
                keywords: document.keywords.clone(),
                tags: document.tags.clone(),
                summary: document.summary.clone(),
            };
            self.vectors.add(&collection, &entry, embedding).await?;
        }
        Ok(())
    }

    async fn remove_from_all_collections(&self, id: &Uuid) -> Result<(), RepositoryError> {
        for collection in self.vectors.list_collections().await? {
            self.vectors.delete(&collection, id).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Hybrid metadata search.
    ///
    /// Routing: an explicit `domain` searches that collection plus `common`;
    /// otherwise detected domains (plus `common`) are searched; with no
    /// detection, all collections. Hits are rehydrated with full bodies.
    pub async fn search_metadata(
        &self,
        query: &str,
        domain: Option<&str>,
        limit: usize,
        semantic_weight: f32,
    ) -> Result<Vec<SearchHit>, RepositoryError> {
        let started = std::time::Instant::now();
        let semantic_weight = semantic_weight.clamp(0.0, 1.0);

        let mut detected_domains = Vec::new();
        let collections: Vec<String> = match domain {
            Some(d) => vec![d.to_string(), COMMON_DOMAIN.to_string()],
            None => {
                let classifier = self.classifier().await?;
                detected_domains = classifier.classify(query);
                if detected_domains.is_empty() {
                    self.vectors.list_collections().await?
                } else {
                    let mut c = detected_domains.clone();
                    c.push(COMMON_DOMAIN.to_string());
                    c
                }
            }
        };
        let collections: Vec<String> = {
            let mut seen = HashSet::new();
            collections
                .into_iter()
                .filter(|c| seen.insert(c.clone()))
                .collect()
        };

        let embeddings = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?;
        let query_embedding = embeddings
            .first()
            .ok_or_else(|| RepositoryError::Query("embedder returned no vector".to_string()))?;

        // Best blended score per document across collections.
        let mut best: HashMap<Uuid, (f32, f32, f32, String)> = HashMap::new();

        for collection in &collections {
            let hits = match self
                .vectors
                .search(collection, query_embedding, limit * 2)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(collection = collection.as_str(), error = %e, "collection search failed");
                    continue;
                }
            };

            for hit in hits {
                let semantic = (1.0 - hit.distance).clamp(0.0, 1.0);
                let lexical_score =
                    lexical::overlap_score(query, &entry_metadata_text(&hit.entry));
                let final_score =
                    semantic_weight * semantic + (1.0 - semantic_weight) * lexical_score;

                let replace = best
                    .get(&hit.entry.id)
                    .is_none_or(|(existing, _, _, _)| final_score > *existing);
                if replace {
                    best.insert(
                        hit.entry.id,
                        (final_score, semantic, lexical_score, collection.clone()),
                    );
                }
            }
        }

        let mut ranked: Vec<(Uuid, (f32, f32, f32, String))> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1 .0
                .partial_cmp(&a.1 .0)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);

        // Rehydrate with full bodies from the relational store.
        let ids: Vec<Uuid> = ranked.iter().map(|(id, _)| *id).collect();
        let documents: HashMap<Uuid, KnowledgeDocument> = self
            .repo
            .get_documents(&ids)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        let hits: Vec<SearchHit> = ranked
            .into_iter()
            .filter_map(|(id, (score, semantic, lexical_score, collection))| {
                documents.get(&id).map(|document| SearchHit {
                    document: document.clone(),
                    semantic_score: semantic,
                    lexical_score,
                    score,
                    collection,
                })
            })
            .collect();

        let record = QueryRecord {
            id: Uuid::now_v7(),
            query: query.to_string(),
            detected_domains,
            hit_count: hits.len() as u32,
            latency_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.record_query(&record).await {
            tracing::warn!(error = %e, "failed to record query");
        }

        Ok(hits)
    }

    // -----------------------------------------------------------------------
    // Context building
    // -----------------------------------------------------------------------

    /// Concatenate rehydrated bodies in score order under a token budget.
    /// Each entry is prefixed with its title and domain; the final entry is
    /// truncated to fit.
    pub fn build_context(&self, hits: &[SearchHit], max_tokens: usize) -> String {
        let budget_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
        let mut out = String::new();

        for hit in hits {
            if out.len() >= budget_chars {
                break;
            }
            let header = format!("## {} [{}]\n", hit.document.title, hit.document.domain);
            let remaining = budget_chars - out.len();
            if header.len() >= remaining {
                break;
            }

            out.push_str(&header);
            let body_budget = budget_chars - out.len();
            if hit.document.body.len() > body_budget {
                let truncated: String = hit.document.body.chars().take(body_budget).collect();
                out.push_str(&truncated);
                out.push_str("\n[truncated]\n");
                break;
            }
            out.push_str(&hit.document.body);
            out.push_str("\n\n");
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
