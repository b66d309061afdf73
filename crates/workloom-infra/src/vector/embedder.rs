//! Local embedding generation for metadata blobs and queries.
//!
//! The knowledge index embeds two kinds of text with one model: a document's
//! metadata blob at ingest time and the free-text query at search time.
//! Inference is CPU-bound ONNX (fastembed, BGESmallENV15), so it always runs
//! under `spawn_blocking`. The model itself is loaded lazily inside the
//! first embed call: constructing the embedder is cheap, and code paths that
//! never search (validation, persistence) never pay the model download.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, TextEmbedding};

use workloom_core::knowledge::index::Embedder;
use workloom_types::error::RepositoryError;

use super::schema::EMBEDDING_DIMENSION;

/// Batch size for ingest-time embedding of many metadata blobs.
pub const EMBED_BATCH_SIZE: usize = 32;

const MODEL_NAME: &str = "bge-small-en-v1.5";

/// Lazily-initialized fastembed embedder.
///
/// The `Mutex<Option<_>>` holds the model once the first embed call loads
/// it; the lock is only taken inside the blocking task, never across an
/// await point.
pub struct FastEmbedEmbedder {
    cache_dir: PathBuf,
    model: Arc<Mutex<Option<TextEmbedding>>>,
}

impl FastEmbedEmbedder {
    /// Cache model files under `{WORKLOOM_DATA_DIR}/models` (falling back to
    /// `~/.workloom/models`), next to the rest of the engine's data.
    pub fn new() -> Self {
        let data_dir = std::env::var("WORKLOOM_DATA_DIR").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{home}/.workloom")
        });
        Self::with_cache_dir(PathBuf::from(data_dir).join("models"))
    }

    /// Use a custom model cache directory. Nothing is downloaded until the
    /// first embed call.
    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            model: Arc::new(Mutex::new(None)),
        }
    }

    fn load_model(cache_dir: PathBuf) -> Result<TextEmbedding, RepositoryError> {
        TextEmbedding::try_new(
            fastembed::TextInitOptions::new(EmbeddingModel::BGESmallENV15)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false),
        )
        .map_err(|e| RepositoryError::Query(format!("failed to load embedding model: {e}")))
    }
}

impl Default for FastEmbedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for FastEmbedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RepositoryError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let texts: Vec<String> = texts.to_vec();
        let model = Arc::clone(&self.model);
        let cache_dir = self.cache_dir.clone();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().map_err(|e| {
                RepositoryError::Query(format!("embedding model lock poisoned: {e}"))
            })?;

            let model = match guard.as_mut() {
                Some(loaded) => loaded,
                None => {
                    tracing::info!(
                        model = MODEL_NAME,
                        "loading embedding model on first use"
                    );
                    guard.insert(FastEmbedEmbedder::load_model(cache_dir)?)
                }
            };

            model
                .embed(texts, Some(EMBED_BATCH_SIZE))
                .map_err(|e| RepositoryError::Query(format!("embedding failed: {e}")))
        })
        .await
        .map_err(|e| RepositoryError::Query(format!("embedding task panicked: {e}")))??;

        // The vector tables are fixed-size; a model swap that changes the
        // dimension must fail here, not on insert.
        if let Some(bad) = vectors
            .iter()
            .find(|v| v.len() != EMBEDDING_DIMENSION as usize)
        {
            return Err(RepositoryError::Query(format!(
                "model produced a {}-dim vector, schema expects {}",
                bad.len(),
                EMBEDDING_DIMENSION
            )));
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION as usize
    }
}
