use thiserror::Error;

/// Errors from repository operations (used by trait definitions in workloom-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from LLM completion calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("rate limited")]
    RateLimited,

    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("response deserialization failed: {0}")]
    Deserialization(String),
}
