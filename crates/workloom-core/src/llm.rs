//! LLM completion client trait.
//!
//! Defines the interface llm_call steps use. Implementations (the
//! OpenAI-compatible HTTP client) live in workloom-infra.

use workloom_types::error::LlmError;

/// Trait for LLM chat-completion providers.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait LlmClient: Send + Sync {
    /// Complete one prompt. `model = None` uses the provider's default.
    fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        model: Option<&str>,
    ) -> impl std::future::Future<Output = Result<String, LlmError>> + Send;

    /// The provider's default model identifier.
    fn default_model(&self) -> &str;
}
