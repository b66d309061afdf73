//! OpenAI-compatible chat-completion client for llm_call steps.
//!
//! Sends requests to `/v1/chat/completions` with bearer authentication. The
//! API key is wrapped in [`secrecy::SecretString`] and is never logged or
//! included in `Debug` output; the struct intentionally does not derive
//! `Debug` at all.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use workloom_core::llm::LlmClient;
use workloom_types::error::LlmError;

/// Default model when neither the step nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible LLM provider.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    default_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, default_model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            base_url: "https://api.openai.com".to_string(),
            default_model,
        }
    }

    /// Read `OPENAI_API_KEY` and `WORKLOOM_LLM_MODEL` from the environment.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::AuthenticationFailed)?;
        let model =
            std::env::var("WORKLOOM_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(SecretString::from(api_key), model))
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        model: Option<&str>,
    ) -> Result<String, LlmError> {
        let model = model.unwrap_or(&self.default_model);
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationFailed,
                429 => LlmError::RateLimited,
                _ => LlmError::Provider {
                    message: format!("HTTP {status}: {error_body}"),
                },
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Deserialization("response had no content".to_string()))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_complete_parses_first_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "hello");
                Json(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "world"}}
                    ]
                }))
            }),
        );
        let base = serve(app).await;

        let client = OpenAiClient::new(SecretString::from("test-key"), "test-model".to_string())
            .with_base_url(base);
        let reply = client.complete("hello", "be brief", None).await.unwrap();
        assert_eq!(reply, "world");
    }

    #[tokio::test]
    async fn test_401_maps_to_authentication_failed() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(app).await;

        let client = OpenAiClient::new(SecretString::from("bad"), "m".to_string())
            .with_base_url(base);
        let err = client.complete("p", "s", None).await.unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn test_step_model_overrides_default() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": body["model"]}}
                    ]
                }))
            }),
        );
        let base = serve(app).await;

        let client =
            OpenAiClient::new(SecretString::from("k"), "default-model".to_string())
                .with_base_url(base);
        let reply = client.complete("p", "s", Some("override")).await.unwrap();
        assert_eq!(reply, "override");
        assert_eq!(client.default_model(), "default-model");
    }
}
