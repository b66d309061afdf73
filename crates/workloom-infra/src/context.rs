//! Live step execution context wiring the dispatcher to real adapters.
//!
//! Composes the REST client, the script sandbox, an LLM provider, and a
//! notification transport into the `StepExecutionContext` the engine's
//! dispatcher consumes. Constructed once at startup and shared across
//! executions; the API client's response cache is process-wide through it.

use std::collections::HashMap;

use serde_json::Value;

use workloom_core::llm::LlmClient;
use workloom_core::workflow::dispatcher::{ScriptOutcome, StepExecutionContext};
use workloom_types::error::LlmError;
use workloom_types::http::{ApiCallConfig, ApiCallOutput};
use workloom_types::workflow::NotificationConfig;

use crate::http::ApiClient;
use crate::notify::NotificationTransport;
use crate::sandbox::ScriptSandbox;

/// Production `StepExecutionContext`.
pub struct LiveStepContext<L, N>
where
    L: LlmClient,
    N: NotificationTransport,
{
    api: ApiClient,
    sandbox: ScriptSandbox,
    llm: L,
    notifier: N,
}

impl<L, N> LiveStepContext<L, N>
where
    L: LlmClient,
    N: NotificationTransport,
{
    pub fn new(api: ApiClient, sandbox: ScriptSandbox, llm: L, notifier: N) -> Self {
        Self {
            api,
            sandbox,
            llm,
            notifier,
        }
    }
}

impl<L, N> StepExecutionContext for LiveStepContext<L, N>
where
    L: LlmClient,
    N: NotificationTransport,
{
    async fn call_api(&self, config: ApiCallConfig) -> ApiCallOutput {
        self.api.call(config).await
    }

    async fn run_script(
        &self,
        code: &str,
        variables: &HashMap<String, Value>,
    ) -> ScriptOutcome {
        self.sandbox.run(code, variables).await
    }

    async fn complete_llm(
        &self,
        prompt: &str,
        system_prompt: &str,
        model: Option<&str>,
    ) -> Result<String, LlmError> {
        self.llm.complete(prompt, system_prompt, model).await
    }

    async fn notify(&self, config: &NotificationConfig) -> Result<(), String> {
        self.notifier.send(config).await
    }
}
