//! Process-environment configuration.
//!
//! The engine reads credentials and defaults from the environment: the LLM
//! API key, SMTP credentials for the email transport, the vector store path,
//! and the database location. No CLI surface is defined here.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::sandbox::DEFAULT_SCRIPT_TIMEOUT_SECS;

/// SMTP credentials for the (externally wired) email transport.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Everything the engine reads from the process environment.
#[derive(Clone)]
pub struct Settings {
    /// `WORKLOOM_DATABASE_URL`, defaulting to the data-dir SQLite file.
    pub database_url: String,
    /// `WORKLOOM_VECTOR_PATH`, defaulting to `{data_dir}/vectors`.
    pub vector_store_path: PathBuf,
    /// `OPENAI_API_KEY`, if set.
    pub llm_api_key: Option<SecretString>,
    /// `WORKLOOM_LLM_MODEL`.
    pub llm_model: String,
    /// `SMTP_HOST`/`SMTP_PORT`/`SMTP_USERNAME`/`SMTP_PASSWORD`, if complete.
    pub smtp: Option<SmtpSettings>,
    /// `WORKLOOM_STEP_TIMEOUT` (seconds) for sandboxed scripts.
    pub step_timeout_seconds: u64,
}

fn data_dir() -> String {
    std::env::var("WORKLOOM_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.workloom")
    })
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let data_dir = data_dir();

        let database_url = std::env::var("WORKLOOM_DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{data_dir}/workloom.db"));

        let vector_store_path = std::env::var("WORKLOOM_VECTOR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(format!("{data_dir}/vectors")));

        let llm_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .map(SecretString::from);

        let llm_model = std::env::var("WORKLOOM_LLM_MODEL")
            .unwrap_or_else(|_| crate::llm::openai::DEFAULT_MODEL.to_string());

        let smtp = match (
            std::env::var("SMTP_HOST"),
            std::env::var("SMTP_USERNAME"),
            std::env::var("SMTP_PASSWORD"),
        ) {
            (Ok(host), Ok(username), Ok(password)) => Some(SmtpSettings {
                host,
                port: std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(587),
                username,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        let step_timeout_seconds = std::env::var("WORKLOOM_STEP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SCRIPT_TIMEOUT_SECS);

        Self {
            database_url,
            vector_store_path,
            llm_api_key,
            llm_model,
            smtp,
            step_timeout_seconds,
        }
    }
}
