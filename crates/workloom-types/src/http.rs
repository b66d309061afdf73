//! REST call configuration and result types for api_call steps.
//!
//! `ApiCallConfig` is the full configuration surface of the generic REST
//! invoker: method, base URL (no query string -- parameters live in
//! `query_params`), auth, retry, cache, and response transform. The result
//! shape (`ApiCallOutput`) is invariant across calls so step output mappings
//! can address any of its fields uniformly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Request configuration
// ---------------------------------------------------------------------------

/// HTTP method for an api_call step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

/// Where an API key is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Authentication configuration, one variant per scheme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKey {
        key: String,
        /// Header or query parameter name the key is sent under.
        #[serde(default = "default_api_key_name")]
        name: String,
        #[serde(default, rename = "in")]
        location: ApiKeyLocation,
    },
    Basic {
        username: String,
        password: String,
    },
    Oauth {
        token: String,
    },
    Jwt {
        token: String,
    },
    Custom {
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

fn default_api_key_name() -> String {
    "Authorization".to_string()
}

/// Retry discipline for one call: attempt `k = 0..=max_retries`, waiting
/// `delay_seconds * backoff_factor^(k-1)` before attempt `k >= 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_seconds: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// HTTP status codes that trigger a retry.
    #[serde(default = "default_retry_on_status")]
    pub retry_on_status: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_retry_on_status() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_seconds: default_retry_delay(),
            backoff_factor: default_backoff_factor(),
            retry_on_status: default_retry_on_status(),
        }
    }
}

/// Response-cache policy. Caching applies to GET requests only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

/// Response transform: `extract` walks a dotted key path on the decoded body,
/// then `map` projects `{dst: walk(src_path)}` entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<HashMap<String, String>>,
}

/// Full configuration of one REST call.
///
/// Invariant: `url` is the base URL only -- it carries no query string. All
/// parameters live in `query_params` and are URL-encoded when the final
/// query string is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallConfig {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub query_params: HashMap<String, Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Call result
// ---------------------------------------------------------------------------

/// Result of one REST call. All fields live under the step result's `output`
/// key so `output_mapping` can address any of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallOutput {
    /// Transformed response body.
    pub data: Value,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    /// `"success"` or `"error"`.
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
