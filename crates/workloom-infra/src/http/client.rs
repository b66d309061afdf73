//! Generic REST invoker with auth, retry, cache, and response transform.
//!
//! One entry point: [`ApiClient::call`] takes a fully-formatted
//! `ApiCallConfig` (templates already substituted by the dispatcher) and
//! returns an [`ApiCallOutput`]. It never fails across the boundary;
//! transport and HTTP errors come back inside the output with
//! `status = "error"`.
//!
//! Browser-class default headers (User-Agent, Accept, Accept-Language,
//! Cache-Control, and a Referer derived from the target origin) are injected
//! under every caller-provided header set to get past trivial WAF rules on
//! public data APIs.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use workloom_types::http::{
    ApiCallConfig, ApiCallOutput, ApiKeyLocation, AuthConfig, HttpMethod, ResponseTransform,
    RetryPolicy,
};

use super::cache::ResponseCache;

/// Default per-call HTTP timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Generic REST API client with a process-wide response cache.
pub struct ApiClient {
    client: reqwest::Client,
    cache: ResponseCache,
}

impl ApiClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            cache: ResponseCache::new(),
        }
    }

    /// Perform one REST call.
    pub async fn call(&self, config: ApiCallConfig) -> ApiCallOutput {
        let url = match reqwest::Url::parse(&config.url) {
            Ok(url) => url,
            Err(e) => return error_output(0, format!("invalid URL '{}': {e}", config.url)),
        };
        // The base URL must not embed a query string; parameters belong in
        // query_params so they are formatted and encoded uniformly.
        if url.query().is_some() {
            return error_output(
                0,
                format!("URL '{}' embeds a query string; use query_params", config.url),
            );
        }

        let retry = config.retry.clone().unwrap_or_default();
        let cache_policy = config.cache.clone().unwrap_or_default();
        let transform = config.response.clone().unwrap_or_default();
        let timeout = Duration::from_secs(config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let mut query_pairs = stringify_query(&config.query_params);
        let mut headers = default_headers(&url);
        apply_auth(&config.auth, &mut headers, &mut query_pairs);
        merge_headers(&mut headers, &config.headers);

        // GET responses only; non-idempotent methods always go to the wire.
        let cacheable = cache_policy.enabled && config.method == HttpMethod::Get;
        if cache_policy.enabled && !cacheable {
            tracing::warn!(
                method = config.method.as_str(),
                "response cache is GET-only, bypassing"
            );
        }

        let cache_key = ResponseCache::cache_key(
            config.method.as_str(),
            url.as_str(),
            &query_pairs,
            config.body.as_ref(),
            &config.auth,
        );
        if cacheable {
            if let Some(cached) = self.cache.get(&cache_key) {
                tracing::debug!(url = url.as_str(), "api cache hit");
                return cached;
            }
        }

        let mut output = self
            .call_with_retry(&config, &url, &headers, &query_pairs, timeout, &retry)
            .await;
        let body = std::mem::replace(&mut output.data, Value::Null);
        output.data = transform_response(body, &transform);

        if cacheable && output.status == "success" {
            self.cache.put(
                cache_key,
                output.clone(),
                Duration::from_secs(cache_policy.ttl_seconds),
            );
        }

        output
    }

    async fn call_with_retry(
        &self,
        config: &ApiCallConfig,
        url: &reqwest::Url,
        headers: &HeaderMap,
        query_pairs: &[(String, String)],
        timeout: Duration,
        retry: &RetryPolicy,
    ) -> ApiCallOutput {
        let method = match config.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut last_error = String::new();
        let mut last_status: u16 = 0;

        for attempt in 0..=retry.max_retries {
            if attempt > 0 {
                let delay =
                    retry.delay_seconds * retry.backoff_factor.powi(attempt as i32 - 1);
                tracing::warn!(
                    url = url.as_str(),
                    attempt,
                    delay_seconds = delay,
                    "retrying api call"
                );
                if delay > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .query(query_pairs)
                .timeout(timeout);
            if let Some(body) = &config.body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    last_status = status.as_u16();
                    let response_headers = collect_headers(response.headers());
                    let text = response.text().await.unwrap_or_default();
                    let data = decode_body(&text);

                    if status.is_success() {
                        return ApiCallOutput {
                            data,
                            status_code: last_status,
                            headers: response_headers,
                            status: "success".to_string(),
                            error: None,
                        };
                    }

                    let excerpt: String = text.chars().take(200).collect();
                    last_error = format!("HTTP {last_status}: {excerpt}");

                    if retry.retry_on_status.contains(&last_status) && attempt < retry.max_retries
                    {
                        continue;
                    }

                    // Non-retryable status: report immediately.
                    return ApiCallOutput {
                        data,
                        status_code: last_status,
                        headers: response_headers,
                        status: "error".to_string(),
                        error: Some(last_error),
                    };
                }
                Err(e) => {
                    // Timeouts count as network errors.
                    last_error = if e.is_timeout() {
                        format!("request timed out after {}s", timeout.as_secs())
                    } else {
                        format!("network error: {e}")
                    };
                    last_status = 0;
                    if attempt < retry.max_retries {
                        continue;
                    }
                }
            }
        }

        error_output(last_status, last_error)
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn error_output(status_code: u16, error: String) -> ApiCallOutput {
    ApiCallOutput {
        data: Value::Null,
        status_code,
        headers: HashMap::new(),
        status: "error".to_string(),
        error: Some(error),
    }
}

/// Browser-class defaults, always injected unless the caller overrides.
fn default_headers(url: &reqwest::Url) -> HeaderMap {
    let origin = format!(
        "{}://{}",
        url.scheme(),
        url.authority(),
    );

    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        reqwest::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(reqwest::header::PRAGMA, HeaderValue::from_static("no-cache"));
    if let Ok(referer) = HeaderValue::from_str(&origin) {
        headers.insert(reqwest::header::REFERER, referer);
    }
    headers
}

/// Auth dispatch. Query-located API keys land in the query pairs; everything
/// else becomes headers.
fn apply_auth(
    auth: &AuthConfig,
    headers: &mut HeaderMap,
    query_pairs: &mut Vec<(String, String)>,
) {
    match auth {
        AuthConfig::None => {}
        AuthConfig::ApiKey { key, name, location } => match location {
            ApiKeyLocation::Query => query_pairs.push((name.clone(), key.clone())),
            ApiKeyLocation::Header => {
                let value = if name.eq_ignore_ascii_case("authorization") {
                    format!("Bearer {key}")
                } else {
                    key.clone()
                };
                insert_header(headers, name, &value);
            }
        },
        AuthConfig::Basic { username, password } => {
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            insert_header(headers, "Authorization", &format!("Basic {credentials}"));
        }
        AuthConfig::Oauth { token } | AuthConfig::Jwt { token } => {
            insert_header(headers, "Authorization", &format!("Bearer {token}"));
        }
        AuthConfig::Custom { headers: custom } => {
            for (name, value) in custom {
                insert_header(headers, name, value);
            }
        }
    }
}

fn merge_headers(headers: &mut HeaderMap, user_headers: &HashMap<String, String>) {
    for (name, value) in user_headers {
        insert_header(headers, name, value);
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = name, "invalid header, skipping"),
    }
}

fn stringify_query(params: &HashMap<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), workloom_core::template::stringify(v)))
        .collect()
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// JSON when it parses, raw text otherwise, null when empty.
fn decode_body(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Walk a dotted key path; arrays map the walk over their elements.
fn walk(value: &Value, path: &str) -> Value {
    let mut current = value.clone();
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(map) => {
                            map.get(segment).cloned().unwrap_or(Value::Null)
                        }
                        other => other.clone(),
                    })
                    .collect(),
            ),
            _ => Value::Null,
        };
    }
    current
}

/// Apply `extract` then `map`.
fn transform_response(data: Value, transform: &ResponseTransform) -> Value {
    let mut current = data;

    if let Some(path) = &transform.extract {
        current = walk(&current, path);
    }

    if let Some(mapping) = &transform.map {
        current = match &current {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| {
                        let mut out = serde_json::Map::new();
                        for (dst, src) in mapping {
                            out.insert(dst.clone(), walk(item, src));
                        }
                        Value::Object(out)
                    })
                    .collect(),
            ),
            other => {
                let mut out = serde_json::Map::new();
                for (dst, src) in mapping {
                    out.insert(dst.clone(), walk(other, src));
                }
                Value::Object(out)
            }
        };
    }

    current
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
