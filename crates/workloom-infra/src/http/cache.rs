//! TTL response cache for the API client.
//!
//! Process-wide, keyed by a digest of the canonicalized request (method, URL,
//! sorted query parameters, body hash, auth principal hash) so identical
//! requests from different credentials never share entries. Success-only:
//! errors are never negative-cached.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use workloom_types::http::{ApiCallOutput, AuthConfig};

struct CacheEntry {
    output: ApiCallOutput,
    expires_at: Instant,
}

/// Process-wide response cache. Construct once at startup and share.
#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical cache key: method, URL, sorted query pairs, body, and the
    /// auth principal, digested together.
    pub fn cache_key(
        method: &str,
        url: &str,
        query_pairs: &[(String, String)],
        body: Option<&serde_json::Value>,
        auth: &AuthConfig,
    ) -> String {
        let mut sorted = query_pairs.to_vec();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
        for (k, v) in &sorted {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"&");
        }
        if let Some(body) = body {
            hasher.update(body.to_string().as_bytes());
        }
        hasher.update(b"\n");
        // The auth principal: hashing the whole auth config keeps entries
        // from leaking across credentials.
        hasher.update(
            serde_json::to_string(auth)
                .unwrap_or_default()
                .as_bytes(),
        );

        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<ApiCallOutput> {
        let entry = self.entries.get(key)?;
        if Instant::now() > entry.expires_at {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.output.clone())
    }

    pub fn put(&self, key: String, output: ApiCallOutput, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                output,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
