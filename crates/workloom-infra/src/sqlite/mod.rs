//! SQLite persistence: split reader/writer pools and repository
//! implementations for the workflow and knowledge stores.

pub mod knowledge;
pub mod pool;
pub mod workflow;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use workloom_types::error::RepositoryError;

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Serialize a serde enum with string representation (snake_case) to its
/// bare string for a TEXT column.
pub(crate) fn enum_to_str<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    let v = serde_json::to_value(value).map_err(|e| RepositoryError::Query(e.to_string()))?;
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| RepositoryError::Query("enum did not serialize to a string".to_string()))
}

/// Parse a snake_case TEXT column back into a serde enum.
pub(crate) fn enum_from_str<T: serde::de::DeserializeOwned>(
    s: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid enum value: {s}")))
}
