//! LanceDB store wrapper: connection management and table lifecycle.
//!
//! Collections are mapped to tables named `knowledge_{domain}` (domain names
//! sanitized to lowercase alphanumerics and underscores).

use std::path::PathBuf;
use std::sync::Arc;

use arrow_schema::Schema;
use lancedb::Connection;

use workloom_types::error::RepositoryError;

/// Table-name prefix for knowledge collections.
pub const TABLE_PREFIX: &str = "knowledge_";

/// Wraps a `lancedb::Connection` with table lifecycle helpers.
pub struct LanceVectorStore {
    connection: Connection,
}

impl LanceVectorStore {
    /// Open (or create) a LanceDB database at the given path.
    pub async fn new(path: PathBuf) -> Result<Self, RepositoryError> {
        let uri = path.to_string_lossy().to_string();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to open vector store: {e}")))?;
        Ok(Self { connection })
    }

    /// The table name for a domain collection.
    pub fn collection_table_name(collection: &str) -> String {
        let sanitized: String = collection
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{TABLE_PREFIX}{sanitized}")
    }

    /// The collection name encoded in a table name, if it is one of ours.
    pub fn collection_from_table_name(table_name: &str) -> Option<String> {
        table_name.strip_prefix(TABLE_PREFIX).map(str::to_string)
    }

    /// Open a table, creating it empty with the given schema if missing.
    pub async fn ensure_table(
        &self,
        table_name: &str,
        schema: Arc<Schema>,
    ) -> Result<lancedb::Table, RepositoryError> {
        match self.connection.open_table(table_name).execute().await {
            Ok(table) => Ok(table),
            Err(_) => self
                .connection
                .create_empty_table(table_name, schema)
                .execute()
                .await
                .map_err(|e| {
                    RepositoryError::Query(format!("failed to create table {table_name}: {e}"))
                }),
        }
    }

    pub async fn table_exists(&self, table_name: &str) -> bool {
        self.table_names()
            .await
            .map(|names| names.iter().any(|n| n == table_name))
            .unwrap_or(false)
    }

    pub async fn table_names(&self) -> Result<Vec<String>, RepositoryError> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to list tables: {e}")))
    }

    /// Drop a table if it exists (idempotent).
    pub async fn drop_table(&self, table_name: &str) -> Result<(), RepositoryError> {
        if !self.table_exists(table_name).await {
            return Ok(());
        }
        self.connection
            .drop_table(table_name, &[])
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to drop table {table_name}: {e}")))
    }
}
