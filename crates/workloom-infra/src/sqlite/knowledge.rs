//! SQLite knowledge repository implementation.
//!
//! Documents keep their canonical body here; the vector index only holds
//! metadata mirrors. Also persists the registered-domain table and the
//! retrieval query log.

use sqlx::Row;
use uuid::Uuid;

use workloom_core::repository::knowledge::KnowledgeRepository;
use workloom_types::error::RepositoryError;
use workloom_types::knowledge::{Domain, KnowledgeBase, KnowledgeDocument, QueryRecord};

use super::pool::DatabasePool;
use super::{enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `KnowledgeRepository`.
pub struct SqliteKnowledgeRepository {
    pool: DatabasePool,
}

impl SqliteKnowledgeRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn json_column<T: serde::de::DeserializeOwned>(
    text: &str,
    what: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(text)
        .map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn json_text<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn document_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<KnowledgeDocument, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let knowledge_base_id: String = row.try_get("knowledge_base_id").map_err(query_err)?;
    let category: String = row.try_get("category").map_err(query_err)?;
    let keywords: String = row.try_get("keywords").map_err(query_err)?;
    let tags: String = row.try_get("tags").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(query_err)?;

    Ok(KnowledgeDocument {
        id: parse_uuid(&id)?,
        knowledge_base_id: parse_uuid(&knowledge_base_id)?,
        title: row.try_get("title").map_err(query_err)?,
        domain: row.try_get("domain").map_err(query_err)?,
        category: enum_from_str(&category)?,
        keywords: json_column(&keywords, "keywords")?,
        tags: json_column(&tags, "tags")?,
        summary: row.try_get("summary").map_err(query_err)?,
        body: row.try_get("body").map_err(query_err)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn domain_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Domain, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let keywords: String = row.try_get("keywords").map_err(query_err)?;
    let created_at: String = row.try_get("created_at").map_err(query_err)?;

    Ok(Domain {
        id: parse_uuid(&id)?,
        name: row.try_get("name").map_err(query_err)?,
        keywords: json_column(&keywords, "domain keywords")?,
        description: row.try_get("description").map_err(query_err)?,
        document_count: row.try_get::<i64, _>("document_count").map_err(query_err)? as u32,
        is_active: row.try_get::<i64, _>("is_active").map_err(query_err)? != 0,
        created_at: parse_datetime(&created_at)?,
    })
}

impl KnowledgeRepository for SqliteKnowledgeRepository {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO knowledge_bases (id, name, description, category, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(kb.id.to_string())
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(enum_to_str(&kb.category)?)
        .bind(format_datetime(&kb.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_knowledge_base(
        &self,
        id: &Uuid,
    ) -> Result<Option<KnowledgeBase>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM knowledge_bases WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            let id: String = row.try_get("id").map_err(query_err)?;
            let category: String = row.try_get("category").map_err(query_err)?;
            let created_at: String = row.try_get("created_at").map_err(query_err)?;
            Ok(KnowledgeBase {
                id: parse_uuid(&id)?,
                name: row.try_get("name").map_err(query_err)?,
                description: row.try_get("description").map_err(query_err)?,
                category: enum_from_str(&category)?,
                created_at: parse_datetime(&created_at)?,
            })
        })
        .transpose()
    }

    async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM knowledge_bases ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_err)?;
                let category: String = row.try_get("category").map_err(query_err)?;
                let created_at: String = row.try_get("created_at").map_err(query_err)?;
                Ok(KnowledgeBase {
                    id: parse_uuid(&id)?,
                    name: row.try_get("name").map_err(query_err)?,
                    description: row.try_get("description").map_err(query_err)?,
                    category: enum_from_str(&category)?,
                    created_at: parse_datetime(&created_at)?,
                })
            })
            .collect()
    }

    async fn insert_document(
        &self,
        document: &KnowledgeDocument,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO documents
               (id, knowledge_base_id, title, domain, category, keywords, tags, summary, body, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(document.id.to_string())
        .bind(document.knowledge_base_id.to_string())
        .bind(&document.title)
        .bind(&document.domain)
        .bind(enum_to_str(&document.category)?)
        .bind(json_text(&document.keywords)?)
        .bind(json_text(&document.tags)?)
        .bind(&document.summary)
        .bind(&document.body)
        .bind(format_datetime(&document.created_at))
        .bind(format_datetime(&document.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn update_document(
        &self,
        document: &KnowledgeDocument,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE documents
               SET title = ?, domain = ?, category = ?, keywords = ?, tags = ?,
                   summary = ?, body = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&document.title)
        .bind(&document.domain)
        .bind(enum_to_str(&document.category)?)
        .bind(json_text(&document.keywords)?)
        .bind(json_text(&document.tags)?)
        .bind(&document.summary)
        .bind(&document.body)
        .bind(format_datetime(&document.updated_at))
        .bind(document.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_document(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_document(
        &self,
        id: &Uuid,
    ) -> Result<Option<KnowledgeDocument>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_documents(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<KnowledgeDocument>, RepositoryError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM documents WHERE id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter().map(document_from_row).collect()
    }

    async fn list_documents(
        &self,
        knowledge_base_id: &Uuid,
    ) -> Result<Vec<KnowledgeDocument>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE knowledge_base_id = ? ORDER BY created_at ASC",
        )
        .bind(knowledge_base_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn upsert_domain(&self, domain: &Domain) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO domains (id, name, keywords, description, document_count, is_active, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(name) DO UPDATE SET
                 keywords = excluded.keywords,
                 description = excluded.description,
                 is_active = excluded.is_active"#,
        )
        .bind(domain.id.to_string())
        .bind(&domain.name)
        .bind(json_text(&domain.keywords)?)
        .bind(&domain.description)
        .bind(domain.document_count as i64)
        .bind(domain.is_active as i64)
        .bind(format_datetime(&domain.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn list_domains(&self, active_only: bool) -> Result<Vec<Domain>, RepositoryError> {
        let sql = if active_only {
            "SELECT * FROM domains WHERE is_active = 1 ORDER BY name ASC"
        } else {
            "SELECT * FROM domains ORDER BY name ASC"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(domain_from_row).collect()
    }

    async fn get_domain_by_name(&self, name: &str) -> Result<Option<Domain>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM domains WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(domain_from_row).transpose()
    }

    async fn bump_domain_document_count(
        &self,
        domain_id: &Uuid,
        delta: i64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE domains SET document_count = MAX(0, document_count + ?) WHERE id = ?",
        )
        .bind(delta)
        .bind(domain_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn record_query(&self, record: &QueryRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO rag_queries (id, query, detected_domains, hit_count, latency_ms, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.query)
        .bind(json_text(&record.detected_domains)?)
        .bind(record.hit_count as i64)
        .bind(record.latency_ms as i64)
        .bind(format_datetime(&record.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
