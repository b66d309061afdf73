//! LanceDB-backed `VectorIndex` over domain-partitioned collections.
//!
//! Each collection (one per domain plus `common`) maps to its own table.
//! Rows hold only metadata mirrors and the embedded metadata vector; search
//! uses cosine distance and returns the `_distance` column LanceDB appends.

use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field};
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use uuid::Uuid;

use workloom_core::knowledge::index::{ScoredEntry, VectorIndex};
use workloom_types::error::RepositoryError;
use workloom_types::knowledge::VectorEntry;

use super::lance::LanceVectorStore;
use super::schema::{knowledge_entry_schema, EMBEDDING_DIMENSION};

/// Domain-partitioned vector index over LanceDB tables.
pub struct LanceVectorIndex {
    store: LanceVectorStore,
}

impl LanceVectorIndex {
    pub fn new(store: LanceVectorStore) -> Self {
        Self { store }
    }

    fn build_record_batch(
        entry: &VectorEntry,
        embedding: &[f32],
    ) -> Result<RecordBatch, RepositoryError> {
        let schema = Arc::new(knowledge_entry_schema());

        let keywords_json = serde_json::to_string(&entry.keywords)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let tags_json = serde_json::to_string(&entry.tags)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let values = Float32Array::from(embedding.to_vec());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array =
            FixedSizeListArray::new(field, EMBEDDING_DIMENSION, Arc::new(values), None);

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![entry.id.to_string()])),
                Arc::new(StringArray::from(vec![entry.title.clone()])),
                Arc::new(StringArray::from(vec![entry.domain.clone()])),
                Arc::new(StringArray::from(vec![keywords_json])),
                Arc::new(StringArray::from(vec![tags_json])),
                Arc::new(StringArray::from(vec![entry.summary.clone()])),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| RepositoryError::Query(format!("failed to build record batch: {e}")))
    }

    fn record_batch_to_entries(batch: &RecordBatch, collection: &str) -> Vec<VectorEntry> {
        let num_rows = batch.num_rows();
        if num_rows == 0 {
            return vec![];
        }

        let string_col = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        };

        let (Some(id_col), Some(title_col), Some(domain_col)) =
            (string_col("id"), string_col("title"), string_col("domain"))
        else {
            return vec![];
        };
        let keywords_col = string_col("keywords");
        let tags_col = string_col("tags");
        let summary_col = string_col("summary");

        let mut entries = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            let id = Uuid::parse_str(id_col.value(i)).unwrap_or_else(|_| Uuid::nil());
            let keywords: Vec<String> = keywords_col
                .map(|c| serde_json::from_str(c.value(i)).unwrap_or_default())
                .unwrap_or_default();
            let tags: Vec<String> = tags_col
                .map(|c| serde_json::from_str(c.value(i)).unwrap_or_default())
                .unwrap_or_default();

            entries.push(VectorEntry {
                id,
                collection: collection.to_string(),
                title: title_col.value(i).to_string(),
                domain: domain_col.value(i).to_string(),
                keywords,
                tags,
                summary: summary_col.map(|c| c.value(i).to_string()).unwrap_or_default(),
            });
        }
        entries
    }
}

impl VectorIndex for LanceVectorIndex {
    async fn add(
        &self,
        collection: &str,
        entry: &VectorEntry,
        embedding: &[f32],
    ) -> Result<(), RepositoryError> {
        let table_name = LanceVectorStore::collection_table_name(collection);
        let table = self
            .store
            .ensure_table(&table_name, Arc::new(knowledge_entry_schema()))
            .await?;

        let batch = Self::build_record_batch(entry, embedding)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to add entry: {e}")))?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, RepositoryError> {
        let table_name = LanceVectorStore::collection_table_name(collection);
        if !self.store.table_exists(&table_name).await {
            return Ok(vec![]);
        }

        let table = self
            .store
            .ensure_table(&table_name, Arc::new(knowledge_entry_schema()))
            .await?;

        let results = table
            .vector_search(embedding)
            .map_err(|e| RepositoryError::Query(format!("vector search setup failed: {e}")))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RepositoryError::Query(format!("vector search failed: {e}")))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to collect results: {e}")))?;

        let mut scored = Vec::new();
        for batch in &batches {
            if batch.num_rows() == 0 {
                continue;
            }
            let distance_col = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

            let entries = Self::record_batch_to_entries(batch, collection);
            for (i, entry) in entries.into_iter().enumerate() {
                let distance = distance_col.map_or(0.0, |d| d.value(i));
                scored.push(ScoredEntry { entry, distance });
            }
        }

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(scored)
    }

    async fn delete(&self, collection: &str, id: &Uuid) -> Result<(), RepositoryError> {
        let table_name = LanceVectorStore::collection_table_name(collection);
        if !self.store.table_exists(&table_name).await {
            return Ok(());
        }

        let table = self
            .store
            .ensure_table(&table_name, Arc::new(knowledge_entry_schema()))
            .await?;

        table
            .delete(&format!("id = '{id}'"))
            .await
            .map_err(|e| RepositoryError::Query(format!("failed to delete entry: {e}")))?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .store
            .table_names()
            .await?
            .iter()
            .filter_map(|name| LanceVectorStore::collection_from_table_name(name))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
