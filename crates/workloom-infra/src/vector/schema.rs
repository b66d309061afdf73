//! Arrow schema for LanceDB knowledge-entry tables.
//!
//! One table per domain collection, one row per document: the metadata
//! fields (title, domain, keywords, tags, summary) plus a 384-dimensional
//! float32 vector of the embedded metadata blob. Bodies are never stored
//! here.
//!
//! Arrow versions MUST match lancedb's transitive dependency (57.3 for
//! lancedb 0.26).

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

/// BGESmallENV15 embedding dimension.
pub const EMBEDDING_DIMENSION: i32 = 384;

/// Schema for per-domain knowledge entry tables.
///
/// `keywords` and `tags` are JSON-encoded string lists; they are filter
/// metadata, not searchable columns.
pub fn knowledge_entry_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("domain", DataType::Utf8, false),
        Field::new("keywords", DataType::Utf8, false),
        Field::new("tags", DataType::Utf8, false),
        Field::new("summary", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                EMBEDDING_DIMENSION,
            ),
            false,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_fields() {
        let schema = knowledge_entry_schema();
        assert_eq!(schema.fields().len(), 7);
        for name in ["id", "title", "domain", "keywords", "tags", "summary", "vector"] {
            assert!(schema.field_with_name(name).is_ok(), "{name} missing");
        }

        let vector_field = schema.field_with_name("vector").unwrap();
        match vector_field.data_type() {
            DataType::FixedSizeList(_, size) => assert_eq!(*size, EMBEDDING_DIMENSION),
            other => panic!("expected FixedSizeList, got {other:?}"),
        }
    }

    #[test]
    fn test_embedding_dimension_constant() {
        assert_eq!(EMBEDDING_DIMENSION, 384);
    }
}
