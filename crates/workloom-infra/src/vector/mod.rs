//! Vector database infrastructure for the knowledge index.
//!
//! Provides LanceDB store management, the Arrow schema for metadata entries,
//! fastembed-based local embedding generation, and the `VectorIndex`
//! implementation over domain-partitioned collections.

pub mod embedder;
pub mod index;
pub mod lance;
pub mod schema;
