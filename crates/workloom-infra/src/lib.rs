//! Infrastructure adapters for Workloom.
//!
//! Implements the port traits defined in `workloom-core`: SQLite-backed
//! repositories (split reader/writer pools, WAL mode), the generic REST API
//! client with auth/retry/cache/transform, the subprocess script sandbox,
//! the OpenAI-compatible LLM client, and the LanceDB vector index with
//! fastembed local embeddings.

pub mod config;
pub mod context;
pub mod http;
pub mod llm;
pub mod notify;
pub mod sandbox;
pub mod sqlite;
pub mod vector;
