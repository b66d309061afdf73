//! Shared domain types for Workloom.
//!
//! This crate contains the core domain types used across the Workloom
//! platform: workflows and their typed steps, execution records, the REST
//! call configuration surface, and knowledge-retrieval documents.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod http;
pub mod knowledge;
pub mod workflow;
