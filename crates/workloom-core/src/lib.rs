//! Business logic and repository trait definitions for Workloom.
//!
//! This crate defines the "ports" (repository and adapter traits) that the
//! infrastructure layer implements, plus the pure logic of the platform:
//! the variable formatter, script validator, restricted condition evaluator,
//! step dispatcher, state-graph engine, execution runner, knowledge index,
//! and the interface the authoring agents consume. It depends only on
//! `workloom-types` -- never on any database/IO crate.

pub mod authoring;
pub mod expression;
pub mod knowledge;
pub mod llm;
pub mod repository;
pub mod template;
pub mod validator;
pub mod workflow;
