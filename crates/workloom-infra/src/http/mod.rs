//! Generic REST invocation: the API client and its process-wide response
//! cache.

pub mod cache;
pub mod client;

pub use client::ApiClient;
