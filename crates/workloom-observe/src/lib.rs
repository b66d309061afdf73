//! Observability setup for Workloom.

pub mod telemetry;

pub use telemetry::{init, TelemetryGuard, TraceExport};
