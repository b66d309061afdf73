//! Telemetry initialization for Workloom services.
//!
//! Installs the structured fmt subscriber every crate in the workspace logs
//! through, filtered by `RUST_LOG` with a default that keeps the engine's
//! own events at info while damping the chatty storage layers (sqlx
//! statement logging, LanceDB, the ONNX runtime behind fastembed). Span
//! close events are emitted so step and execution durations show up without
//! extra instrumentation.
//!
//! Trace export is opt-in via [`TraceExport`]; the returned guard owns the
//! exporter and flushes it when dropped, so `main` holds it for the process
//! lifetime and shutdown needs no separate call.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset: engine events at info, the
/// noisy dependencies at warn.
const DEFAULT_FILTER: &str = "info,sqlx=warn,lance=warn,lancedb=warn,ort=warn,hyper=warn";

/// Where spans go beyond the fmt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceExport {
    /// Structured logging only.
    Disabled,
    /// Bridge spans to OpenTelemetry with the stdout exporter. Suitable for
    /// local development; production swaps in an OTLP exporter here.
    Stdout,
}

/// Keeps the OTel provider alive; dropping it flushes buffered spans and
/// shuts the exporter down.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("warning: trace exporter shutdown failed: {e}");
            }
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already set, so call it exactly once from the
/// process entry point and hold the guard until exit.
pub fn init(export: TraceExport) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    match export {
        TraceExport::Disabled => {
            registry.try_init()?;
            Ok(TelemetryGuard { provider: None })
        }
        TraceExport::Stdout => {
            let provider = SdkTracerProvider::builder()
                .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
                .build();
            let tracer = provider.tracer("workloom");
            opentelemetry::global::set_tracer_provider(provider.clone());

            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            Ok(TelemetryGuard { provider: Some(provider) })
        }
    }
}
