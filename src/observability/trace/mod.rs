//! Distributed tracing.
//!
//! # Responsibilities
//! - Extract W3C trace context from inbound requests
//! - Create one server span per request, child of the inbound context
//! - Batch finished spans and export them to stdout or an OTLP/HTTP collector
//!
//! # Data Flow
//! ```text
//! traceparent header
//!     → propagation.rs (parent SpanContext, or none for a root)
//!     → SdkTracer (span started in the middleware)
//!     → provider.rs (SDK batch processor, stdout or OTLP exporter)
//! ```
//!
//! # Design Decisions
//! - Spans, sampling and batching come from the OpenTelemetry SDK
//! - Every span is sampled
//! - Export is off the request path; a full queue drops spans

pub mod propagation;
pub mod provider;

pub use opentelemetry_sdk::trace::SdkTracer;
pub use propagation::{extract_remote_context, inject_context, TRACE_ID_HEADER};
pub use provider::{BatchSettings, TracerProvider, TracingConfig};
