//! Instrumentation middleware.
//!
//! ```text
//! request
//!     → trace.rs (server span, trace headers)
//!     → observability.rs (metrics, ErrorRecorder)
//!     → handler
//! ```
//!
//! Tracing sits outside so the metrics layer can attach the active span to
//! the `ErrorRecorder` it hands to the handler.

pub mod observability;
pub mod trace;

use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;

use crate::observability::metrics::Instruments;
use crate::observability::trace::SdkTracer;

pub use observability::{record_error, ErrorRecorder, ObservabilityLayer};
pub use trace::TracingLayer;

/// Tracing and metrics layers for one handler, in the required order.
pub fn instrumented(
    handler: &'static str,
    instruments: Instruments,
    tracer: SdkTracer,
) -> ServiceBuilder<Stack<ObservabilityLayer, Stack<TracingLayer, Identity>>> {
    ServiceBuilder::new()
        .layer(TracingLayer::new(handler, tracer))
        .layer(ObservabilityLayer::new(handler, instruments))
}
