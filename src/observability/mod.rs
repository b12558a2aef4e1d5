//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP middleware produces:
//!     → metrics/ (request counters, latency and size histograms)
//!     → memory.rs (process memory gauge, sampled per export cycle)
//!     → trace/ (one server span per request)
//!     → logging.rs (structured log events on stderr)
//!
//! Sinks:
//!     → stdout, OTLP/HTTP collector or Pushgateway (metrics, periodic)
//!     → stdout or OTLP/HTTP collector (spans, batched)
//! ```
//!
//! # Design Decisions
//! - Instruments and tracers are passed in, not looked up globally
//! - Recording never fails a request; export errors are logged
//! - Uninitialized telemetry degrades to no-op instruments

pub mod endpoint;
pub mod error;
pub mod logging;
pub mod memory;
pub mod metrics;
pub(crate) mod resource;
pub mod trace;

pub use self::error::{Signal, TelemetryError};
pub use self::memory::start_memory_monitoring;
pub use self::metrics::{
    Instruments, Meter, MetricsConfig, MetricsRegistry, MetricsShutdown, MetricsSink,
};
pub use self::trace::{SdkTracer, TracerProvider, TracingConfig};
