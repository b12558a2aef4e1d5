//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize the trace and metrics pipelines from configuration
//! - Register the process memory gauge once metrics are up
//! - Hand instruments and the tracer to the HTTP layer
//! - Flush and stop both pipelines at exit
//!
//! # Design Decisions
//! - Fail fast: a sink that cannot be built is fatal at startup
//! - Shutdown errors are logged, never fatal
//! - Tracing flushes before metrics so spans from drained requests go out

use std::sync::Arc;
use std::time::Duration;

use crate::config::TelemetryConfig;
use crate::observability::memory::start_memory_monitoring;
use crate::observability::metrics::{
    Instruments, MetricsConfig, MetricsRegistry, MetricsShutdown,
};
use crate::observability::trace::{SdkTracer, TracerProvider, TracingConfig};
use crate::observability::TelemetryError;

/// Running telemetry pipelines.
pub struct Telemetry {
    metrics: Arc<MetricsRegistry>,
    metrics_shutdown: MetricsShutdown,
    tracer_provider: TracerProvider,
    shutdown_timeout: Duration,
}

impl Telemetry {
    /// Start tracing and metrics. Must be called from within a Tokio runtime.
    pub fn init(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let tracer_provider = TracerProvider::initialize(&TracingConfig::from_telemetry(config))?;

        let metrics = Arc::new(MetricsRegistry::new());
        let metrics_shutdown = metrics.initialize(&MetricsConfig::from_telemetry(config))?;
        start_memory_monitoring(&metrics);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Telemetry initialized"
        );

        Ok(Self {
            metrics,
            metrics_shutdown,
            tracer_provider,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        })
    }

    pub fn instruments(&self) -> Instruments {
        self.metrics.instruments()
    }

    pub fn tracer(&self) -> SdkTracer {
        self.tracer_provider.tracer()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Flush and stop both pipelines, each under its own deadline.
    ///
    /// Returns the errors that were logged.
    pub async fn shutdown(self) -> Vec<TelemetryError> {
        let mut errors = Vec::new();

        if let Err(e) = self.tracer_provider.shutdown(self.shutdown_timeout).await {
            tracing::error!(error = %e, "Error shutting down tracer provider");
            errors.push(e);
        }

        if let Err(e) = self.metrics_shutdown.shutdown(self.shutdown_timeout).await {
            tracing::error!(error = %e, "Error shutting down meter provider");
            errors.push(e);
        }

        errors
    }
}
