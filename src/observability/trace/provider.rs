//! Tracer provider construction and lifecycle.

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider,
    SpanExporter,
};
use opentelemetry_sdk::Resource;
use tokio::{task, time};

use crate::config::{BatchConfig as BatchSection, TelemetryConfig};
use crate::observability::endpoint::{build_off_runtime, signal_url};
use crate::observability::error::{Signal, TelemetryError};
use crate::observability::resource::service_resource;

/// Instrumentation scope name on every span.
const TRACER_NAME: &str = env!("CARGO_PKG_NAME");

/// Batching limits for the span processor.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
    pub scheduled_delay: Duration,
    /// Upper bound on one collector request.
    pub export_timeout: Duration,
}

impl BatchSettings {
    fn processor_config(&self) -> BatchConfig {
        BatchConfigBuilder::default()
            .with_max_queue_size(self.max_queue_size)
            .with_max_export_batch_size(self.max_export_batch_size)
            .with_scheduled_delay(self.scheduled_delay)
            .build()
    }
}

impl From<&BatchSection> for BatchSettings {
    fn from(config: &BatchSection) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_export_batch_size: config.max_export_batch_size,
            scheduled_delay: Duration::from_millis(config.scheduled_delay_ms),
            export_timeout: Duration::from_secs(config.export_timeout_secs),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&BatchSection::default())
    }
}

/// Settings for [`TracerProvider::initialize`].
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    pub service_version: String,
    /// Empty for stdout, otherwise an OTLP/HTTP collector.
    pub endpoint: String,
    pub batch: BatchSettings,
}

impl TracingConfig {
    pub fn from_telemetry(config: &TelemetryConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            endpoint: config.traces_endpoint.clone(),
            batch: BatchSettings::from(&config.batch),
        }
    }
}

/// Owns the span pipeline. Cloning shares it.
#[derive(Clone)]
pub struct TracerProvider {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
}

impl TracerProvider {
    /// Build the configured exporter and start batching.
    pub fn initialize(config: &TracingConfig) -> Result<Self, TelemetryError> {
        let resource = service_resource(&config.service_name, &config.service_version);
        let endpoint = config.endpoint.trim();

        if endpoint.is_empty() {
            tracing::info!("No trace collector configured; spans are written to stdout");
            let exporter = opentelemetry_stdout::SpanExporter::default();
            return Ok(Self::build(exporter, &config.batch, resource));
        }

        let url = signal_url(endpoint, "/v1/traces")
            .map_err(|e| TelemetryError::init(Signal::Traces, e))?;
        let target = url.to_string();
        let timeout = config.batch.export_timeout;
        let exporter = build_off_runtime(move || {
            opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(target)
                .with_timeout(timeout)
                .build()
        })
        .map_err(|e| TelemetryError::init(Signal::Traces, e))?;

        tracing::info!(endpoint = %url, "Spans are exported to collector");
        Ok(Self::build(exporter, &config.batch, resource))
    }

    /// Provider over an explicit exporter.
    pub fn with_exporter<E>(exporter: E, batch: BatchSettings) -> Self
    where
        E: SpanExporter + 'static,
    {
        let resource = service_resource(TRACER_NAME, env!("CARGO_PKG_VERSION"));
        Self::build(exporter, &batch, resource)
    }

    fn build<E>(exporter: E, batch: &BatchSettings, resource: Resource) -> Self
    where
        E: SpanExporter + 'static,
    {
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch.processor_config())
            .build();
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer(TRACER_NAME);

        Self { provider, tracer }
    }

    pub fn tracer(&self) -> SdkTracer {
        self.tracer.clone()
    }

    /// Export every span ended so far.
    pub async fn force_flush(&self) -> Result<(), TelemetryError> {
        let provider = self.provider.clone();
        match task::spawn_blocking(move || provider.force_flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TelemetryError::export(Signal::Traces, e)),
            Err(e) => Err(TelemetryError::export(Signal::Traces, e)),
        }
    }

    /// Flush and stop the pipeline, giving up after `deadline`.
    ///
    /// The SDK call runs on the blocking pool; past the deadline it is left
    /// to finish on its own.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), TelemetryError> {
        let provider = self.provider.clone();
        match time::timeout(deadline, task::spawn_blocking(move || provider.shutdown())).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(TelemetryError::export(Signal::Traces, e)),
            Ok(Err(e)) => Err(TelemetryError::export(Signal::Traces, e)),
            Err(_) => Err(TelemetryError::ShutdownTimeout {
                signal: Signal::Traces,
                deadline,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{
        SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId, TraceState,
        Tracer as _,
    };
    use opentelemetry::{Context, KeyValue};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn provider() -> (TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::with_exporter(exporter.clone(), BatchSettings::default());
        (provider, exporter)
    }

    #[tokio::test]
    async fn child_span_keeps_parent_trace() {
        let (provider, exporter) = provider();
        let parent = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let parent_cx = Context::new().with_remote_span_context(parent.clone());

        let tracer = provider.tracer();
        let cx = parent_cx.with_span(
            tracer
                .span_builder("child")
                .with_kind(SpanKind::Server)
                .start_with_context(&tracer, &parent_cx),
        );
        assert_eq!(cx.span().span_context().trace_id(), parent.trace_id());
        assert_ne!(cx.span().span_context().span_id(), parent.span_id());
        assert!(cx.span().span_context().is_sampled());
        cx.span().end();

        provider.force_flush().await.unwrap();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].parent_span_id, parent.span_id());
        assert_eq!(spans[0].span_kind, SpanKind::Server);
    }

    #[tokio::test]
    async fn root_span_carries_service_resource() {
        let (provider, exporter) = provider();
        let tracer = provider.tracer();
        let cx = Context::new().with_span(tracer.start_with_context("work", &Context::new()));
        cx.span().set_attribute(KeyValue::new("handler", "salestax"));
        cx.span().set_status(Status::Ok);
        cx.span().end();

        provider.force_flush().await.unwrap();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].parent_span_id, SpanId::INVALID);
        assert_eq!(spans[0].status, Status::Ok);
        assert!(spans[0]
            .attributes
            .contains(&KeyValue::new("handler", "salestax")));
        assert_eq!(spans[0].instrumentation_scope.name(), TRACER_NAME);

        provider.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn stdout_provider_initializes_without_endpoint() {
        let config = TracingConfig::from_telemetry(&TelemetryConfig::default());
        let provider = TracerProvider::initialize(&config).unwrap();
        provider.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_endpoint_fails_initialization() {
        let mut config = TracingConfig::from_telemetry(&TelemetryConfig::default());
        config.endpoint = "http://:4318".to_string();
        assert!(matches!(
            TracerProvider::initialize(&config),
            Err(TelemetryError::Init { signal: Signal::Traces, .. })
        ));
    }

    #[test]
    fn batch_settings_follow_config() {
        let settings = BatchSettings::from(&BatchSection {
            max_queue_size: 64,
            max_export_batch_size: 8,
            scheduled_delay_ms: 250,
            export_timeout_secs: 3,
        });
        assert_eq!(settings.scheduled_delay, Duration::from_millis(250));
        assert_eq!(settings.export_timeout, Duration::from_secs(3));
        let _ = settings.processor_config();
    }
}
