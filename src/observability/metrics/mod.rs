//! Metrics collection and export.
//!
//! # Responsibilities
//! - Create the service instruments exactly once
//! - Aggregate concurrent writes without caller-side locking
//! - Export aggregates periodically to stdout, an OTLP collector or a
//!   Prometheus Pushgateway
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by handler, method, status
//! - `http_errors_total` (counter): handler errors by handler, error_kind
//! - `http_active_connections` (up-down counter): requests in flight
//! - `http_request_duration_seconds` (histogram): latency by handler, method
//! - `http_response_size_bytes` (histogram): body bytes written by handler
//! - `process_memory_usage_bytes` (gauge): registered by `memory.rs`
//!
//! # Data Flow
//! ```text
//! Instruments (metrics facade)
//!     → PrometheusRecorder → export.rs reader → stdout | Pushgateway PUT
//!     → otlp.rs OtlpRecorder → SDK periodic reader → OTLP/HTTP collector
//! ```
//!
//! # Design Decisions
//! - The recorder is owned by the registry, not installed as the global
//!   `metrics` recorder; components get instruments by injection
//! - Instruments obtained before initialization are disabled no-ops
//! - Export failures are logged and retried on the next tick

mod export;
mod otlp;

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::metrics::{MeterProvider as _, ObservableGauge};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

use crate::config::TelemetryConfig;
use crate::observability::endpoint::signal_url;
use crate::observability::error::{Signal, TelemetryError};
use crate::observability::resource::service_resource;

use self::export::TextExporter;
use self::otlp::OtlpRecorder;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const ERRORS_TOTAL: &str = "http_errors_total";
pub const ACTIVE_CONNECTIONS: &str = "http_active_connections";
pub const REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const RESPONSE_SIZE: &str = "http_response_size_bytes";

/// Interval between periodic exports.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const SIZE_BUCKETS: &[f64] = &[
    64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0,
];

pub(crate) fn buckets_for(name: &str) -> Option<&'static [f64]> {
    match name {
        REQUEST_DURATION => Some(DURATION_BUCKETS),
        RESPONSE_SIZE => Some(SIZE_BUCKETS),
        _ => None,
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedRecorder = Arc<dyn Recorder + Send + Sync>;

/// Settings for [`MetricsRegistry::initialize`].
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// "stdout" (or empty) for console output, otherwise an OTLP collector.
    pub endpoint: String,
    /// Prometheus Pushgateway; takes the place of `endpoint` when set.
    pub pushgateway: String,
    /// `service.name` resource attribute and Pushgateway job.
    pub service_name: String,
    pub service_version: String,
    pub export_interval: Duration,
}

impl MetricsConfig {
    pub fn from_telemetry(config: &TelemetryConfig) -> Self {
        Self {
            endpoint: config.metrics_endpoint.clone(),
            pushgateway: config.pushgateway_endpoint.clone(),
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            export_interval: Duration::from_secs(config.metrics_export_interval_secs),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self::from_telemetry(&TelemetryConfig::default())
    }
}

/// Where aggregated metrics are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsSink {
    /// Human-readable exposition text on stdout.
    Stdout,
    /// OTLP/HTTP protobuf posted to this URL.
    Otlp(Url),
    /// Prometheus text pushed with `PUT` to this URL.
    Pushgateway(Url),
}

impl MetricsSink {
    /// Select a sink from configuration.
    ///
    /// A bare collector `host:port` is posted to `/v1/metrics`; a bare
    /// Pushgateway is pushed to `/metrics/job/{service_name}`.
    pub fn select(config: &MetricsConfig) -> Result<Self, TelemetryError> {
        let pushgateway = config.pushgateway.trim();
        if !pushgateway.is_empty() {
            let path = format!("/metrics/job/{}", config.service_name);
            return signal_url(pushgateway, &path)
                .map(Self::Pushgateway)
                .map_err(|e| TelemetryError::init(Signal::Metrics, e));
        }

        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() || endpoint.eq_ignore_ascii_case("stdout") {
            return Ok(Self::Stdout);
        }

        signal_url(endpoint, "/v1/metrics")
            .map(Self::Otlp)
            .map_err(|e| TelemetryError::init(Signal::Metrics, e))
    }
}

impl std::fmt::Display for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsSink::Stdout => f.write_str("stdout"),
            MetricsSink::Otlp(url) => write!(f, "otlp {url}"),
            MetricsSink::Pushgateway(url) => write!(f, "pushgateway {url}"),
        }
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

/// Gauge whose value is read from a callback just before each export.
struct SampledGauge {
    gauge: metrics::Gauge,
    sample: Box<dyn Fn() -> Option<f64> + Send + Sync>,
}

#[derive(Clone)]
enum Backend {
    Prometheus {
        handle: PrometheusHandle,
        sampled: Arc<Mutex<Vec<SampledGauge>>>,
    },
    Otlp {
        meter: opentelemetry::metrics::Meter,
        observed: Arc<Mutex<Vec<ObservableGauge<f64>>>>,
    },
}

/// Instrument factory backed by the registry's recorder.
#[derive(Clone)]
pub struct Meter {
    recorder: SharedRecorder,
    backend: Backend,
}

impl Meter {
    fn prometheus(builder: PrometheusBuilder) -> Self {
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        Self {
            recorder: Arc::new(recorder),
            backend: Backend::Prometheus {
                handle,
                sampled: Arc::new(Mutex::new(Vec::new())),
            },
        }
    }

    fn otlp(provider: &SdkMeterProvider) -> Self {
        let meter = provider.meter(env!("CARGO_PKG_NAME"));
        Self {
            recorder: Arc::new(OtlpRecorder::new(meter.clone())),
            backend: Backend::Otlp {
                meter,
                observed: Arc::new(Mutex::new(Vec::new())),
            },
        }
    }

    /// Create a monotonic counter.
    pub fn counter(&self, name: &'static str, description: &'static str) -> Counter {
        self.recorder
            .describe_counter(KeyName::from(name), Some(Unit::Count), description.into());
        Counter {
            name,
            recorder: Some(Arc::clone(&self.recorder)),
        }
    }

    /// Create a counter that can go up and down.
    pub fn up_down_counter(&self, name: &'static str, description: &'static str) -> UpDownCounter {
        self.recorder
            .describe_gauge(KeyName::from(name), Some(Unit::Count), description.into());
        UpDownCounter {
            name,
            recorder: Some(Arc::clone(&self.recorder)),
        }
    }

    /// Create a histogram.
    pub fn histogram(
        &self,
        name: &'static str,
        description: &'static str,
        unit: Unit,
    ) -> Histogram {
        self.recorder
            .describe_histogram(KeyName::from(name), Some(unit), description.into());
        Histogram {
            name,
            recorder: Some(Arc::clone(&self.recorder)),
        }
    }

    /// Register a gauge that is sampled once per export.
    ///
    /// A sample of `None` leaves the previous value in place.
    pub fn observable_gauge<F>(
        &self,
        name: &'static str,
        description: &'static str,
        unit: Unit,
        sample: F,
    ) where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        match &self.backend {
            Backend::Prometheus { sampled, .. } => {
                self.recorder
                    .describe_gauge(KeyName::from(name), Some(unit), description.into());
                let gauge = self.recorder.register_gauge(&Key::from_static_name(name), &metadata());
                lock(sampled).push(SampledGauge {
                    gauge,
                    sample: Box::new(sample),
                });
            }
            Backend::Otlp { meter, observed } => {
                let gauge = meter
                    .f64_observable_gauge(name)
                    .with_description(description)
                    .with_unit(otlp::unit_symbol(unit))
                    .with_callback(move |observer| {
                        if let Some(value) = sample() {
                            observer.observe(value, &[]);
                        }
                    })
                    .build();
                lock(observed).push(gauge);
            }
        }
    }

    /// Current aggregates in Prometheus exposition format.
    ///
    /// Sampled gauges are read first. `None` when aggregation happens in the
    /// OTLP pipeline instead.
    pub fn render(&self) -> Option<String> {
        match &self.backend {
            Backend::Prometheus { handle, sampled } => {
                for gauge in lock(sampled).iter() {
                    if let Some(value) = (gauge.sample)() {
                        gauge.gauge.set(value);
                    }
                }
                Some(handle.render())
            }
            Backend::Otlp { .. } => None,
        }
    }
}

/// Monotonic counter. The default value is disabled.
#[derive(Clone, Default)]
pub struct Counter {
    name: &'static str,
    recorder: Option<SharedRecorder>,
}

impl Counter {
    pub fn add(&self, value: u64, labels: Vec<Label>) {
        if let Some(recorder) = &self.recorder {
            recorder
                .register_counter(&Key::from_parts(self.name, labels), &metadata())
                .increment(value);
        }
    }
}

/// Counter that can be incremented and decremented. The default value is disabled.
#[derive(Clone, Default)]
pub struct UpDownCounter {
    name: &'static str,
    recorder: Option<SharedRecorder>,
}

impl UpDownCounter {
    pub fn add(&self, delta: i64, labels: Vec<Label>) {
        if let Some(recorder) = &self.recorder {
            let gauge = recorder.register_gauge(&Key::from_parts(self.name, labels), &metadata());
            if delta >= 0 {
                gauge.increment(delta as f64);
            } else {
                gauge.decrement(delta.unsigned_abs() as f64);
            }
        }
    }
}

/// Distribution of observed values. The default value is disabled.
#[derive(Clone, Default)]
pub struct Histogram {
    name: &'static str,
    recorder: Option<SharedRecorder>,
}

impl Histogram {
    pub fn record(&self, value: f64, labels: Vec<Label>) {
        if let Some(recorder) = &self.recorder {
            recorder
                .register_histogram(&Key::from_parts(self.name, labels), &metadata())
                .record(value);
        }
    }
}

/// The five service instruments.
///
/// Cloning is cheap; every clone writes to the same aggregates.
#[derive(Clone, Default)]
pub struct Instruments {
    pub requests_total: Counter,
    pub errors_total: Counter,
    pub active_connections: UpDownCounter,
    pub request_duration: Histogram,
    pub response_size: Histogram,
}

impl Instruments {
    fn create(meter: &Meter) -> Self {
        Self {
            requests_total: meter.counter(REQUESTS_TOTAL, "Total number of HTTP requests"),
            errors_total: meter.counter(ERRORS_TOTAL, "Total number of HTTP errors"),
            active_connections: meter
                .up_down_counter(ACTIVE_CONNECTIONS, "Number of active HTTP connections"),
            request_duration: meter
                .histogram(REQUEST_DURATION, "HTTP request duration", Unit::Seconds),
            response_size: meter.histogram(RESPONSE_SIZE, "HTTP response size", Unit::Bytes),
        }
    }

    /// Instruments that record nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.requests_total.recorder.is_some()
    }
}

struct Registered {
    meter: Meter,
    instruments: Instruments,
}

/// Process-wide metrics registry.
///
/// Shared by reference (usually in an `Arc`) with everything that records.
pub struct MetricsRegistry {
    state: OnceLock<Registered>,
}

impl MetricsRegistry {
    pub const fn new() -> Self {
        Self {
            state: OnceLock::new(),
        }
    }

    /// Build the sink, create the instruments and start periodic export.
    ///
    /// Must be called from within a Tokio runtime. A second call fails.
    pub fn initialize(&self, config: &MetricsConfig) -> Result<MetricsShutdown, TelemetryError> {
        if self.state.get().is_some() {
            return Err(TelemetryError::init(Signal::Metrics, "registry already initialized"));
        }

        let sink = MetricsSink::select(config)?;
        let (meter, pipeline) = match &sink {
            MetricsSink::Otlp(url) => {
                let resource = service_resource(&config.service_name, &config.service_version);
                let provider = otlp::meter_provider(url, resource, config.export_interval)?;
                (Meter::otlp(&provider), Pipeline::Otlp(provider))
            }
            MetricsSink::Stdout | MetricsSink::Pushgateway(_) => {
                let exporter = TextExporter::new(&sink, config.export_interval)?;
                (Meter::prometheus(prometheus_builder()?), Pipeline::Text(exporter))
            }
        };

        let instruments = Instruments::create(&meter);
        self.state
            .set(Registered {
                meter: meter.clone(),
                instruments,
            })
            .map_err(|_| TelemetryError::init(Signal::Metrics, "registry already initialized"))?;

        let shutdown = match pipeline {
            Pipeline::Text(exporter) => {
                let (stop_tx, stop_rx) = oneshot::channel();
                let interval = config.export_interval;
                let task = tokio::spawn(export::run_reader(meter, exporter, interval, stop_rx));
                MetricsShutdown::Reader {
                    stop: Some(stop_tx),
                    task,
                }
            }
            Pipeline::Otlp(provider) => MetricsShutdown::Otlp(provider),
        };

        tracing::info!(
            sink = %sink,
            interval_secs = config.export_interval.as_secs(),
            "Metrics pipeline initialized"
        );

        Ok(shutdown)
    }

    /// The shared meter, or `None` while telemetry is not initialized.
    pub fn meter(&self) -> Option<Meter> {
        self.state.get().map(|state| state.meter.clone())
    }

    /// The service instruments; disabled before initialization.
    pub fn instruments(&self) -> Instruments {
        self.state
            .get()
            .map(|state| state.instruments.clone())
            .unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_builder() -> Result<PrometheusBuilder, TelemetryError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)
        .and_then(|builder| {
            builder.set_buckets_for_metric(Matcher::Full(RESPONSE_SIZE.to_string()), SIZE_BUCKETS)
        })
        .map_err(|e| TelemetryError::init(Signal::Metrics, e))
}

enum Pipeline {
    Text(TextExporter),
    Otlp(SdkMeterProvider),
}

/// Stops periodic export after a final flush.
pub enum MetricsShutdown {
    /// The in-process reader task behind the stdout and Pushgateway sinks.
    Reader {
        stop: Option<oneshot::Sender<()>>,
        task: JoinHandle<()>,
    },
    /// The SDK meter provider behind the OTLP sink.
    Otlp(SdkMeterProvider),
}

impl MetricsShutdown {
    /// Flush pending aggregates and release the sink.
    ///
    /// An export still running at the deadline is abandoned.
    pub async fn shutdown(self, deadline: Duration) -> Result<(), TelemetryError> {
        let timed_out = TelemetryError::ShutdownTimeout {
            signal: Signal::Metrics,
            deadline,
        };

        match self {
            MetricsShutdown::Reader { mut stop, mut task } => {
                if let Some(stop) = stop.take() {
                    let _ = stop.send(());
                }
                match time::timeout(deadline, &mut task).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TelemetryError::export(Signal::Metrics, e)),
                    Err(_) => {
                        task.abort();
                        Err(timed_out)
                    }
                }
            }
            MetricsShutdown::Otlp(provider) => {
                let flush = tokio::task::spawn_blocking(move || provider.shutdown());
                match time::timeout(deadline, flush).await {
                    Ok(Ok(Ok(()))) => Ok(()),
                    Ok(Ok(Err(e))) => Err(TelemetryError::export(Signal::Metrics, e)),
                    Ok(Err(e)) => Err(TelemetryError::export(Signal::Metrics, e)),
                    Err(_) => Err(timed_out),
                }
            }
        }
    }
}
