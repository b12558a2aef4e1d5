//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from a TOML file and
//! every field has a default, so an empty file (or no file) is a valid config.

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, drain deadline).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Metrics and trace export settings.
    pub telemetry: TelemetryConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Sales-tax endpoint settings.
    pub salestax: SalesTaxConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// How long in-flight requests may drain after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            drain_timeout_secs: 5,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Telemetry export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Reported as the `service.name` resource attribute.
    pub service_name: String,

    /// Reported as the `service.version` resource attribute.
    pub service_version: String,

    /// Metrics sink: "stdout" (or empty) for console output, otherwise a
    /// `host:port` or URL of an OTLP/HTTP collector.
    pub metrics_endpoint: String,

    /// Prometheus Pushgateway `host:port` or URL. When set, metrics are
    /// pushed there instead of going to `metrics_endpoint`.
    pub pushgateway_endpoint: String,

    /// Trace sink: empty for console output, otherwise a `host:port` or URL
    /// of an OTLP/HTTP collector.
    pub traces_endpoint: String,

    /// Interval between metric pushes in seconds.
    pub metrics_export_interval_secs: u64,

    /// Deadline for each provider's shutdown in seconds.
    pub shutdown_timeout_secs: u64,

    /// Span batching settings.
    pub batch: BatchConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "labapiserver".to_string(),
            service_version: "1.0.0".to_string(),
            metrics_endpoint: "stdout".to_string(),
            pushgateway_endpoint: String::new(),
            traces_endpoint: String::new(),
            metrics_export_interval_secs: 10,
            shutdown_timeout_secs: 5,
            batch: BatchConfig::default(),
        }
    }
}

/// Span batch processor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Spans buffered before new ones are dropped.
    pub max_queue_size: usize,

    /// Batch size that triggers an export before the scheduled delay.
    pub max_export_batch_size: usize,

    /// Delay between scheduled exports in milliseconds.
    pub scheduled_delay_ms: u64,

    /// Upper bound on a single collector request in seconds.
    pub export_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay_ms: 5000,
            export_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Sales-tax endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SalesTaxConfig {
    /// Tax rate in percent.
    pub tax_rate: f64,

    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for SalesTaxConfig {
    fn default() -> Self {
        Self {
            tax_rate: 7.5,
            max_body_bytes: 64 * 1024,
        }
    }
}
