//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable selecting the OTLP metrics collector.
pub const METRICS_ENDPOINT_ENV: &str = "OTEL_COLLECTOR_ENDPOINT";

/// Environment variable selecting a Prometheus Pushgateway for metrics.
pub const PUSHGATEWAY_ENDPOINT_ENV: &str = "PUSHGATEWAY_ENDPOINT";

/// Environment variable selecting the trace sink.
pub const TRACES_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML document into a configuration without validating it.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            parse_config(&content)?
        }
        None => ServiceConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Override telemetry sinks from the environment.
///
/// An empty metrics endpoint means console export. The lookup is injected so
/// callers can supply something other than the process environment.
pub fn apply_env_overrides<F>(config: &mut ServiceConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = lookup(METRICS_ENDPOINT_ENV) {
        config.telemetry.metrics_endpoint = if endpoint.trim().is_empty() {
            "stdout".to_string()
        } else {
            endpoint.trim().to_string()
        };
    }
    if let Some(endpoint) = lookup(PUSHGATEWAY_ENDPOINT_ENV) {
        config.telemetry.pushgateway_endpoint = endpoint.trim().to_string();
    }
    if let Some(endpoint) = lookup(TRACES_ENDPOINT_ENV) {
        config.telemetry.traces_endpoint = endpoint.trim().to_string();
    }
}
