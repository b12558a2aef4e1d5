//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.drain_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.drain_timeout_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let telemetry = &config.telemetry;
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::new("telemetry.service_name", "must not be empty"));
    }
    if telemetry.metrics_export_interval_secs == 0 {
        errors.push(ValidationError::new(
            "telemetry.metrics_export_interval_secs",
            "must be > 0",
        ));
    }
    let metrics_to_collector = !(telemetry.metrics_endpoint.trim().is_empty()
        || telemetry.metrics_endpoint.trim().eq_ignore_ascii_case("stdout"));
    if metrics_to_collector && !telemetry.pushgateway_endpoint.trim().is_empty() {
        errors.push(ValidationError::new(
            "telemetry.pushgateway_endpoint",
            "set either metrics_endpoint or pushgateway_endpoint, not both",
        ));
    }
    if telemetry.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new("telemetry.shutdown_timeout_secs", "must be > 0"));
    }
    if telemetry.batch.max_export_batch_size == 0 {
        errors.push(ValidationError::new("telemetry.batch.max_export_batch_size", "must be > 0"));
    }
    if telemetry.batch.max_export_batch_size > telemetry.batch.max_queue_size {
        errors.push(ValidationError::new(
            "telemetry.batch.max_export_batch_size",
            "must not exceed max_queue_size",
        ));
    }
    if telemetry.batch.scheduled_delay_ms == 0 {
        errors.push(ValidationError::new("telemetry.batch.scheduled_delay_ms", "must be > 0"));
    }

    if !(config.salestax.tax_rate.is_finite() && config.salestax.tax_rate >= 0.0) {
        errors.push(ValidationError::new("salestax.tax_rate", "must be a non-negative number"));
    }
    if config.salestax.max_body_bytes == 0 {
        errors.push(ValidationError::new("salestax.max_body_bytes", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
