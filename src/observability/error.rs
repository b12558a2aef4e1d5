//! Telemetry pipeline errors.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Which telemetry signal an error concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Metrics,
    Traces,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Metrics => f.write_str("metrics"),
            Signal::Traces => f.write_str("traces"),
        }
    }
}

/// Errors raised by the metrics and tracing pipelines.
///
/// None of these ever reach request handling; only `Init` is fatal, and only
/// at startup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The sink could not be constructed.
    #[error("failed to initialize {signal} pipeline: {reason}")]
    Init { signal: Signal, reason: String },

    /// One export cycle failed. The next scheduled cycle tries again.
    #[error("{signal} export failed: {reason}")]
    Export { signal: Signal, reason: String },

    /// Shutdown did not complete before its deadline.
    #[error("{signal} shutdown exceeded its {deadline:?} deadline")]
    ShutdownTimeout { signal: Signal, deadline: Duration },

    /// The pipeline already stopped.
    #[error("{0} pipeline is shut down")]
    Closed(Signal),
}

impl TelemetryError {
    pub(crate) fn init(signal: Signal, reason: impl fmt::Display) -> Self {
        Self::Init {
            signal,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn export(signal: Signal, reason: impl fmt::Display) -> Self {
        Self::Export {
            signal,
            reason: reason.to_string(),
        }
    }
}
