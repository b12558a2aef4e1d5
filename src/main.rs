//! Instrumented sales-tax API server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ CatchPanic ─▶ Tracing ─▶ Observability ─▶ Timeout ─▶ salestax handler
//!                                      │             │
//!                                      ▼             ▼
//!                                 span batches   metric aggregates
//!                                      │             │
//!                                      ▼             ▼
//!                             stdout / OTLP HTTP   stdout / push gateway
//! ```
//!
//! Startup: config → logging → telemetry → listener → serve.
//! Shutdown: SIGINT/SIGTERM → drain (bounded) → flush traces → flush metrics.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use labapiserver::config::validation::validate_config;
use labapiserver::config::{load_config, ConfigError};
use labapiserver::lifecycle::wait_for_shutdown_signal;
use labapiserver::observability::logging::init_logging;
use labapiserver::{HttpServer, Shutdown, Telemetry};

#[derive(Debug, Parser)]
#[command(name = "labapiserver", version, about = "Sales-tax API with metrics and tracing")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address (e.g. 127.0.0.1:8080).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    init_logging(&config.logging);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "labapiserver starting");

    let telemetry = match Telemetry::init(&config.telemetry) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize telemetry");
            return Err(e.into());
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        request_timeout_secs = config.timeouts.request_secs,
        tax_rate = config.salestax.tax_rate,
        "Listening for connections"
    );

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, telemetry.instruments(), telemetry.tracer());
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let server_result = tokio::select! {
        signal = wait_for_shutdown_signal() => {
            tracing::info!(signal, "Shutting down");
            shutdown.trigger();
            (&mut server_task).await
        }
        joined = &mut server_task => {
            tracing::error!("HTTP server exited unexpectedly");
            joined
        }
    };

    let telemetry_errors = telemetry.shutdown().await;

    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "HTTP server error");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(telemetry_errors = telemetry_errors.len(), "Shutdown complete");
    Ok(())
}
