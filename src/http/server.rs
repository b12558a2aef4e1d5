//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (tracing, metrics, timeout, panic recovery)
//! - Serve on a listener until shutdown
//! - Drain in-flight requests within a deadline

use std::io;
use std::time::Duration;

use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinError;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServiceConfig;
use crate::http::handlers::{health, salestax, SalesTaxState};
use crate::http::middleware::instrumented;
use crate::observability::metrics::Instruments;
use crate::observability::trace::SdkTracer;

/// HTTP server for the sales-tax API.
pub struct HttpServer {
    router: Router,
    drain_timeout: Duration,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and telemetry.
    pub fn new(config: &ServiceConfig, instruments: Instruments, tracer: SdkTracer) -> Self {
        let router = Self::build_router(config, instruments, tracer);
        Self::with_router(router, Duration::from_secs(config.listener.drain_timeout_secs))
    }

    /// Serve an arbitrary router with the same lifecycle handling.
    pub fn with_router(router: Router, drain_timeout: Duration) -> Self {
        Self {
            router,
            drain_timeout,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServiceConfig, instruments: Instruments, tracer: SdkTracer) -> Router {
        let salestax = any(salestax::handle).layer(
            ServiceBuilder::new()
                .layer(instrumented(salestax::HANDLER_NAME, instruments, tracer))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        );

        Router::new()
            .route("/salestax", salestax)
            .route("/health", get(health::health))
            .with_state(SalesTaxState::from(&config.salestax))
            .layer(CatchPanicLayer::new())
    }

    /// The router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain.
    ///
    /// Requests still running after the drain deadline are abandoned.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let (draining_tx, draining_rx) = oneshot::channel();
        let serve = axum::serve(listener, self.router).with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received, no longer accepting connections");
            let _ = draining_tx.send(());
        });
        let mut server = tokio::spawn(async move { serve.await });

        tokio::select! {
            joined = &mut server => return flatten(joined),
            _ = draining_rx => {}
        }

        match tokio::time::timeout(self.drain_timeout, &mut server).await {
            Ok(joined) => flatten(joined)?,
            Err(_) => {
                tracing::warn!(
                    deadline_secs = self.drain_timeout.as_secs_f64(),
                    "In-flight requests did not finish before the drain deadline; abandoning them"
                );
                server.abort();
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn flatten(joined: Result<io::Result<()>, JoinError>) -> io::Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(io::Error::other(e)),
    }
}
