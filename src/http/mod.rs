//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, panic recovery, graceful drain)
//!     → middleware/trace.rs (server span, trace headers)
//!     → middleware/observability.rs (metrics, error recorder)
//!     → handlers/ (sales tax, health)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::HttpServer;
