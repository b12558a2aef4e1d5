//! Instrumented sales-tax API server library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, Telemetry};
