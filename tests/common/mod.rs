//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use labapiserver::config::ServiceConfig;
use labapiserver::http::HttpServer;
use labapiserver::observability::metrics::{MetricsConfig, MetricsRegistry, MetricsShutdown};
use labapiserver::observability::trace::{BatchSettings, TracerProvider};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use tower::ServiceExt;

/// Telemetry wired to in-process sinks so tests can inspect what was recorded.
pub struct TestTelemetry {
    pub registry: MetricsRegistry,
    pub provider: TracerProvider,
    pub exporter: InMemorySpanExporter,
    metrics_shutdown: MetricsShutdown,
}

impl TestTelemetry {
    /// Metrics export to stdout once an hour, so nothing is printed mid-test.
    pub fn start() -> Self {
        let registry = MetricsRegistry::new();
        let metrics_shutdown = registry
            .initialize(&MetricsConfig {
                export_interval: Duration::from_secs(3600),
                ..MetricsConfig::default()
            })
            .unwrap();

        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::with_exporter(
            exporter.clone(),
            BatchSettings {
                scheduled_delay: Duration::from_secs(3600),
                ..BatchSettings::default()
            },
        );

        Self {
            registry,
            provider,
            exporter,
            metrics_shutdown,
        }
    }

    /// The production router over this telemetry.
    pub fn router(&self, config: &ServiceConfig) -> Router {
        HttpServer::new(config, self.registry.instruments(), self.provider.tracer()).router()
    }

    pub fn rendered(&self) -> String {
        self.registry.meter().unwrap().render().unwrap()
    }

    /// Value of one series in the current exposition text.
    pub fn metric(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        sample(&self.rendered(), name, labels)
    }

    /// All spans ended so far.
    pub async fn spans(&self) -> Vec<SpanData> {
        self.provider.force_flush().await.unwrap();
        self.exporter.get_finished_spans().unwrap()
    }

    pub async fn stop(self) {
        self.provider.shutdown(Duration::from_secs(5)).await.unwrap();
        self.metrics_shutdown.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}

/// Find a sample by exact name and exact label set (order-insensitive).
pub fn sample(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let mut wanted: Vec<String> = labels.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
    wanted.sort();

    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let (series_name, series_labels) = match series.split_once('{') {
                Some((n, rest)) => (n, rest.strip_suffix('}')?),
                None => (series, ""),
            };
            if series_name != name {
                return None;
            }

            let mut found: Vec<String> = if series_labels.is_empty() {
                Vec::new()
            } else {
                series_labels.split(',').map(str::to_string).collect()
            };
            found.sort();

            (found == wanted).then(|| value.parse().ok()).flatten()
        })
}

/// Value of a span or event attribute.
pub fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a Value> {
    attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

/// Send a request through the router and collect the full body.
pub async fn send(router: Router, request: Request<Body>) -> (Response<()>, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    (Response::from_parts(parts, ()), bytes.to_vec())
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
