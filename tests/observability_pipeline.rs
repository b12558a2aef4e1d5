//! End-to-end request instrumentation tests, driven through the router
//! without a socket.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::any;
use axum::Router;
use labapiserver::config::ServiceConfig;
use labapiserver::http::handlers::SalesTaxResponse;
use labapiserver::http::middleware::instrumented;
use labapiserver::observability::metrics::Instruments;
use opentelemetry::trace::{SpanId, SpanKind, Status};
use opentelemetry::Value;
use tower_http::catch_panic::CatchPanicLayer;

mod common;

use common::{attribute, post_json, send, TestTelemetry};

const HANDLER: (&str, &str) = ("handler", "salestax");

#[tokio::test]
async fn successful_request_records_metrics_and_span() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let (response, body) = send(router, post_json("/salestax", r#"{"amount": 100}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let result: SalesTaxResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(result.tax_rate, 7.5);
    assert_eq!(result.tax_amount, 7.5);
    assert_eq!(result.total_amount, 107.5);

    assert_eq!(
        telemetry.metric("http_requests_total", &[HANDLER, ("method", "POST"), ("status", "200")]),
        Some(1.0)
    );
    assert_eq!(
        telemetry.metric("http_request_duration_seconds_count", &[HANDLER, ("method", "POST")]),
        Some(1.0)
    );
    assert_eq!(telemetry.metric("http_response_size_bytes_count", &[HANDLER]), Some(1.0));
    assert_eq!(
        telemetry.metric("http_response_size_bytes_sum", &[HANDLER]),
        Some(body.len() as f64)
    );
    assert_eq!(telemetry.metric("http_active_connections", &[]), Some(0.0));
    assert_eq!(
        telemetry.metric("http_errors_total", &[HANDLER, ("error_kind", "invalid_input")]),
        None
    );

    let spans = telemetry.spans().await;
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "salestax");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(span.parent_span_id, SpanId::INVALID);
    assert_eq!(span.status, Status::Ok);
    assert_eq!(attribute(&span.attributes, "http.method"), Some(&Value::from("POST")));
    assert_eq!(attribute(&span.attributes, "http.route"), Some(&Value::from("/salestax")));
    assert_eq!(attribute(&span.attributes, "handler"), Some(&Value::from("salestax")));
    assert_eq!(attribute(&span.attributes, "http.status_code"), Some(&Value::I64(200)));
    assert!(span.events.events.is_empty());

    telemetry.stop().await;
}

#[tokio::test]
async fn malformed_body_counts_error_and_marks_span() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let (response, body) = send(router, post_json("/salestax", "{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body, b"Invalid request body");

    assert_eq!(
        telemetry.metric("http_errors_total", &[HANDLER, ("error_kind", "invalid_request_body")]),
        Some(1.0)
    );
    assert_eq!(
        telemetry.metric("http_requests_total", &[HANDLER, ("method", "POST"), ("status", "400")]),
        Some(1.0)
    );

    let spans = telemetry.spans().await;
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, Status::error("Bad Request"));
    let events = &spans[0].events.events;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "error");
    assert_eq!(
        attribute(&events[0].attributes, "error.kind"),
        Some(&Value::from("invalid_request_body"))
    );

    telemetry.stop().await;
}

#[tokio::test]
async fn negative_amount_is_invalid_input() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let (response, _) = send(router, post_json("/salestax", r#"{"amount": -5}"#)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        telemetry.metric("http_errors_total", &[HANDLER, ("error_kind", "invalid_input")]),
        Some(1.0)
    );

    telemetry.stop().await;
}

#[tokio::test]
async fn wrong_method_is_405_and_counted() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let request = Request::get("/salestax").body(Body::empty()).unwrap();
    let (response, _) = send(router, request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(
        telemetry.metric("http_errors_total", &[HANDLER, ("error_kind", "method_not_allowed")]),
        Some(1.0)
    );
    assert_eq!(
        telemetry.metric("http_requests_total", &[HANDLER, ("method", "GET"), ("status", "405")]),
        Some(1.0)
    );

    let spans = telemetry.spans().await;
    assert_eq!(spans[0].status, Status::error("Method Not Allowed"));

    telemetry.stop().await;
}

#[tokio::test]
async fn inbound_traceparent_continues_the_trace() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let mut request = post_json("/salestax", r#"{"amount": 10}"#);
    request.headers_mut().insert(
        "traceparent",
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".parse().unwrap(),
    );
    let (response, _) = send(router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let spans = telemetry.spans().await;
    let span = &spans[0];
    assert_eq!(
        span.span_context.trace_id().to_string(),
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
    assert_eq!(span.parent_span_id.to_string(), "00f067aa0ba902b7");

    let expected = format!(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-{}-01",
        span.span_context.span_id()
    );
    assert_eq!(response.headers()["traceparent"], expected.as_str());
    assert_eq!(response.headers()["x-trace-id"], "4bf92f3577b34da6a3ce929d0e0e4736");

    telemetry.stop().await;
}

#[tokio::test]
async fn requests_without_context_start_new_traces() {
    let telemetry = TestTelemetry::start();
    let config = ServiceConfig::default();

    let mut bad = post_json("/salestax", r#"{"amount": 1}"#);
    bad.headers_mut().insert("traceparent", "garbage".parse().unwrap());
    send(telemetry.router(&config), bad).await;
    send(telemetry.router(&config), post_json("/salestax", r#"{"amount": 1}"#)).await;

    let spans = telemetry.spans().await;
    assert_eq!(spans.len(), 2);
    assert!(spans.iter().all(|s| s.parent_span_id == SpanId::INVALID));
    assert_ne!(
        spans[0].span_context.trace_id(),
        spans[1].span_context.trace_id()
    );

    telemetry.stop().await;
}

async fn boom() -> &'static str {
    panic!("handler failure")
}

#[tokio::test]
async fn panicking_handler_is_recorded_as_500() {
    let telemetry = TestTelemetry::start();
    let router = Router::new()
        .route(
            "/boom",
            any(boom).layer(instrumented(
                "boom",
                telemetry.registry.instruments(),
                telemetry.provider.tracer(),
            )),
        )
        .layer(CatchPanicLayer::new());

    let (response, _) = send(router, Request::get("/boom").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(telemetry.metric("http_active_connections", &[]), Some(0.0));
    assert_eq!(
        telemetry.metric(
            "http_requests_total",
            &[("handler", "boom"), ("method", "GET"), ("status", "500")]
        ),
        Some(1.0)
    );

    let spans = telemetry.spans().await;
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, Status::error("Internal Server Error"));
    assert_eq!(
        attribute(&spans[0].attributes, "http.status_code"),
        Some(&Value::I64(500))
    );

    telemetry.stop().await;
}

#[tokio::test]
async fn concurrent_requests_are_all_counted() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let router = router.clone();
            tokio::spawn(async move {
                let body = format!(r#"{{"amount": {i}}}"#);
                send(router, post_json("/salestax", &body)).await.0.status()
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(
        telemetry.metric("http_requests_total", &[HANDLER, ("method", "POST"), ("status", "200")]),
        Some(50.0)
    );
    assert_eq!(telemetry.metric("http_active_connections", &[]), Some(0.0));
    assert_eq!(telemetry.spans().await.len(), 50);

    telemetry.stop().await;
}

#[tokio::test]
async fn handler_works_with_disabled_telemetry() {
    let telemetry = TestTelemetry::start();
    let router = Router::new()
        .route(
            "/salestax",
            any(labapiserver::http::handlers::salestax::handle).layer(instrumented(
                "salestax",
                Instruments::disabled(),
                telemetry.provider.tracer(),
            )),
        )
        .with_state(labapiserver::http::handlers::SalesTaxState {
            tax_rate: 10.0,
            max_body_bytes: 1024,
        });

    let (response, body) = send(router, post_json("/salestax", r#"{"amount": 50}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let result: SalesTaxResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(result.total_amount, 55.0);

    let ok = [HANDLER, ("method", "POST"), ("status", "200")];
    assert_eq!(telemetry.metric("http_requests_total", &ok), None);

    telemetry.stop().await;
}

#[tokio::test]
async fn health_is_not_instrumented() {
    let telemetry = TestTelemetry::start();
    let router = telemetry.router(&ServiceConfig::default());

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (response, body) = send(router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(telemetry.spans().await.is_empty());

    telemetry.stop().await;
}
