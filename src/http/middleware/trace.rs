//! Per-request tracing middleware.
//!
//! # Responsibilities
//! - Continue the caller's trace from `traceparent`, or start a new one
//! - Open one server span per request and share it through extensions
//! - Return the span's context to the caller in response headers
//! - Map the final status onto the span
//!
//! # Design Decisions
//! - The span ends when the response is produced, before the body is sent
//! - A request that never produces a response (panic, cancellation) ends its
//!   span as a 500 with error status
//! - Log events emitted while handling carry the trace ID

use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::KeyValue;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::observability::trace::{
    extract_remote_context, inject_context, SdkTracer, TRACE_ID_HEADER,
};

/// Layer that wraps every request in a server span named after the handler.
#[derive(Clone)]
pub struct TracingLayer {
    handler: &'static str,
    tracer: SdkTracer,
}

impl TracingLayer {
    pub fn new(handler: &'static str, tracer: SdkTracer) -> Self {
        Self { handler, tracer }
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = Tracing<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Tracing {
            inner,
            handler: self.handler,
            tracer: self.tracer.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Tracing<S> {
    inner: S,
    handler: &'static str,
    tracer: SdkTracer,
}

impl<S> Service<Request> for Tracing<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let parent_cx = match extract_remote_context(request.headers()) {
            Some(parent) => opentelemetry::Context::new().with_remote_span_context(parent),
            None => opentelemetry::Context::new(),
        };

        let span = self
            .tracer
            .span_builder(self.handler)
            .with_kind(SpanKind::Server)
            .with_attributes(vec![
                KeyValue::new("http.method", request.method().to_string()),
                KeyValue::new("http.route", request.uri().path().to_string()),
                KeyValue::new("http.target", request.uri().to_string()),
                KeyValue::new("handler", self.handler),
            ])
            .start_with_context(&self.tracer, &parent_cx);
        let span_cx = parent_cx.with_span(span);
        request.extensions_mut().insert(span_cx.clone());

        let log_span = tracing::info_span!(
            "request",
            handler = self.handler,
            trace_id = %span_cx.span().span_context().trace_id(),
            method = %request.method(),
            path = %request.uri().path(),
        );

        let guard = ServerSpan { cx: Some(span_cx) };
        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let mut response = fut.await?;
                guard.finish(&mut response);
                Ok(response)
            }
            .instrument(log_span),
        )
    }
}

/// Ends the server span exactly once.
struct ServerSpan {
    cx: Option<opentelemetry::Context>,
}

impl ServerSpan {
    fn finish(mut self, response: &mut Response) {
        if let Some(cx) = self.cx.take() {
            let span = cx.span();
            let span_context = span.span_context().clone();
            let headers = response.headers_mut();
            inject_context(&span_context, headers);
            if let Ok(value) = HeaderValue::from_str(&span_context.trace_id().to_string()) {
                headers.insert(TRACE_ID_HEADER, value);
            }
            end_with_status(&cx, response.status());
        }
    }
}

impl Drop for ServerSpan {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.take() {
            let trace_id = cx.span().span_context().trace_id();
            tracing::warn!(trace_id = %trace_id, "Request ended without a response");
            end_with_status(&cx, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}

fn end_with_status(cx: &opentelemetry::Context, status: StatusCode) {
    let span = cx.span();
    span.set_attribute(KeyValue::new("http.status_code", i64::from(status.as_u16())));
    if status.as_u16() >= 400 {
        let reason = status.canonical_reason().unwrap_or("Unknown Status");
        span.set_status(Status::error(reason));
    } else {
        span.set_status(Status::Ok);
    }
    span.end();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::trace::{BatchSettings, TracerProvider};
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use tower::ServiceExt;

    fn traced(
        route: &'static str,
        status: StatusCode,
    ) -> (Router, TracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::with_exporter(exporter.clone(), BatchSettings::default());
        let app = Router::new().route(
            route,
            get(move || async move { (status, "pong") })
                .layer(TracingLayer::new("ping", provider.tracer())),
        );
        (app, provider, exporter)
    }

    #[tokio::test]
    async fn response_carries_trace_headers() {
        let (app, provider, exporter) = traced("/ping", StatusCode::OK);

        let response = app
            .oneshot(axum::http::Request::get("/ping?x=1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let trace_id = response.headers()[TRACE_ID_HEADER].to_str().unwrap().to_string();
        let traceparent = response.headers()["traceparent"].to_str().unwrap().to_string();
        assert!(traceparent.starts_with(&format!("00-{trace_id}-")));
        assert!(traceparent.ends_with("-01"));

        provider.force_flush().await.unwrap();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "ping");
        assert_eq!(spans[0].span_kind, SpanKind::Server);
        assert_eq!(spans[0].span_context.trace_id().to_string(), trace_id);
        assert!(spans[0]
            .attributes
            .contains(&KeyValue::new("http.target", "/ping?x=1")));
        assert!(spans[0]
            .attributes
            .contains(&KeyValue::new("http.status_code", 200_i64)));
        assert_eq!(spans[0].status, Status::Ok);
    }

    #[tokio::test]
    async fn client_errors_mark_span_failed() {
        let (app, provider, exporter) = traced("/ping", StatusCode::NOT_FOUND);

        app.oneshot(axum::http::Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        provider.force_flush().await.unwrap();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans[0].status, Status::error("Not Found"));
    }
}
