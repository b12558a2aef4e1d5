//! W3C Trace Context propagation over HTTP headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

/// Response header carrying the bare trace ID for log correlation.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let name = HeaderName::from_bytes(key.as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(&value)) {
            self.0.insert(name, value);
        }
    }
}

/// Parent context from an inbound `traceparent` header.
///
/// Missing or malformed headers yield `None`, meaning the span is a root.
pub fn extract_remote_context(headers: &HeaderMap) -> Option<SpanContext> {
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    let span_context = cx.span().span_context().clone();
    span_context.is_valid().then_some(span_context)
}

/// Write `traceparent` (and `tracestate`, if any) for the given span.
pub fn inject_context(span_context: &SpanContext, headers: &mut HeaderMap) {
    let cx = Context::new().with_remote_span_context(span_context.clone());
    TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(headers));
}
