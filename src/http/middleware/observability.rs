//! Per-request metrics middleware.
//!
//! # Responsibilities
//! - Track requests in flight (`http_active_connections`)
//! - Count requests by handler, method and final status
//! - Record latency and response body size
//! - Hand an [`ErrorRecorder`] to the handler through request extensions
//!
//! # Design Decisions
//! - Measurements finish when the response body has been fully written (or
//!   abandoned), so latency and size cover the whole response
//! - The status starts as 500 and is replaced by the handler's status; a
//!   handler that panics or is cancelled is therefore counted as 500
//! - The in-flight gauge is decremented exactly once, from `Drop`

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body::{Frame, SizeHint};
use metrics::Label;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use tower::{Layer, Service};

use crate::observability::metrics::Instruments;

/// Records one handler error as a metric and, when a span is active, as a
/// span event.
pub fn record_error(
    instruments: &Instruments,
    span: Option<&opentelemetry::Context>,
    handler: &'static str,
    error_kind: &'static str,
) {
    instruments.errors_total.add(
        1,
        vec![Label::new("handler", handler), Label::new("error_kind", error_kind)],
    );

    if let Some(cx) = span {
        cx.span()
            .add_event("error", vec![KeyValue::new("error.kind", error_kind)]);
    }

    tracing::debug!(handler, error_kind, "Handler error recorded");
}

/// Request-scoped error reporting, inserted into request extensions.
///
/// The default value records nothing, so handlers can fall back to it when
/// they run without the middleware.
#[derive(Clone, Default)]
pub struct ErrorRecorder {
    handler: &'static str,
    instruments: Instruments,
    span: Option<opentelemetry::Context>,
}

impl ErrorRecorder {
    pub fn new(
        handler: &'static str,
        instruments: Instruments,
        span: Option<opentelemetry::Context>,
    ) -> Self {
        Self {
            handler,
            instruments,
            span,
        }
    }

    pub fn record(&self, error_kind: &'static str) {
        record_error(&self.instruments, self.span.as_ref(), self.handler, error_kind);
    }
}

/// Layer that measures every request passing through it.
#[derive(Clone)]
pub struct ObservabilityLayer {
    handler: &'static str,
    instruments: Instruments,
}

impl ObservabilityLayer {
    pub fn new(handler: &'static str, instruments: Instruments) -> Self {
        Self { handler, instruments }
    }
}

impl<S> Layer<S> for ObservabilityLayer {
    type Service = Observability<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Observability {
            inner,
            handler: self.handler,
            instruments: self.instruments.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Observability<S> {
    inner: S,
    handler: &'static str,
    instruments: Instruments,
}

impl<S> Service<Request> for Observability<S>
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
        let span = request.extensions().get::<opentelemetry::Context>().cloned();
        request.extensions_mut().insert(ErrorRecorder::new(
            self.handler,
            self.instruments.clone(),
            span,
        ));

        let capture = ResponseCapture::begin(
            self.handler,
            request.method().as_str(),
            self.instruments.clone(),
        );
        let fut = self.inner.call(request);

        Box::pin(async move {
            let response = fut.await?;
            Ok(capture.attach(response))
        })
    }
}

/// Measurement state for one request. Emits everything when dropped.
struct ResponseCapture {
    handler: &'static str,
    method: String,
    instruments: Instruments,
    started: Instant,
    status: StatusCode,
    bytes: u64,
}

impl ResponseCapture {
    fn begin(handler: &'static str, method: &str, instruments: Instruments) -> Self {
        instruments.active_connections.add(1, Vec::new());
        Self {
            handler,
            method: method.to_string(),
            instruments,
            started: Instant::now(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            bytes: 0,
        }
    }

    fn attach(mut self, response: Response) -> Response {
        self.status = response.status();
        let (parts, body) = response.into_parts();
        Response::from_parts(
            parts,
            Body::new(CountingBody {
                inner: body,
                capture: Some(self),
            }),
        )
    }
}

impl Drop for ResponseCapture {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let status = self.status.as_u16().to_string();

        self.instruments.active_connections.add(-1, Vec::new());
        self.instruments.requests_total.add(
            1,
            vec![
                Label::new("handler", self.handler),
                Label::new("method", self.method.clone()),
                Label::new("status", status.clone()),
            ],
        );
        self.instruments.request_duration.record(
            elapsed.as_secs_f64(),
            vec![Label::new("handler", self.handler), Label::new("method", self.method.clone())],
        );
        self.instruments
            .response_size
            .record(self.bytes as f64, vec![Label::new("handler", self.handler)]);

        tracing::debug!(
            handler = self.handler,
            method = %self.method,
            status = %status,
            bytes = self.bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );
    }
}

/// Response body wrapper that counts data bytes as they are written.
struct CountingBody {
    inner: Body,
    capture: Option<ResponseCapture>,
}

impl http_body::Body for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(capture)) = (frame.data_ref(), this.capture.as_mut()) {
                    capture.bytes += data.len() as u64;
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => drop(this.capture.take()),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
