//! Sales-tax calculation endpoint.
//!
//! `POST /salestax` with `{"amount": <number>}` returns the amount, the tax
//! rate, the tax and the total. Every failure is reported to the request's
//! [`ErrorRecorder`] under a fixed error kind before the error response is
//! written.

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::config::SalesTaxConfig;
use crate::http::middleware::ErrorRecorder;

/// Handler name used for span names and metric labels.
pub const HANDLER_NAME: &str = "salestax";

/// Why a sales-tax request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MethodNotAllowed,
    InvalidRequestBody,
    InvalidInput,
    EncodingError,
}

impl ErrorKind {
    /// Value of the `error_kind` metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::InvalidRequestBody => "invalid_request_body",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::EncodingError => "encoding_error",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::InvalidRequestBody | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::EncodingError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(self) -> &'static str {
        match self {
            ErrorKind::MethodNotAllowed => "Method not allowed",
            ErrorKind::InvalidRequestBody => "Invalid request body",
            ErrorKind::InvalidInput => "Amount and tax rate must be non-negative",
            ErrorKind::EncodingError => "Failed to encode response",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SalesTaxRequest {
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalesTaxResponse {
    pub amount: f64,
    pub tax_rate: f64,
    pub tax_amount: f64,
    pub total_amount: f64,
}

impl SalesTaxResponse {
    /// `tax_rate` is a percentage.
    pub fn compute(amount: f64, tax_rate: f64) -> Self {
        let tax_amount = amount * tax_rate / 100.0;
        Self {
            amount,
            tax_rate,
            tax_amount,
            total_amount: amount + tax_amount,
        }
    }
}

/// Handler state.
#[derive(Debug, Clone)]
pub struct SalesTaxState {
    pub tax_rate: f64,
    pub max_body_bytes: usize,
}

impl From<&SalesTaxConfig> for SalesTaxState {
    fn from(config: &SalesTaxConfig) -> Self {
        Self {
            tax_rate: config.tax_rate,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

pub async fn handle(State(state): State<SalesTaxState>, request: Request) -> Response {
    let errors = request
        .extensions()
        .get::<ErrorRecorder>()
        .cloned()
        .unwrap_or_default();

    match calculate(&state, request).await {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(kind) => {
            errors.record(kind.as_str());
            tracing::debug!(error_kind = kind.as_str(), "Sales tax request rejected");
            (kind.status(), kind.message()).into_response()
        }
    }
}

async fn calculate(state: &SalesTaxState, request: Request) -> Result<Vec<u8>, ErrorKind> {
    if request.method() != Method::POST {
        return Err(ErrorKind::MethodNotAllowed);
    }

    let body = axum::body::to_bytes(request.into_body(), state.max_body_bytes)
        .await
        .map_err(|_| ErrorKind::InvalidRequestBody)?;
    let input: SalesTaxRequest =
        serde_json::from_slice(&body).map_err(|_| ErrorKind::InvalidRequestBody)?;

    if !input.amount.is_finite() || input.amount < 0.0 || state.tax_rate < 0.0 {
        return Err(ErrorKind::InvalidInput);
    }

    serde_json::to_vec(&SalesTaxResponse::compute(input.amount, state.tax_rate))
        .map_err(|_| ErrorKind::EncodingError)
}
