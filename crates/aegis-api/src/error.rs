//! API error handling
//!
//! Every caller-visible failure is a 400 with `{ code, message }`;
//! payment-required is not an error but a 402 response built by the
//! handlers. Full ledger detail stays in the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use aegis_types::Aegis402Error;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn invalid(field: &str) -> Self {
        Self {
            code: "INVALID_INPUT".to_string(),
            message: format!("Missing or invalid field: {field}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

impl From<Aegis402Error> for ApiError {
    fn from(err: Aegis402Error) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}
