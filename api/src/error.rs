//! Response envelopes for failures.
//!
//! Client-visible failures are HTTP-200 envelopes carrying a stable error
//! identifier (and the offending parameter name where applicable), so that
//! wallet clients switch on `error` rather than on transport status codes.
//! Chain inconsistencies and storage failures keep non-200 statuses so
//! transports can tell retryable from fatal.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MissingParameter(&'static str),
    InvalidParameter(&'static str),
    InvalidBody,
    WalletNotFound,
    WalletNotReady,
    WalletAlreadyCreated,
    InconsistentChain,
    StorageUnavailable,
}

impl ErrorKind {
    pub fn identifier(&self) -> &'static str {
        match self {
            ErrorKind::MissingParameter(_) => "missing-parameter",
            ErrorKind::InvalidParameter(_) => "invalid-parameter",
            ErrorKind::InvalidBody => "invalid-body",
            ErrorKind::WalletNotFound => "wallet-not-found",
            ErrorKind::WalletNotReady => "wallet-not-ready",
            ErrorKind::WalletAlreadyCreated => "wallet-already-created",
            ErrorKind::InconsistentChain => "inconsistent-chain",
            ErrorKind::StorageUnavailable => "storage-unavailable",
        }
    }

    fn parameter(&self) -> Option<&'static str> {
        match self {
            ErrorKind::MissingParameter(name) | ErrorKind::InvalidParameter(name) => Some(name),
            _ => None,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InconsistentChain => StatusCode::BAD_REQUEST,
            ErrorKind::StorageUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

impl IntoResponse for ErrorKind {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.identifier(),
        });
        if let Some(parameter) = self.parameter() {
            body["parameter"] = Value::String(parameter.to_string());
        }
        (self.status(), Json(body)).into_response()
    }
}
