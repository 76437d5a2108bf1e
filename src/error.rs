// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-scoped errors.
//!
//! Endpoint failures render as `{"error": "..."}` with the matching status.
//! Routing failures raised before any endpoint runs (unknown path, wrong
//! method) render as plain text through [`plain_error`].

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::enclave::EnclaveError;
use crate::worker::PoolError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<EnclaveError> for ApiError {
    fn from(err: EnclaveError) -> Self {
        match err {
            EnclaveError::InvalidRequest(msg) => Self::bad_request(msg),
            EnclaveError::UnknownContext(id) => Self::not_found(format!("unknown context {id}")),
            EnclaveError::Released => Self::service_unavailable("enclave is shutting down"),
            other => {
                error!(error = %other, "Enclave operation failed");
                Self::internal("enclave operation failed")
            }
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Closed => Self::service_unavailable("service is shutting down"),
            PoolError::Panicked | PoolError::Spawn(_) => {
                error!(error = %err, "Unit of work failed");
                Self::internal("internal error")
            }
        }
    }
}

/// Plain-text error response with an explicit `Content-Length`.
///
/// `HEAD` requests get the headers only.
pub fn plain_error(method: &Method, status: StatusCode, message: &str) -> Response {
    let body = format!("{message}\n");
    let length = HeaderValue::from(body.len());

    let mut response = if *method == Method::HEAD {
        Response::new(Body::empty())
    } else {
        Response::new(Body::from(body))
    };
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, length);
    response
}
