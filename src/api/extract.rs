// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON request body extractor with structured rejections.
//!
//! Unlike `axum::Json` it does not insist on a `Content-Type` header, and
//! every rejection is an [`ApiError`]:
//!
//! - body over the configured limit: 413
//! - empty body or invalid JSON: 400
//! - valid JSON of the wrong shape: 422

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::payload_too_large("request body too large")
            } else {
                ApiError::new(rejection.status(), rejection.body_text())
            }
        })?;

        if bytes.is_empty() {
            return Err(ApiError::bad_request("request body is empty"));
        }

        serde_json::from_slice(&bytes)
            .map(JsonBody)
            .map_err(|e| match e.classify() {
                Category::Data => ApiError::unprocessable(format!("invalid request: {e}")),
                _ => ApiError::bad_request(format!("malformed JSON: {e}")),
            })
    }
}
