// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::{extract::State, Json};

use super::extract::JsonBody;
use crate::{
    error::ApiError,
    models::{VerifyRequest, VerifyResponse},
    state::AppState,
};

pub async fn verify(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let identity = Arc::clone(&state.identity);
    let response = state.pool.submit(move || identity.verify(request)).await??;
    Ok(Json(response))
}
