// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::debug;

use super::extract::JsonBody;
use crate::{
    error::ApiError,
    models::{InvokeRequest, InvokeResponse},
    state::AppState,
};

/// Run one unit of work in an execution context.
///
/// The slowest endpoint; the call may block on the secure module for as long
/// as it takes, on a worker thread.
pub async fn invoke(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<InvokeRequest>,
) -> Result<Json<InvokeResponse>, ApiError> {
    let identity = Arc::clone(&state.identity);
    let method = request.method.clone();
    let response = state.pool.submit(move || identity.invoke(request)).await??;

    debug!(
        context_id = %response.context_id,
        sequence = response.sequence,
        method = %method,
        "Invocation complete"
    );
    Ok(Json(response))
}
