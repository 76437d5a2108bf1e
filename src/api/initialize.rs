// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::info;

use super::extract::JsonBody;
use crate::{
    error::ApiError,
    models::{InitializeRequest, InitializeResponse},
    state::AppState,
};

pub async fn initialize(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<InitializeRequest>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let identity = Arc::clone(&state.identity);
    let response = state.pool.submit(move || identity.initialize(request)).await??;

    info!(
        context_id = %response.context_id,
        contract_id = %response.contract_id,
        "Execution context initialized"
    );
    Ok(Json(response))
}
