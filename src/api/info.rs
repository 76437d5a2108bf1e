// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::{models::InfoResponse, state::AppState};

/// Identity metadata and the storage-service location.
///
/// Answered in place rather than through the worker pool: it only copies
/// in-memory fields, and it has to stay responsive while the pool is busy.
pub async fn get_info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(state.info())
}
