// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};

use crate::auth::{AuthErrorBody, AuthStatus};
use crate::state::AppState;

/// Report whether verification and caching are active.
#[utoipa::path(
    get,
    path = "/v1/auth/status",
    tag = "Auth",
    responses(
        (status = 200, description = "Authentication status", body = AuthStatus),
        (status = 429, description = "Rate limited", body = AuthErrorBody)
    )
)]
pub async fn auth_status(State(state): State<AppState>) -> Json<AuthStatus> {
    Json(state.authenticator.status())
}
