// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only operational endpoints. Gated on the `admin` role.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::{Auth, AuthErrorBody},
    state::AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearCacheResponse {
    /// Entries removed
    pub removed: usize,
}

/// Drop every cached verification result. Subsequent requests re-verify.
#[utoipa::path(
    delete,
    path = "/v1/admin/auth-cache",
    tag = "Admin",
    responses(
        (status = 200, description = "Cache cleared", body = ClearCacheResponse),
        (status = 401, description = "Not authenticated", body = AuthErrorBody),
        (status = 403, description = "Admin role required", body = AuthErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn clear_auth_cache(
    State(state): State<AppState>,
    Auth(principal): Auth,
) -> Json<ClearCacheResponse> {
    let removed = state.cache().map_or(0, |cache| cache.clear());
    info!(
        admin = principal.identifier(),
        removed,
        "Verification cache cleared"
    );
    Json(ClearCacheResponse { removed })
}
