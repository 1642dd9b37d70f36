// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, AuthErrorBody, AuthMethod, Principal};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub principal: Principal,
    pub auth_method: AuthMethod,
}

/// Echo the authenticated principal.
#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Authenticated principal", body = SessionResponse),
        (status = 401, description = "Missing, invalid or expired credential", body = AuthErrorBody),
        (status = 429, description = "Rate limited", body = AuthErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(Auth(principal): Auth, method: AuthMethod) -> Json<SessionResponse> {
    Json(SessionResponse {
        principal,
        auth_method: method,
    })
}
