// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OTP attempt throttling.
//!
//! Records one attempt per call against the per-phone limiter. Sending the
//! code itself is done elsewhere; callers ask here first.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    auth::{Auth, AuthErrorBody},
    error::ApiError,
    state::AppState,
};

const MIN_PHONE_DIGITS: usize = 8;
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpAttemptRequest {
    /// Phone number, e.g. `+44 7700 900123`
    pub phone: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpAttemptResponse {
    pub allowed: bool,
    /// Attempts left in the current window
    pub remaining: u32,
}

/// Normalise a phone number to `[+]digits`, or `None` if it is not one.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    let valid = (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit());

    valid.then_some(compact)
}

/// Record an OTP attempt for a phone number.
#[utoipa::path(
    post,
    path = "/v1/otp/attempts",
    tag = "OTP",
    request_body = OtpAttemptRequest,
    responses(
        (status = 200, description = "Attempt recorded", body = OtpAttemptResponse),
        (status = 400, description = "Invalid phone number or malformed body"),
        (status = 401, description = "Not authenticated", body = AuthErrorBody),
        (status = 429, description = "Too many attempts for this number", body = AuthErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn record_attempt(
    State(state): State<AppState>,
    Auth(principal): Auth,
    payload: Result<Json<OtpAttemptRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return ApiError::new(rejection.status(), "INVALID_REQUEST_BODY", rejection.body_text())
                .into_response();
        }
    };

    let Some(phone) = normalize_phone(&request.phone) else {
        return ApiError::invalid_phone().into_response();
    };

    match state.phone_limiter.enforce(&phone) {
        Ok(decision) => {
            info!(
                requested_by = principal.identifier(),
                remaining = decision.remaining,
                "OTP attempt recorded"
            );
            Json(OtpAttemptResponse {
                allowed: true,
                remaining: decision.remaining,
            })
            .into_response()
        }
        Err(err) => {
            warn!(
                requested_by = principal.identifier(),
                retry_after_secs = err.retry_after_secs(),
                "OTP attempt rejected by rate limiter"
            );
            err.into_response()
        }
    }
}
