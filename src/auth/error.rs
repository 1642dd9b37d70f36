// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and authorization errors.
//!
//! Every rejection produced by the auth layer is an [`AuthError`]. The set of
//! kinds is closed; each kind has a stable machine code and HTTP status, and
//! serialises to the same client-safe envelope:
//!
//! ```json
//! {
//!   "success": false,
//!   "message": "Access token has expired",
//!   "code": "EXPIRED_TOKEN",
//!   "status": 401,
//!   "timestamp": "2026-01-01T00:00:00.000Z"
//! }
//! ```

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

/// Closed set of authentication failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorKind {
    /// No bearer credential presented
    MissingToken,
    /// Credential is malformed or its signature does not verify
    InvalidToken,
    /// Credential signature is valid but it has expired
    ExpiredToken,
    /// A principal is required but none is attached to the request
    AuthRequired,
    /// The principal's role is not allowed on this route
    InsufficientPermissions,
    /// The verification secret is not configured
    AuthConfigError,
    /// Too many attempts in the current window
    RateLimitExceeded,
}

impl AuthErrorKind {
    /// Get the machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingToken => "MISSING_TOKEN",
            AuthErrorKind::InvalidToken => "INVALID_TOKEN",
            AuthErrorKind::ExpiredToken => "EXPIRED_TOKEN",
            AuthErrorKind::AuthRequired => "AUTH_REQUIRED",
            AuthErrorKind::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AuthErrorKind::AuthConfigError => "AUTH_CONFIG_ERROR",
            AuthErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }

    /// Get the HTTP status code for this kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorKind::MissingToken
            | AuthErrorKind::InvalidToken
            | AuthErrorKind::ExpiredToken
            | AuthErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
            AuthErrorKind::InsufficientPermissions => StatusCode::FORBIDDEN,
            AuthErrorKind::AuthConfigError => StatusCode::INTERNAL_SERVER_ERROR,
            AuthErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            AuthErrorKind::MissingToken => "Access token is required",
            AuthErrorKind::InvalidToken => "Access token is invalid",
            AuthErrorKind::ExpiredToken => "Access token has expired",
            AuthErrorKind::AuthRequired => "Authentication is required",
            AuthErrorKind::InsufficientPermissions => {
                "Insufficient permissions for this operation"
            }
            AuthErrorKind::AuthConfigError => "Authentication is not configured",
            AuthErrorKind::RateLimitExceeded => "Too many requests, please try again later",
        }
    }
}

/// An authentication or authorization failure.
///
/// Constructed only through the factory functions below and never mutated
/// afterwards. The timestamp is fixed at construction time.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AuthError {
    kind: AuthErrorKind,
    message: String,
    details: Option<serde_json::Value>,
    retry_after_secs: Option<u64>,
    timestamp: DateTime<Utc>,
}

/// Serialised error envelope.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthErrorBody {
    /// Always `false`
    pub success: bool,
    /// Human-readable message
    pub message: String,
    /// Machine-readable code (e.g. `MISSING_TOKEN`)
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Optional structured details
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// ISO-8601 timestamp
    pub timestamp: String,
}

impl AuthError {
    fn new(kind: AuthErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            details: None,
            retry_after_secs: None,
            timestamp: Utc::now(),
        }
    }

    pub fn missing_token() -> Self {
        Self::new(AuthErrorKind::MissingToken)
    }

    /// Invalid credential; `reason` is a short, client-safe description
    /// ("malformed", "invalid signature", ...).
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        let mut err = Self::new(AuthErrorKind::InvalidToken);
        err.details = Some(json!({ "reason": reason.into() }));
        err
    }

    pub fn expired_token() -> Self {
        Self::new(AuthErrorKind::ExpiredToken)
    }

    pub fn auth_required() -> Self {
        Self::new(AuthErrorKind::AuthRequired)
    }

    /// The allow-list is route configuration and safe to disclose.
    pub fn insufficient_permissions(required_roles: &[String]) -> Self {
        let mut err = Self::new(AuthErrorKind::InsufficientPermissions);
        err.details = Some(json!({ "requiredRoles": required_roles }));
        err
    }

    pub fn config_error() -> Self {
        Self::new(AuthErrorKind::AuthConfigError)
    }

    pub fn rate_limit_exceeded(retry_after_secs: u64) -> Self {
        let mut err = Self::new(AuthErrorKind::RateLimitExceeded);
        err.details = Some(json!({ "retryAfter": retry_after_secs }));
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        self.details.as_ref()
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_secs
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Build the serialisable envelope.
    pub fn body(&self) -> AuthErrorBody {
        AuthErrorBody {
            success: false,
            message: self.message.clone(),
            code: self.code().to_string(),
            status: self.status_code().as_u16(),
            details: self.details.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self.body())).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
