// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Each request moves through:
//!
//! ```text
//! no credential ──────────────────────────────► MISSING_TOKEN
//! Bearer <token> ─ shape check ─ bad shape ───► INVALID_TOKEN
//!                      │
//!                 fingerprint ─ cache hit ────► authenticated (cached)
//!                      │
//!                  verifier ─── ok ─ cache ───► authenticated (jwt)
//!                      └──────── err ─────────► mapped AuthError
//! ```
//!
//! On success the [`Principal`] and [`AuthMethod`] are inserted into the
//! request extensions; on failure the [`AuthError`] response is returned and
//! the downstream handler never runs. The raw credential is never logged.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::cache::{credential_fingerprint, CacheStats, VerificationCache};
use super::verifier::{TokenVerifier, VerifyError};
use super::{AuthError, Principal};
use crate::rate_limit::RateLimiter;

/// How the principal was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Served from the verification cache
    Cached,
    /// Signature verified on this request
    Jwt,
}

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub principal: Principal,
    pub method: AuthMethod,
}

/// Auth status for external monitoring.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    /// Whether a verification secret is configured
    pub jwt_enabled: bool,
    /// Whether verification results are cached
    pub cache_enabled: bool,
    /// Cache statistics (when enabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStats>,
}

/// Orchestrates credential extraction, caching and verification.
#[derive(Debug, Clone)]
pub struct Authenticator {
    verifier: Option<Arc<TokenVerifier>>,
    cache: Option<Arc<VerificationCache>>,
}

impl Authenticator {
    /// Create an authenticator.
    ///
    /// With no verifier every request is rejected with `AUTH_CONFIG_ERROR`.
    /// With no cache every request pays for signature verification.
    pub fn new(verifier: Option<TokenVerifier>, cache: Option<Arc<VerificationCache>>) -> Self {
        Self {
            verifier: verifier.map(Arc::new),
            cache,
        }
    }

    pub fn cache(&self) -> Option<&Arc<VerificationCache>> {
        self.cache.as_ref()
    }

    pub fn status(&self) -> AuthStatus {
        AuthStatus {
            jwt_enabled: self.verifier.is_some(),
            cache_enabled: self.cache.is_some(),
            cache_stats: self.cache.as_ref().map(|c| c.stats()),
        }
    }

    /// Authenticate a request from its headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Authenticated, AuthError> {
        let token = bearer_token(headers).ok_or_else(AuthError::missing_token)?;

        if !has_jwt_shape(token) {
            return Err(AuthError::invalid_token("malformed"));
        }

        let fingerprint = credential_fingerprint(token);

        if let Some(principal) = self.cache.as_ref().and_then(|c| c.get(&fingerprint)) {
            return Ok(Authenticated {
                principal,
                method: AuthMethod::Cached,
            });
        }

        let Some(verifier) = self.verifier.as_ref() else {
            error!("Access token secret is not configured; rejecting request");
            return Err(AuthError::config_error());
        };

        let principal = verifier.verify(token).map_err(|e| {
            let prefix = &fingerprint[..8];
            match &e {
                VerifyError::MalformedToken(detail) => {
                    warn!(fingerprint = prefix, detail = %detail, "Malformed credential");
                }
                other => warn!(fingerprint = prefix, reason = %other, "Credential rejected"),
            }
            map_verify_error(e)
        })?;

        if let Some(cache) = &self.cache {
            cache.set(fingerprint, principal.clone());
        }

        Ok(Authenticated {
            principal,
            method: AuthMethod::Jwt,
        })
    }
}

/// Translate a verifier failure into its client-facing error.
pub fn map_verify_error(err: VerifyError) -> AuthError {
    match err {
        VerifyError::MissingToken => AuthError::missing_token(),
        VerifyError::MalformedToken(_) => AuthError::invalid_token("malformed"),
        VerifyError::InvalidSignature => AuthError::invalid_token("invalid signature"),
        VerifyError::NotYetValid => AuthError::invalid_token("not yet valid"),
        VerifyError::ExpiredToken => AuthError::expired_token(),
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Cheap structural check: three non-empty base64url segments.
fn has_jwt_shape(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        })
}

/// Authentication middleware function.
pub async fn require_auth(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    match auth.authenticate(request.headers()) {
        Ok(Authenticated { principal, method }) => {
            info!(
                principal_kind = %principal.kind(),
                identifier = principal.identifier(),
                role = principal.role(),
                method = ?method,
                "Request authenticated"
            );
            request.extensions_mut().insert(principal);
            request.extensions_mut().insert(method);
            next.run(request).await
        }
        Err(err) => {
            warn!(
                code = err.code(),
                status = err.status_code().as_u16(),
                reason = %err,
                path = %request.uri().path(),
                "Request rejected by authentication"
            );
            err.into_response()
        }
    }
}

/// Client IP for rate limiting.
///
/// The socket peer address is used unless `trust_forwarded_for` is set, in
/// which case the first `X-Forwarded-For` hop wins. Only enable trust behind
/// a proxy that overwrites the header. Falls back to `unknown`.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-IP limiter plus the client IP policy.
#[derive(Debug, Clone)]
pub struct IpRateLimit {
    limiter: Arc<RateLimiter>,
    trust_forwarded_for: bool,
}

impl IpRateLimit {
    pub fn new(limiter: Arc<RateLimiter>, trust_forwarded_for: bool) -> Self {
        Self {
            limiter,
            trust_forwarded_for,
        }
    }
}

/// Per-IP rate limiting middleware. Runs before authentication.
pub async fn limit_by_ip(
    State(limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request, limit.trust_forwarded_for);
    match limit.limiter.enforce(&ip) {
        Ok(_) => next.run(request).await,
        Err(err) => {
            warn!(
                ip = %ip,
                path = %request.uri().path(),
                retry_after_secs = err.retry_after_secs(),
                "Request rejected by rate limiter"
            );
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verifier::test_support::{expired_token, sign, user_token, TEST_SECRET};
    use crate::auth::{AuthErrorKind, PrincipalKind};
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn authenticator() -> Authenticator {
        Authenticator::new(
            Some(TokenVerifier::new(TEST_SECRET)),
            Some(Arc::new(VerificationCache::new(100, Duration::from_secs(300)))),
        )
    }

    #[test]
    fn missing_header_is_missing_token() {
        let err = authenticator().authenticate(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::MissingToken);
    }

    #[test]
    fn other_scheme_or_empty_bearer_is_missing_token() {
        for value in ["Basic dXNlcjpwYXNz", "Bearer ", "Bearer    ", "bearer abc.def.ghi"] {
            let err = authenticator().authenticate(&headers(value)).unwrap_err();
            assert_eq!(err.kind(), AuthErrorKind::MissingToken, "{value}");
        }
    }

    #[test]
    fn garbage_is_rejected_before_verification() {
        let auth = authenticator();
        for value in ["Bearer not-a-jwt", "Bearer a..c", "Bearer a.b.c.d", "Bearer a.b!.c"] {
            let err = auth.authenticate(&headers(value)).unwrap_err();
            assert_eq!(err.kind(), AuthErrorKind::InvalidToken, "{value}");
            assert_eq!(err.details().unwrap()["reason"], "malformed");
        }
        // Rejected before touching the cache.
        assert_eq!(auth.status().cache_stats.unwrap().misses, 0);
    }

    #[test]
    fn expired_credential_is_expired_token() {
        let token = expired_token("a@example.com");
        let err = authenticator()
            .authenticate(&headers(&format!("Bearer {token}")))
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::ExpiredToken);
    }

    #[test]
    fn bad_signature_is_invalid_token() {
        let token = sign(
            &serde_json::json!({ "type": "user", "email": "a@example.com" }),
            "not-the-configured-secret-at-all",
        );
        let err = authenticator()
            .authenticate(&headers(&format!("Bearer {token}")))
            .unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::InvalidToken);
        assert_eq!(err.details().unwrap()["reason"], "invalid signature");
    }

    #[test]
    fn second_request_is_served_from_cache_with_same_principal() {
        let auth = authenticator();
        let h = headers(&format!("Bearer {}", user_token("tenant@example.com", "tenant")));

        let cold = auth.authenticate(&h).unwrap();
        let warm = auth.authenticate(&h).unwrap();

        assert_eq!(cold.method, AuthMethod::Jwt);
        assert_eq!(warm.method, AuthMethod::Cached);
        assert_eq!(cold.principal, warm.principal);
        assert_eq!(warm.principal.kind(), PrincipalKind::User);
        assert_eq!(warm.principal.identifier(), "tenant@example.com");
        assert_eq!(warm.principal.role(), "tenant");
    }

    #[test]
    fn works_without_cache() {
        let auth = Authenticator::new(Some(TokenVerifier::new(TEST_SECRET)), None);
        let h = headers(&format!("Bearer {}", user_token("a@example.com", "user")));
        assert_eq!(auth.authenticate(&h).unwrap().method, AuthMethod::Jwt);
        assert_eq!(auth.authenticate(&h).unwrap().method, AuthMethod::Jwt);
        assert!(!auth.status().cache_enabled);
    }

    #[test]
    fn missing_secret_is_config_error() {
        let auth = Authenticator::new(None, None);
        let h = headers(&format!("Bearer {}", user_token("a@example.com", "user")));
        let err = auth.authenticate(&h).unwrap_err();
        assert_eq!(err.kind(), AuthErrorKind::AuthConfigError);
        assert!(!auth.status().jwt_enabled);
    }

    #[test]
    fn verifier_errors_map_to_taxonomy() {
        let cases = [
            (VerifyError::MissingToken, AuthErrorKind::MissingToken),
            (VerifyError::MalformedToken("x".into()), AuthErrorKind::InvalidToken),
            (VerifyError::InvalidSignature, AuthErrorKind::InvalidToken),
            (VerifyError::NotYetValid, AuthErrorKind::InvalidToken),
            (VerifyError::ExpiredToken, AuthErrorKind::ExpiredToken),
        ];
        for (err, kind) in cases {
            assert_eq!(map_verify_error(err).kind(), kind);
        }
    }

    fn peer_request(peer: [u8; 4], forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder();
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(axum::body::Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 4000))));
        request
    }

    #[test]
    fn client_ip_ignores_forwarded_header_by_default() {
        let request = peer_request([192, 0, 2, 1], Some("203.0.113.7"));
        assert_eq!(client_ip(&request, false), "192.0.2.1");

        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, false), "unknown");
    }

    #[test]
    fn client_ip_uses_first_forwarded_hop_when_trusted() {
        let request = peer_request([192, 0, 2, 1], Some("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&request, true), "203.0.113.7");

        let request = peer_request([192, 0, 2, 1], None);
        assert_eq!(client_ip(&request, true), "192.0.2.1");
    }
}
