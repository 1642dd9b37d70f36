// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info_span, Span};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{
        enforce_roles, limit_by_ip, require_auth, require_roles, AuthErrorBody, AuthErrorKind,
        AuthMethod, AuthStatus, CacheStats, Principal, PrincipalKind, RoleGateError,
    },
    state::AppState,
};

pub mod admin;
pub mod health;
pub mod otp;
pub mod session;
pub mod status;

/// Roles allowed on `/v1/admin/*`.
pub const ADMIN_ROLES: &[&str] = &["admin"];

/// Build the HTTP router.
///
/// Middleware order per route group is: per-IP limit, then authentication,
/// then the role gate. Fails only if a role gate is misconfigured.
pub fn router(state: AppState) -> Result<Router, RoleGateError> {
    let ip_limit = from_fn_with_state(state.ip_rate_limit(), limit_by_ip);
    let authenticate = from_fn_with_state(state.authenticator.clone(), require_auth);
    let admin_gate = from_fn_with_state(require_roles(ADMIN_ROLES.iter().copied())?, enforce_roles);

    let public = Router::new()
        .route("/auth/status", get(status::auth_status))
        .route_layer(ip_limit.clone());

    let authenticated = Router::new()
        .route("/me", get(session::me))
        .route("/otp/attempts", post(otp::record_attempt))
        .route_layer(authenticate.clone())
        .route_layer(ip_limit.clone());

    let admin = Router::new()
        .route("/admin/auth-cache", delete(admin::clear_auth_cache))
        .route_layer(admin_gate)
        .route_layer(authenticate)
        .route_layer(ip_limit);

    let v1_routes = public.merge(authenticated).merge(admin);

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(CorsLayer::permissive()),
        );

    Ok(app)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        status::auth_status,
        session::me,
        otp::record_attempt,
        admin::clear_auth_cache
    ),
    components(
        schemas(
            AuthErrorBody,
            AuthErrorKind,
            AuthMethod,
            AuthStatus,
            CacheStats,
            Principal,
            PrincipalKind,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            session::SessionResponse,
            otp::OtpAttemptRequest,
            otp::OtpAttemptResponse,
            admin::ClearCacheResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Authentication status and session"),
        (name = "OTP", description = "OTP attempt throttling"),
        (name = "Admin", description = "Operational tooling")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verifier::test_support::{expired_token, sign, user_token, TEST_SECRET};
    use crate::config::Config;
    use crate::rate_limit::RateLimit;
    use axum::{
        body::to_bytes,
        extract::ConnectInfo,
        http::{header, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tower::ServiceExt;

    // Long window so a test run never straddles a boundary.
    const TEST_WINDOW: Duration = Duration::from_secs(10 * 24 * 3600);

    fn test_config() -> Config {
        Config {
            access_token_secret: Some(TEST_SECRET.to_string()),
            ip_rate_limit: RateLimit::new(100, TEST_WINDOW),
            phone_rate_limit: RateLimit::new(3, TEST_WINDOW),
            ..Config::default()
        }
    }

    fn app_with(config: &Config) -> (Router, AppState) {
        let state = AppState::from_config(config);
        (router(state.clone()).unwrap(), state)
    }

    const PEER: [u8; 4] = [198, 51, 100, 1];

    fn from_peer(mut request: Request<Body>, peer: [u8; 4]) -> Request<Body> {
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40_000))));
        request
    }

    fn get_request(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        from_peer(builder.body(Body::empty()).unwrap(), PEER)
    }

    async fn call(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (app, _) = app_with(&test_config());
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn liveness_and_readiness() {
        let (app, _) = app_with(&test_config());
        let live = call(&app, get_request("/health/live", None)).await;
        assert_eq!(live.status(), StatusCode::OK);

        let ready = call(&app, get_request("/health/ready", None)).await;
        assert_eq!(ready.status(), StatusCode::OK);

        let (unconfigured, _) = app_with(&Config::default());
        let ready = call(&unconfigured, get_request("/health/ready", None)).await;
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(ready).await;
        assert_eq!(body["checks"]["authConfig"], "invalid");
        // Configuration details stay in the logs.
        assert!(body["checks"].get("issues").is_none());
        assert!(!body.to_string().contains("ACCESS_TOKEN_SECRET"));
    }

    #[tokio::test]
    async fn no_header_is_missing_token() {
        let (app, _) = app_with(&test_config());
        let response = call(&app, get_request("/v1/me", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "MISSING_TOKEN");
        assert_eq!(body["status"], 401);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_token() {
        let (app, _) = app_with(&test_config());
        let response = call(&app, get_request("/v1/me", Some("not-a-jwt"))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn expired_token_is_expired_token() {
        let (app, _) = app_with(&test_config());
        let token = expired_token("tenant@example.com");
        let response = call(&app, get_request("/v1/me", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "EXPIRED_TOKEN");
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (app, state) = app_with(&test_config());
        let token = user_token("tenant@example.com", "tenant");

        let first = json_body(call(&app, get_request("/v1/me", Some(&token))).await).await;
        let second = json_body(call(&app, get_request("/v1/me", Some(&token))).await).await;

        assert_eq!(first["authMethod"], "jwt");
        assert_eq!(second["authMethod"], "cached");
        assert_eq!(first["principal"], second["principal"]);
        assert_eq!(second["principal"]["kind"], "user");
        assert_eq!(second["principal"]["identifier"], "tenant@example.com");
        assert_eq!(second["principal"]["role"], "tenant");

        let stats = state.cache().unwrap().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn application_principal_is_echoed() {
        let (app, _) = app_with(&test_config());
        let exp = chrono::Utc::now().timestamp() + 600;
        let token = sign(
            &json!({ "type": "application", "clientId": "portal", "role": "service", "exp": exp }),
            TEST_SECRET,
        );
        let body = json_body(call(&app, get_request("/v1/me", Some(&token))).await).await;
        assert_eq!(body["principal"]["kind"], "application");
        assert_eq!(body["principal"]["identifier"], "portal");
    }

    #[tokio::test]
    async fn ip_limit_rejects_request_over_budget() {
        let (app, _) = app_with(&test_config());
        for _ in 0..100 {
            let response = call(&app, get_request("/v1/auth/status", None)).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = call(&app, get_request("/v1/auth/status", None)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0);

        let body = json_body(response).await;
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["details"]["retryAfter"], retry_after);
    }

    #[tokio::test]
    async fn authenticated_caller_is_limited_on_call_over_budget() {
        let (app, _) = app_with(&test_config());
        let token = user_token("tenant@example.com", "tenant");

        for _ in 0..100 {
            let response = call(&app, get_request("/v1/me", Some(&token))).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = call(&app, get_request("/v1/me", Some(&token))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(response).await;
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert!(body["details"]["retryAfter"].as_u64().unwrap() > 0);
    }

    fn forwarded_request(forwarded: &str) -> Request<Body> {
        let request = Request::get("/v1/auth/status")
            .header("x-forwarded-for", forwarded)
            .body(Body::empty())
            .unwrap();
        from_peer(request, PEER)
    }

    #[tokio::test]
    async fn rotating_forwarded_for_does_not_reset_budget() {
        let config = Config {
            ip_rate_limit: RateLimit::new(2, TEST_WINDOW),
            ..test_config()
        };
        let (app, state) = app_with(&config);

        let accepted = {
            let mut accepted = 0;
            for i in 0..50 {
                let response = call(&app, forwarded_request(&format!("203.0.113.{i}"))).await;
                if response.status() == StatusCode::OK {
                    accepted += 1;
                }
            }
            accepted
        };

        assert_eq!(accepted, 2);
        assert_eq!(state.ip_limiter.tracked_windows(), 1);
    }

    #[tokio::test]
    async fn forwarded_for_is_honoured_when_trusted() {
        let config = Config {
            ip_rate_limit: RateLimit::new(1, TEST_WINDOW),
            trust_forwarded_for: true,
            ..test_config()
        };
        let (app, _) = app_with(&config);

        let first = call(&app, forwarded_request("203.0.113.1")).await;
        assert_eq!(first.status(), StatusCode::OK);
        let repeat = call(&app, forwarded_request("203.0.113.1")).await;
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
        let other = call(&app, forwarded_request("203.0.113.2")).await;
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ip_limit_runs_before_authentication() {
        let config = Config {
            ip_rate_limit: RateLimit::new(1, TEST_WINDOW),
            ..test_config()
        };
        let (app, _) = app_with(&config);

        let first = call(&app, get_request("/v1/me", None)).await;
        assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
        let second = call(&app, get_request("/v1/me", None)).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn auth_status_reports_cache() {
        let (app, _) = app_with(&test_config());
        let body = json_body(call(&app, get_request("/v1/auth/status", None)).await).await;
        assert_eq!(body["jwtEnabled"], true);
        assert_eq!(body["cacheEnabled"], true);
        assert_eq!(body["cacheStats"]["maxSize"], 1000);
    }

    fn delete_cache(token: &str) -> Request<Body> {
        Request::delete("/v1/admin/auth-cache")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn admin_gate_rejects_tenant() {
        let (app, _) = app_with(&test_config());
        let response = call(&app, delete_cache(&user_token("tenant@example.com", "tenant"))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = json_body(response).await;
        assert_eq!(body["code"], "INSUFFICIENT_PERMISSIONS");
        assert_eq!(body["details"]["requiredRoles"], json!(["admin"]));
    }

    #[tokio::test]
    async fn admin_clears_cache() {
        let (app, state) = app_with(&test_config());
        let tenant = user_token("tenant@example.com", "tenant");
        call(&app, get_request("/v1/me", Some(&tenant))).await;

        let response = call(&app, delete_cache(&user_token("ops@example.com", "admin"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        // Tenant entry plus the admin's own entry, cached on the way in.
        assert_eq!(json_body(response).await["removed"], 2);
        assert!(state.cache().unwrap().is_empty());
    }

    fn otp_request(token: &str, phone: &str) -> Request<Body> {
        Request::post("/v1/otp/attempts")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "phone": phone }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn otp_attempts_are_limited_per_phone() {
        let (app, _) = app_with(&test_config());
        let token = user_token("portal@example.com", "user");

        for expected_remaining in [2, 1, 0] {
            let response = call(&app, otp_request(&token, "+44 7700 900123")).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["allowed"], true);
            assert_eq!(body["remaining"], expected_remaining);
        }

        // Same number, different formatting.
        let response = call(&app, otp_request(&token, "+447700900123")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = call(&app, otp_request(&token, "+447700900124")).await;
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn otp_malformed_body_uses_error_envelope() {
        let (app, _) = app_with(&test_config());
        let token = user_token("portal@example.com", "user");
        let request = Request::post("/v1/otp/attempts")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"phone\":"))
            .unwrap();

        let response = call(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "INVALID_REQUEST_BODY");
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn otp_rejects_invalid_phone() {
        let (app, _) = app_with(&test_config());
        let token = user_token("portal@example.com", "user");
        let response = call(&app, otp_request(&token, "call me")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "INVALID_PHONE");
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let (app, _) = app_with(&test_config());
        let response = call(&app, get_request("/health/live", None)).await;
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[test]
    fn openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/v1/me", "/v1/otp/attempts", "/v1/admin/auth-cache"] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }
}
