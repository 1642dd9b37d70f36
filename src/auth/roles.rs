// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Route-level role gates.
//!
//! A [`RoleGate`] restricts a router subtree to an allow-list of roles. It
//! must run after [`require_auth`](super::middleware::require_auth):
//!
//! ```rust,ignore
//! let gate = RoleGate::new(["landlord", "admin"])?;
//!
//! let routes = Router::new()
//!     .route("/properties", get(list_properties))
//!     .route_layer(axum::middleware::from_fn_with_state(gate, enforce_roles))
//!     .route_layer(axum::middleware::from_fn_with_state(authenticator, require_auth));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::{AuthError, Principal};

/// Role gate construction failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoleGateError {
    #[error("role gate requires at least one allowed role")]
    EmptyAllowList,
}

/// Allow-list of roles for a route.
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<[String]>,
}

impl RoleGate {
    /// Create a gate. Fails when `roles` is empty or contains only blank
    /// entries.
    pub fn new<I, S>(roles: I) -> Result<Self, RoleGateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<String> = roles
            .into_iter()
            .map(Into::into)
            .filter(|r| !r.trim().is_empty())
            .collect();

        if allowed.is_empty() {
            return Err(RoleGateError::EmptyAllowList);
        }
        Ok(Self {
            allowed: allowed.into(),
        })
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Decide whether `principal` may pass.
    pub fn check(&self, principal: Option<&Principal>) -> Result<(), AuthError> {
        let principal = principal.ok_or_else(AuthError::auth_required)?;
        if principal.has_any_role(&self.allowed) {
            Ok(())
        } else {
            Err(AuthError::insufficient_permissions(&self.allowed))
        }
    }
}

/// Shorthand for [`RoleGate::new`].
pub fn require_roles<I, S>(roles: I) -> Result<RoleGate, RoleGateError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    RoleGate::new(roles)
}

/// Role gate middleware.
pub async fn enforce_roles(State(gate): State<RoleGate>, request: Request, next: Next) -> Response {
    let principal = request.extensions().get::<Principal>();
    match gate.check(principal) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(
                code = err.code(),
                principal_kind = ?principal.map(Principal::kind),
                identifier = ?principal.map(Principal::identifier),
                role = ?principal.map(Principal::role),
                required_roles = ?gate.allowed(),
                "Request rejected by role gate"
            );
            err.into_response()
        }
    }
}
