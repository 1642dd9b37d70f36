// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token claims and the normalised principal attached to requests.
//!
//! Credentials come in two shapes:
//!
//! - **Typed** claim sets carry a `type` discriminator (`user`,
//!   `application`, `service`) and type-specific identifying fields.
//! - **Legacy** claim sets predate the discriminator and always describe a
//!   user identified by `email` or `sub`/`subject`. Older credentials in this
//!   shape are still presented by deployed clients and must keep working.
//!
//! Both shapes are decoded once into [`TokenClaims`] at the verifier
//! boundary and normalised into a [`Principal`]; nothing downstream sees the
//! raw shape.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role assigned when the credential carries none.
pub const DEFAULT_ROLE: &str = "user";

/// Clock skew tolerance for `exp`/`nbf`, in seconds.
pub const CLOCK_SKEW_LEEWAY: i64 = 60;

/// Claim set as it appears in the credential payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(default, rename = "serviceId")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
}

/// Decoded claim shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClaims {
    User {
        email: Option<String>,
        phone: Option<String>,
    },
    Application {
        client_id: String,
    },
    Service {
        service_id: String,
        realm: Option<String>,
    },
    /// Claim set without a `type` discriminator.
    LegacyUser {
        email: Option<String>,
        subject: Option<String>,
    },
}

/// The claim set does not describe any known principal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised principal claims")]
pub struct UnrecognisedClaims;

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<&RawClaims> for TokenClaims {
    type Error = UnrecognisedClaims;

    fn try_from(raw: &RawClaims) -> Result<Self, Self::Error> {
        let claims = match raw.token_type.as_deref() {
            Some("user") => TokenClaims::User {
                email: non_empty(raw.email.clone()),
                phone: non_empty(raw.phone.clone()),
            },
            Some("application") => TokenClaims::Application {
                client_id: non_empty(raw.client_id.clone()).ok_or(UnrecognisedClaims)?,
            },
            Some("service") => TokenClaims::Service {
                service_id: non_empty(raw.service_id.clone()).ok_or(UnrecognisedClaims)?,
                realm: non_empty(raw.realm.clone()),
            },
            Some(_) => return Err(UnrecognisedClaims),
            None => TokenClaims::LegacyUser {
                email: non_empty(raw.email.clone()),
                subject: non_empty(raw.sub.clone()).or_else(|| non_empty(raw.subject.clone())),
            },
        };
        Ok(claims)
    }
}

/// Kind of authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Application,
    Service,
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalKind::User => write!(f, "user"),
            PrincipalKind::Application => write!(f, "application"),
            PrincipalKind::Service => write!(f, "service"),
        }
    }
}

/// Authenticated identity attached to a request.
///
/// Fields are private and set once at construction; a principal never
/// changes for the lifetime of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    /// Principal kind
    kind: PrincipalKind,
    /// Email/phone for users, client id for applications, service id for services
    identifier: String,
    /// Role used by route gates
    role: String,
    /// Service realm (service principals only)
    #[serde(skip_serializing_if = "Option::is_none")]
    realm: Option<String>,
    /// Credential expiry (Unix seconds), not serialised
    #[serde(skip)]
    expires_at: Option<i64>,
}

impl Principal {
    /// Create a principal directly. An empty role falls back to
    /// [`DEFAULT_ROLE`].
    pub fn new(kind: PrincipalKind, identifier: impl Into<String>, role: impl Into<String>) -> Self {
        let role = role.into();
        Self {
            kind,
            identifier: identifier.into(),
            role: if role.trim().is_empty() {
                DEFAULT_ROLE.to_string()
            } else {
                role
            },
            realm: None,
            expires_at: None,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Normalise decoded claims.
    pub fn from_claims(
        claims: TokenClaims,
        role: Option<String>,
        expires_at: Option<i64>,
    ) -> Result<Self, UnrecognisedClaims> {
        let role = non_empty(role).unwrap_or_else(|| DEFAULT_ROLE.to_string());

        let (kind, identifier, realm) = match claims {
            TokenClaims::User { email, phone } => {
                (PrincipalKind::User, email.or(phone).ok_or(UnrecognisedClaims)?, None)
            }
            TokenClaims::Application { client_id } => (PrincipalKind::Application, client_id, None),
            TokenClaims::Service { service_id, realm } => {
                (PrincipalKind::Service, service_id, realm)
            }
            TokenClaims::LegacyUser { email, subject } => {
                (PrincipalKind::User, email.or(subject).ok_or(UnrecognisedClaims)?, None)
            }
        };

        Ok(Self {
            kind,
            identifier,
            role,
            realm,
            expires_at,
        })
    }

    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Whether the underlying credential has expired at `now` (Unix seconds),
    /// with the same skew tolerance the verifier applies.
    pub fn credential_expired_at(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| exp < now.saturating_sub(CLOCK_SKEW_LEEWAY))
    }

    /// Check if the principal's role is in `roles`.
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| r == &self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> RawClaims {
        serde_json::from_value(json).unwrap()
    }

    fn principal_from(json: serde_json::Value) -> Result<Principal, UnrecognisedClaims> {
        let raw = raw(json);
        let claims = TokenClaims::try_from(&raw)?;
        Principal::from_claims(claims, raw.role.clone(), raw.exp)
    }

    #[test]
    fn user_claims_prefer_email() {
        let p = principal_from(serde_json::json!({
            "type": "user",
            "email": "tenant@example.com",
            "phone": "+33600000000",
            "role": "tenant"
        }))
        .unwrap();
        assert_eq!(p.kind(), PrincipalKind::User);
        assert_eq!(p.identifier(), "tenant@example.com");
        assert_eq!(p.role(), "tenant");
    }

    #[test]
    fn user_claims_fall_back_to_phone() {
        let p = principal_from(serde_json::json!({ "type": "user", "phone": "+33600000000" }))
            .unwrap();
        assert_eq!(p.identifier(), "+33600000000");
    }

    #[test]
    fn application_claims_use_client_id() {
        let p = principal_from(serde_json::json!({ "type": "application", "clientId": "cli_1" }))
            .unwrap();
        assert_eq!(p.kind(), PrincipalKind::Application);
        assert_eq!(p.identifier(), "cli_1");
    }

    #[test]
    fn service_claims_carry_realm() {
        let p = principal_from(serde_json::json!({
            "type": "service",
            "serviceId": "gateway",
            "realm": "internal"
        }))
        .unwrap();
        assert_eq!(p.kind(), PrincipalKind::Service);
        assert_eq!(p.identifier(), "gateway");
        assert_eq!(p.realm(), Some("internal"));
    }

    #[test]
    fn legacy_claims_default_to_user() {
        let p = principal_from(serde_json::json!({ "email": "landlord@example.com" })).unwrap();
        assert_eq!(p.kind(), PrincipalKind::User);
        assert_eq!(p.identifier(), "landlord@example.com");

        let p = principal_from(serde_json::json!({ "sub": "user_123" })).unwrap();
        assert_eq!(p.identifier(), "user_123");

        let p = principal_from(serde_json::json!({ "subject": "user_456" })).unwrap();
        assert_eq!(p.identifier(), "user_456");
    }

    #[test]
    fn role_defaults_to_user() {
        let p = principal_from(serde_json::json!({ "email": "a@example.com" })).unwrap();
        assert_eq!(p.role(), DEFAULT_ROLE);

        let p = principal_from(serde_json::json!({ "email": "a@example.com", "role": "" }))
            .unwrap();
        assert_eq!(p.role(), DEFAULT_ROLE);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(
            principal_from(serde_json::json!({ "type": "robot", "email": "a@example.com" })),
            Err(UnrecognisedClaims)
        );
    }

    #[test]
    fn missing_identifier_is_rejected() {
        assert!(principal_from(serde_json::json!({ "type": "application" })).is_err());
        assert!(principal_from(serde_json::json!({ "type": "user" })).is_err());
        assert!(principal_from(serde_json::json!({ "role": "admin" })).is_err());
    }

    #[test]
    fn has_any_role_matches_exactly() {
        let p = Principal::new(PrincipalKind::User, "a@example.com", "tenant");
        assert!(p.has_any_role(&["tenant".to_string(), "landlord".to_string()]));
        assert!(!p.has_any_role(&["landlord".to_string()]));
        assert!(!p.has_any_role(&["Tenant".to_string()]));
    }

    #[test]
    fn credential_expiry_is_tracked() {
        let p = Principal::new(PrincipalKind::User, "a@example.com", "user").with_expiry(100);
        assert!(!p.credential_expired_at(99));
        // Inside the skew window the credential is still accepted.
        assert!(!p.credential_expired_at(100));
        assert!(!p.credential_expired_at(100 + CLOCK_SKEW_LEEWAY));
        assert!(p.credential_expired_at(101 + CLOCK_SKEW_LEEWAY));

        let no_exp = Principal::new(PrincipalKind::User, "a@example.com", "user");
        assert!(!no_exp.credential_expired_at(i64::MAX));
    }

    #[test]
    fn serialises_without_expiry() {
        let p = Principal::new(PrincipalKind::Service, "svc", "admin")
            .with_realm("ops")
            .with_expiry(1);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "service");
        assert_eq!(json["identifier"], "svc");
        assert_eq!(json["role"], "admin");
        assert_eq!(json["realm"], "ops");
        assert!(json.get("expires_at").is_none());
    }
}
