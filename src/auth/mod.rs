// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Request authentication for the WhatsApp service.
//!
//! ## Auth Flow
//!
//! 1. Portal or backend sends `Authorization: Bearer <JWT>`
//! 2. The per-IP limiter rejects callers over budget
//! 3. The authenticator:
//!    - rejects missing or structurally invalid credentials
//!    - looks the credential fingerprint up in the verification cache
//!    - on miss, verifies the HS256 signature, expiry and not-before
//!    - normalises the claims into a [`Principal`]
//! 4. Role gates check the principal's role against a per-route allow-list
//!
//! ## Security
//!
//! - Raw credentials are never stored or logged, only a SHA-256 prefix
//! - Cached principals never outlive their credential's `exp`
//! - Clock skew tolerance is 60 seconds

pub mod cache;
pub mod error;
pub mod extractor;
pub mod middleware;
pub mod principal;
pub mod roles;
pub mod verifier;

pub use cache::{credential_fingerprint, CacheStats, VerificationCache};
pub use error::{AuthError, AuthErrorBody, AuthErrorKind};
pub use extractor::{Auth, MaybeAuth};
pub use middleware::{
    limit_by_ip, require_auth, AuthMethod, AuthStatus, Authenticator, IpRateLimit,
};
pub use principal::{Principal, PrincipalKind};
pub use roles::{enforce_roles, require_roles, RoleGate, RoleGateError};
pub use verifier::{TokenVerifier, VerifyError};
