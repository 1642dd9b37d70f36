// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer credential verification.
//!
//! Credentials are HS256-signed JWTs. `jsonwebtoken` checks structure and
//! signature; expiry and not-before are checked here against the supplied
//! clock so that verification is a pure function of
//! `(credential, secret, now)`.

use std::collections::HashSet;

use chrono::Utc;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};

use super::principal::{Principal, RawClaims, TokenClaims, CLOCK_SKEW_LEEWAY};

/// Verification failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// No credential presented
    #[error("no credential presented")]
    MissingToken,
    /// Credential does not have the expected structure or claims
    #[error("malformed credential: {0}")]
    MalformedToken(String),
    /// Signature valid but `exp` is in the past
    #[error("credential has expired")]
    ExpiredToken,
    /// Signature does not verify
    #[error("credential signature is invalid")]
    InvalidSignature,
    /// `nbf` is in the future
    #[error("credential is not yet valid")]
    NotYetValid,
}

/// Verifies credentials against the process-wide access token secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time-based claims are checked in `verify_at`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a credential at the current time.
    pub fn verify(&self, token: &str) -> Result<Principal, VerifyError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a credential at `now` (Unix seconds).
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Principal, VerifyError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(VerifyError::MissingToken);
        }
        if token.split('.').count() != 3 {
            return Err(VerifyError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        }

        let data = decode::<RawClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    VerifyError::InvalidSignature
                }
                ErrorKind::ExpiredSignature => VerifyError::ExpiredToken,
                ErrorKind::ImmatureSignature => VerifyError::NotYetValid,
                _ => VerifyError::MalformedToken(e.to_string()),
            }
        })?;
        let raw = data.claims;

        if let Some(exp) = raw.exp {
            if exp < now - CLOCK_SKEW_LEEWAY {
                return Err(VerifyError::ExpiredToken);
            }
        }
        if let Some(nbf) = raw.nbf {
            if nbf > now + CLOCK_SKEW_LEEWAY {
                return Err(VerifyError::NotYetValid);
            }
        }

        let claims =
            TokenClaims::try_from(&raw).map_err(|e| VerifyError::MalformedToken(e.to_string()))?;
        Principal::from_claims(claims, raw.role, raw.exp)
            .map_err(|e| VerifyError::MalformedToken(e.to_string()))
    }
}
