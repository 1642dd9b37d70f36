// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{Authenticator, IpRateLimit, TokenVerifier, VerificationCache};
use crate::config::{Config, ConfigReport};
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub ip_limiter: Arc<RateLimiter>,
    pub phone_limiter: Arc<RateLimiter>,
    pub trust_forwarded_for: bool,
    pub config_report: Arc<ConfigReport>,
}

impl AppState {
    /// Build shared state from validated configuration.
    pub fn from_config(config: &Config) -> Self {
        let verifier = config.access_token_secret.as_deref().map(TokenVerifier::new);
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(VerificationCache::new(config.cache.max_size, config.cache.ttl)));

        Self {
            authenticator: Arc::new(Authenticator::new(verifier, cache)),
            ip_limiter: Arc::new(RateLimiter::new("ip", config.ip_rate_limit)),
            phone_limiter: Arc::new(RateLimiter::new("phone", config.phone_rate_limit)),
            trust_forwarded_for: config.trust_forwarded_for,
            config_report: Arc::new(config.validate()),
        }
    }

    /// Per-IP limiting layer state.
    pub fn ip_rate_limit(&self) -> IpRateLimit {
        IpRateLimit::new(self.ip_limiter.clone(), self.trust_forwarded_for)
    }

    pub fn cache(&self) -> Option<Arc<VerificationCache>> {
        self.authenticator.cache().cloned()
    }
}
