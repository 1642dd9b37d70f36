// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Fixed-Window Rate Limiting
//!
//! Counts attempts per identifier (client IP, phone number) in disjoint time
//! windows keyed by `floor(now / window)`. Once a window's count reaches the
//! limit, further attempts in that window are rejected until it closes.
//!
//! ## Known limitation
//!
//! Counts do not carry over between windows, so a client can spend its whole
//! budget at the end of one window and again at the start of the next, up to
//! `2 × max` attempts around a boundary.
//!
//! ## Cleanup
//!
//! Windows that closed more than one window-length ago are dropped every
//! [`PURGE_EVERY`] checks and by the periodic maintenance sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;

use crate::auth::AuthError;

/// Opportunistic purge frequency, in checks.
pub const PURGE_EVERY: u64 = 100;

/// Attempts allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX).max(1)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    /// Attempts left in the current window
    pub remaining: u32,
    /// Seconds until the current window closes (set when limited)
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    identifier: String,
    window_ms: i64,
    index: i64,
}

/// Shared fixed-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    default_limit: RateLimit,
    windows: Mutex<HashMap<WindowKey, u32>>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter. `name` labels log lines (`ip`, `phone`).
    pub fn new(name: &'static str, default_limit: RateLimit) -> Self {
        Self {
            name,
            default_limit,
            windows: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_limit(&self) -> RateLimit {
        self.default_limit
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, u32>> {
        self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an attempt under the default limit.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_with(identifier, self.default_limit)
    }

    /// Record an attempt under an explicit limit.
    pub fn check_with(&self, identifier: &str, limit: RateLimit) -> RateLimitDecision {
        self.check_at(identifier, limit, Utc::now().timestamp_millis())
    }

    /// Record an attempt at `now_ms` (Unix milliseconds).
    pub fn check_at(&self, identifier: &str, limit: RateLimit, now_ms: i64) -> RateLimitDecision {
        let window_ms = limit.window_ms();
        let index = now_ms.div_euclid(window_ms);
        let key = WindowKey {
            identifier: identifier.to_string(),
            window_ms,
            index,
        };

        let decision = {
            let mut windows = self.lock();
            let count = windows.entry(key).or_insert(0);
            if *count >= limit.max {
                let window_end = index.saturating_add(1).saturating_mul(window_ms);
                let remaining_ms = (window_end - now_ms).max(0);
                let retry_after = u64::try_from((remaining_ms + 999) / 1000).unwrap_or(1).max(1);
                RateLimitDecision {
                    limited: true,
                    remaining: 0,
                    retry_after_secs: Some(retry_after),
                }
            } else {
                *count += 1;
                RateLimitDecision {
                    limited: false,
                    remaining: limit.max - *count,
                    retry_after_secs: None,
                }
            }
        };

        if self.checks.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_stale_at(now_ms);
        }

        decision
    }

    /// Record an attempt under the default limit, converting a rejection into
    /// [`AuthError::rate_limit_exceeded`]. Callers log the rejection.
    pub fn enforce(&self, identifier: &str) -> Result<RateLimitDecision, AuthError> {
        let decision = self.check(identifier);
        match decision.retry_after_secs {
            Some(retry_after) if decision.limited => {
                Err(AuthError::rate_limit_exceeded(retry_after))
            }
            _ => Ok(decision),
        }
    }

    /// Drop windows that closed more than one window-length before `now_ms`.
    pub fn purge_stale_at(&self, now_ms: i64) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|key, _| {
            let start = key.index.saturating_mul(key.window_ms);
            start >= now_ms.saturating_sub(key.window_ms.saturating_mul(2))
        });
        before - windows.len()
    }

    pub fn purge_stale(&self) -> usize {
        self.purge_stale_at(Utc::now().timestamp_millis())
    }

    /// Number of tracked windows.
    pub fn tracked_windows(&self) -> usize {
        self.lock().len()
    }
}
