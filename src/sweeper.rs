// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Maintenance Sweeper
//!
//! Background task that bounds memory held by the verification cache and the
//! rate limiters. Lookups already ignore stale state; the sweep only frees it.
//!
//! Every `interval` (default 60 s) the sweeper:
//! 1. Drops cache entries past their TTL or their credential's `exp`.
//! 2. Drops rate-limit windows that closed more than one window ago.
//!
//! Stops when the shutdown token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::VerificationCache;
use crate::rate_limit::RateLimiter;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cache_entries: usize,
    pub limiter_windows: usize,
}

pub struct MaintenanceSweeper {
    cache: Option<Arc<VerificationCache>>,
    limiters: Vec<Arc<RateLimiter>>,
    interval: Duration,
}

impl MaintenanceSweeper {
    pub fn new(cache: Option<Arc<VerificationCache>>, limiters: Vec<Arc<RateLimiter>>) -> Self {
        Self {
            cache,
            limiters,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Maintenance sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Maintenance sweeper shutting down");
                    return;
                }
            }

            self.sweep();
        }
    }

    /// Execute one sweep.
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            cache_entries: self.cache.as_ref().map_or(0, |c| c.purge_expired()),
            limiter_windows: self.limiters.iter().map(|l| l.purge_stale()).sum(),
        };

        if report != SweepReport::default() {
            debug!(
                cache_entries = report.cache_entries,
                limiter_windows = report.limiter_windows,
                "Swept expired auth state"
            );
        }
        report
    }
}
