// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WhatsApp Service Auth - request authentication layer
//!
//! Authenticates calls from the portal and backend to the WhatsApp service:
//! bearer-credential verification with a bounded verification cache, a
//! closed error taxonomy, fixed-window rate limiting per IP and per phone
//! number, and route-level role gates.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Credential verification, caching, middleware and role gates
//! - `config` - Environment configuration and startup validation
//! - `rate_limit` - Fixed-window rate limiter
//! - `sweeper` - Background expiry sweep

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod state;
pub mod sweeper;
pub mod telemetry;
