// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ACCESS_TOKEN_SECRET` | HMAC secret for bearer credentials | Required |
//! | `AUTH_CACHE_ENABLED` | Cache verification results | `true` |
//! | `AUTH_CACHE_TTL_SECS` | Verification cache TTL | `300` |
//! | `AUTH_CACHE_MAX_SIZE` | Verification cache capacity | `1000` |
//! | `AUTH_SWEEP_INTERVAL_SECS` | Expiry sweep interval | `60` |
//! | `IP_RATE_LIMIT_MAX` | Requests per IP per window | `100` |
//! | `IP_RATE_LIMIT_WINDOW_MS` | Per-IP window length | `60000` |
//! | `PHONE_RATE_LIMIT_MAX` | OTP attempts per phone per window | `3` |
//! | `PHONE_RATE_LIMIT_WINDOW_MS` | Per-phone window length | `600000` |
//! | `TRUST_FORWARDED_FOR` | Take the client IP from `X-Forwarded-For` | `false` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` | PEM certificate chain (enables HTTPS) | Optional |
//! | `TLS_KEY_PATH` | PEM private key (enables HTTPS) | Optional |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use crate::rate_limit::RateLimit;

pub const ACCESS_TOKEN_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
pub const AUTH_CACHE_ENABLED_ENV: &str = "AUTH_CACHE_ENABLED";
pub const AUTH_CACHE_TTL_SECS_ENV: &str = "AUTH_CACHE_TTL_SECS";
pub const AUTH_CACHE_MAX_SIZE_ENV: &str = "AUTH_CACHE_MAX_SIZE";
pub const AUTH_SWEEP_INTERVAL_SECS_ENV: &str = "AUTH_SWEEP_INTERVAL_SECS";
pub const IP_RATE_LIMIT_MAX_ENV: &str = "IP_RATE_LIMIT_MAX";
pub const IP_RATE_LIMIT_WINDOW_MS_ENV: &str = "IP_RATE_LIMIT_WINDOW_MS";
pub const PHONE_RATE_LIMIT_MAX_ENV: &str = "PHONE_RATE_LIMIT_MAX";
pub const PHONE_RATE_LIMIT_WINDOW_MS_ENV: &str = "PHONE_RATE_LIMIT_WINDOW_MS";
pub const TRUST_FORWARDED_FOR_ENV: &str = "TRUST_FORWARDED_FOR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";

/// Recommended minimum secret length.
pub const MIN_SECRET_LEN: usize = 32;

/// Cache TTLs above this are flagged at startup.
const MAX_RECOMMENDED_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Configuration parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Verification cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_size: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Service configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub access_token_secret: Option<String>,
    pub cache: CacheConfig,
    pub ip_rate_limit: RateLimit,
    pub phone_rate_limit: RateLimit,
    /// Only set behind a proxy that overwrites `X-Forwarded-For`
    pub trust_forwarded_for: bool,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "access_token_secret",
                &self.access_token_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("cache", &self.cache)
            .field("ip_rate_limit", &self.ip_rate_limit)
            .field("phone_rate_limit", &self.phone_rate_limit)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_format", &self.log_format)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("tls_key_path", &self.tls_key_path)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_token_secret: None,
            cache: CacheConfig::default(),
            ip_rate_limit: RateLimit::new(100, Duration::from_millis(60_000)),
            phone_rate_limit: RateLimit::new(3, Duration::from_millis(600_000)),
            trust_forwarded_for: false,
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_format: LogFormat::default(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

/// Result of [`Config::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConfigReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn non_empty_var(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let cache = CacheConfig {
            enabled: parse_var(&lookup, AUTH_CACHE_ENABLED_ENV, defaults.cache.enabled)?,
            ttl: Duration::from_secs(parse_var(
                &lookup,
                AUTH_CACHE_TTL_SECS_ENV,
                defaults.cache.ttl.as_secs(),
            )?),
            max_size: parse_var(&lookup, AUTH_CACHE_MAX_SIZE_ENV, defaults.cache.max_size)?,
            sweep_interval: Duration::from_secs(parse_var(
                &lookup,
                AUTH_SWEEP_INTERVAL_SECS_ENV,
                defaults.cache.sweep_interval.as_secs(),
            )?),
        };

        let ip_rate_limit = RateLimit::new(
            parse_var(&lookup, IP_RATE_LIMIT_MAX_ENV, defaults.ip_rate_limit.max)?,
            Duration::from_millis(parse_var(
                &lookup,
                IP_RATE_LIMIT_WINDOW_MS_ENV,
                defaults.ip_rate_limit.window.as_millis() as u64,
            )?),
        );
        let phone_rate_limit = RateLimit::new(
            parse_var(&lookup, PHONE_RATE_LIMIT_MAX_ENV, defaults.phone_rate_limit.max)?,
            Duration::from_millis(parse_var(
                &lookup,
                PHONE_RATE_LIMIT_WINDOW_MS_ENV,
                defaults.phone_rate_limit.window.as_millis() as u64,
            )?),
        );

        Ok(Self {
            access_token_secret: non_empty_var(&lookup, ACCESS_TOKEN_SECRET_ENV),
            cache,
            ip_rate_limit,
            phone_rate_limit,
            trust_forwarded_for: parse_var(
                &lookup,
                TRUST_FORWARDED_FOR_ENV,
                defaults.trust_forwarded_for,
            )?,
            host: non_empty_var(&lookup, HOST_ENV).unwrap_or(defaults.host),
            port: parse_var(&lookup, PORT_ENV, defaults.port)?,
            log_format: parse_var(&lookup, LOG_FORMAT_ENV, defaults.log_format)?,
            tls_cert_path: non_empty_var(&lookup, TLS_CERT_PATH_ENV).map(PathBuf::from),
            tls_key_path: non_empty_var(&lookup, TLS_KEY_PATH_ENV).map(PathBuf::from),
        })
    }

    /// Startup diagnostics. Issues make the configuration unusable;
    /// warnings are logged but do not stop the service.
    pub fn validate(&self) -> ConfigReport {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        match &self.access_token_secret {
            None => issues.push(format!("{ACCESS_TOKEN_SECRET_ENV} is not set")),
            Some(secret) if secret.len() < MIN_SECRET_LEN => warnings.push(format!(
                "{ACCESS_TOKEN_SECRET_ENV} is shorter than {MIN_SECRET_LEN} characters"
            )),
            Some(_) => {}
        }

        if self.cache.enabled {
            if self.cache.max_size == 0 {
                issues.push(format!("{AUTH_CACHE_MAX_SIZE_ENV} must be greater than 0"));
            }
            if self.cache.ttl.is_zero() {
                issues.push(format!("{AUTH_CACHE_TTL_SECS_ENV} must be greater than 0"));
            }
            if self.cache.ttl > MAX_RECOMMENDED_CACHE_TTL {
                warnings.push(format!(
                    "{AUTH_CACHE_TTL_SECS_ENV} exceeds {} seconds",
                    MAX_RECOMMENDED_CACHE_TTL.as_secs()
                ));
            }
        } else {
            warnings.push("verification cache is disabled".to_string());
        }

        if self.cache.sweep_interval.is_zero() {
            issues.push(format!("{AUTH_SWEEP_INTERVAL_SECS_ENV} must be greater than 0"));
        }

        for (limit, max_var, window_var) in [
            (self.ip_rate_limit, IP_RATE_LIMIT_MAX_ENV, IP_RATE_LIMIT_WINDOW_MS_ENV),
            (self.phone_rate_limit, PHONE_RATE_LIMIT_MAX_ENV, PHONE_RATE_LIMIT_WINDOW_MS_ENV),
        ] {
            if limit.max == 0 {
                issues.push(format!("{max_var} must be greater than 0"));
            }
            if limit.window.is_zero() {
                issues.push(format!("{window_var} must be greater than 0"));
            }
        }

        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            issues.push(format!(
                "{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together"
            ));
        }

        ConfigReport {
            valid: issues.is_empty(),
            issues,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.ip_rate_limit.max, 100);
        assert_eq!(config.ip_rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.cache.max_size, 1000);
        assert!(!config.trust_forwarded_for);
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ACCESS_TOKEN_SECRET_ENV, SECRET),
            (AUTH_CACHE_ENABLED_ENV, "false"),
            (AUTH_CACHE_TTL_SECS_ENV, "120"),
            (PHONE_RATE_LIMIT_MAX_ENV, "5"),
            (PHONE_RATE_LIMIT_WINDOW_MS_ENV, "900000"),
            (PORT_ENV, "9090"),
            (TRUST_FORWARDED_FOR_ENV, "true"),
            (LOG_FORMAT_ENV, "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.access_token_secret.as_deref(), Some(SECRET));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl, Duration::from_secs(120));
        assert_eq!(config.phone_rate_limit, RateLimit::new(5, Duration::from_secs(900)));
        assert_eq!(config.port, 9090);
        assert!(config.trust_forwarded_for);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_values_are_errors() {
        let err = Config::from_lookup(lookup(&[(PORT_ENV, "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: PORT_ENV, .. }));

        assert!(Config::from_lookup(lookup(&[(LOG_FORMAT_ENV, "xml")])).is_err());
        assert!(Config::from_lookup(lookup(&[(AUTH_CACHE_ENABLED_ENV, "yes")])).is_err());
    }

    #[test]
    fn missing_secret_is_an_issue() {
        let report = Config::default().validate();
        assert!(!report.valid);
        assert!(report.issues.iter().any(|i| i.contains(ACCESS_TOKEN_SECRET_ENV)));
    }

    #[test]
    fn short_secret_is_a_warning() {
        let config = Config {
            access_token_secret: Some("short".to_string()),
            ..Config::default()
        };
        let report = config.validate();
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("shorter")));
    }

    #[test]
    fn zero_limits_and_lone_tls_path_are_issues() {
        let config = Config {
            access_token_secret: Some(SECRET.to_string()),
            ip_rate_limit: RateLimit::new(0, Duration::ZERO),
            tls_cert_path: Some(PathBuf::from("/etc/tls/cert.pem")),
            cache: CacheConfig {
                max_size: 0,
                ..CacheConfig::default()
            },
            ..Config::default()
        };
        let report = config.validate();
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 4);
    }

    #[test]
    fn debug_redacts_secret() {
        let config = Config {
            access_token_secret: Some(SECRET.to_string()),
            ..Config::default()
        };
        let printed = format!("{config:?}");
        assert!(!printed.contains(SECRET));
        assert!(printed.contains("<redacted>"));
    }
}
