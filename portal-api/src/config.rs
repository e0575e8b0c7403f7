//! API Configuration Module
//!
//! Every setting is read from the environment with a default suitable for
//! local development. Each component owns its config struct
//! ([`DbConfig`], [`UpstreamConfig`], [`RefreshConfig`]); [`PortalConfig`]
//! gathers them and checks the cross-component constraints once at startup.

use portal_core::ConfigError;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BIND_HOST, DEFAULT_PAGE_CACHE_MAX, DEFAULT_PAGE_CACHE_TTL_SECS, DEFAULT_PORT,
};
use crate::db::DbConfig;
use crate::jobs::RefreshConfig;
use crate::upstream::UpstreamConfig;

/// Parse an environment variable, falling back to `default` when it is unset
/// or unparseable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean flag; anything other than "false"/"0" counts as true.
pub(crate) fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| !matches!(s.trim().to_lowercase().as_str(), "false" | "0"))
        .unwrap_or(default)
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP listener and read-path cache settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_host: String,
    pub port: u16,

    /// Freshness window of a cached listing page.
    pub page_cache_ttl: Duration,

    /// Maximum cached listing pages. Zero disables the page cache.
    pub page_cache_max: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            page_cache_ttl: Duration::from_secs(DEFAULT_PAGE_CACHE_TTL_SECS),
            page_cache_max: DEFAULT_PAGE_CACHE_MAX,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `PORTAL_API_BIND`: listen address (default: 0.0.0.0)
    /// - `PORT`, then `PORTAL_API_PORT`: listen port (default: 8000)
    /// - `PORTAL_PAGE_CACHE_TTL_SECS`: page freshness window (default: 30)
    /// - `PORTAL_PAGE_CACHE_MAX`: page cache capacity (default: 256)
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .or_else(|_| std::env::var("PORTAL_API_PORT"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            bind_host: std::env::var("PORTAL_API_BIND")
                .unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string()),
            port,
            page_cache_ttl: Duration::from_secs(env_or(
                "PORTAL_PAGE_CACHE_TTL_SECS",
                DEFAULT_PAGE_CACHE_TTL_SECS,
            )),
            page_cache_max: env_or("PORTAL_PAGE_CACHE_MAX", DEFAULT_PAGE_CACHE_MAX),
        }
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct PortalConfig {
    pub api: ApiConfig,
    pub db: DbConfig,
    pub upstream: UpstreamConfig,
    pub refresh: RefreshConfig,
}

impl PortalConfig {
    /// Load every section from the environment and validate the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            api: ApiConfig::from_env(),
            db: DbConfig::from_env(),
            upstream: UpstreamConfig::from_env(),
            refresh: RefreshConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db.max_size == 0 {
            return Err(invalid("PORTAL_DB_POOL_SIZE", "0", "pool needs at least one connection"));
        }
        if self.db.wait_for_db && self.db.wait.max_attempts == 0 {
            return Err(invalid("PORTAL_DB_WAIT_MAX_ATTEMPTS", "0", "at least one ping is required"));
        }
        if self.upstream.max_retries == 0 {
            return Err(invalid("PORTAL_MAX_RETRIES", "0", "at least one attempt is required"));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "PORTAL_UPSTREAM_BASE_URL".to_string(),
            });
        }
        if self.refresh.interval.is_zero() {
            return Err(invalid("PORTAL_REFRESH_INTERVAL_SECS", "0", "interval must be positive"));
        }
        // An upstream response must never outlive the cycle that fetched it.
        if self.upstream.cache_ttl >= self.refresh.interval {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("PORTAL_UPSTREAM_CACHE_TTL_SECS={}", self.upstream.cache_ttl.as_secs()),
                option_b: format!("PORTAL_REFRESH_INTERVAL_SECS={}", self.refresh.interval.as_secs()),
            });
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
