//! Tracing Subscriber Initialization
//!
//! One global subscriber: an `EnvFilter` from `RUST_LOG` (with a crate-level
//! default) and a fmt layer writing either JSON lines or human-readable text.

use std::str::FromStr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "portal_api=debug,portal_storage=debug,info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("PORTAL_SERVICE_NAME")
                .unwrap_or_else(|_| "portal-api".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_format: std::env::var("PORTAL_LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup before anything logs. A second call fails because a
/// global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_telemetry_config_default() {
        let _name = EnvVarGuard::set("PORTAL_SERVICE_NAME", None);
        let _format = EnvVarGuard::set("PORTAL_LOG_FORMAT", None);
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "portal-api");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" pretty ".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
