//! Tracing subscriber initialization.
//!
//! Structured logs go to stdout as JSON by default, or in a human-readable
//! layout for local development. Filtering follows `RUST_LOG`.

use strata_core::{ConfigError, StrataResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output layout for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::invalid("log_format", other, "expected json or pretty")),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("STRATA_SERVICE_NAME")
                .unwrap_or_else(|_| "strata".to_string()),
            service_version: std::env::var("STRATA_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_format: std::env::var("STRATA_LOG_FORMAT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(LogFormat::Json),
            default_filter: "strata_orchestrator=info,strata_cache=info,strata_agents=info,warn"
                .to_string(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call returns a configuration error rather
/// than replacing the installed subscriber.
pub fn init_tracing(config: &TelemetryConfig) -> StrataResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let installed = match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init(),
    };
    installed.map_err(|e| ConfigError::invalid("tracing_subscriber", e, "failed to install"))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TelemetryConfig {
            log_format: LogFormat::Pretty,
            ..TelemetryConfig::default()
        };
        // The first call may lose to another test in this binary; the second never wins.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
