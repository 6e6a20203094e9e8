//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub identity: IdentityConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Postgres connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL, overridable via the `DATABASE_URL` environment variable
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/huddle".to_string(),
            max_connections: 5,
        }
    }
}

/// Redis configuration shared by the message bus and the rate limit counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace prefixed onto every bus channel name, isolating deployments
    /// that share one Redis instance
    pub namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "huddle".to_string(),
        }
    }
}

/// Identity resolution configuration
///
/// Team identity derivation from real credentials is out of scope; the
/// bundled resolver reads headers and falls back to `default_team` so a
/// development deployment works without an auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub default_team: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_team: Some("test-team".to_string()),
        }
    }
}

/// Storage backend for rate limit counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CounterBackend {
    /// Use Redis for distributed counters shared across processes
    /// (recommended for production)
    #[default]
    Redis,
    /// Use in-memory counters (suitable for development/single instance)
    Memory,
}

/// A single "at most N per window" limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub limit: u32,
    pub window_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: CounterBackend,
    /// Limit applied per team identity; `None` disables the team limiter
    pub team: Option<LimitConfig>,
    /// Limit applied per session identity; `None` disables the session limiter
    pub session: Option<LimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CounterBackend::default(),
            team: Some(LimitConfig {
                limit: 60,
                window_secs: 60,
            }),
            session: Some(LimitConfig {
                limit: 30,
                window_secs: 60,
            }),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridable via `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        // Add local config and environment variables last (highest priority)
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("HUDDLE").separator("__"));

        let mut config: Config = builder.build()?.try_deserialize()?;

        // Override database URL from DATABASE_URL env var if present (common convention)
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            config.database.url = database_url;
        }

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_server_binds_all_interfaces() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
    }

    #[test]
    fn counter_backend_deserializes_snake_case() {
        let backend: CounterBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, CounterBackend::Memory);
        let backend: CounterBackend = serde_json::from_str("\"redis\"").unwrap();
        assert_eq!(backend, CounterBackend::Redis);
    }
}
