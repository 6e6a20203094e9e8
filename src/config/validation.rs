//! Configuration validation

use super::{Config, LimitConfig};
use thiserror::Error;

/// Error produced when a configuration value is out of range or missing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Types that can validate their own invariants after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn check_limit(name: &str, limit: &LimitConfig) -> Result<(), ValidationError> {
    if limit.window_secs == 0 {
        return Err(ValidationError(format!(
            "rate_limit.{}.window_secs must be greater than zero",
            name
        )));
    }
    Ok(())
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.server.port == 0 {
            return Err(ValidationError("server.port must not be zero".into()));
        }
        if self.database.url.is_empty() {
            return Err(ValidationError("database.url must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ValidationError(
                "database.max_connections must be greater than zero".into(),
            ));
        }
        if self.redis.url.is_empty() {
            return Err(ValidationError("redis.url must not be empty".into()));
        }
        if self.redis.namespace.is_empty() {
            return Err(ValidationError("redis.namespace must not be empty".into()));
        }
        if let Some(limit) = &self.rate_limit.team {
            check_limit("team", limit)?;
        }
        if let Some(limit) = &self.rate_limit.session {
            check_limit("session", limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_namespace() {
        let mut config = Config::default();
        config.redis.namespace = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_length_window() {
        let mut config = Config::default();
        config.rate_limit.team = Some(LimitConfig {
            limit: 10,
            window_secs: 0,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("window_secs"));
    }
}
