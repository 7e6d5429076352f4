use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration, read once from the environment at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    /// Upper bound on due items pulled per sync session
    pub batch_limit: usize,
    /// Attempt bound applied to newly enqueued items
    pub max_attempts: u32,
    /// Cap on the exponential retry backoff, in seconds
    pub backoff_cap_secs: i64,
    /// Default retention window for `clear-synced`, in days
    pub retention_days: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "TILLSYNC_BIND_ADDR", "127.0.0.1:8080");
        let db_path =
            PathBuf::from(value_or_default(&lookup, "TILLSYNC_DB_PATH", "tillsync.db"));
        let batch_limit = parsed_or_default(&lookup, "TILLSYNC_BATCH_LIMIT", 50)?;
        if batch_limit == 0 {
            return Err(ConfigError::Invalid(
                "TILLSYNC_BATCH_LIMIT must be at least 1".to_string(),
            ));
        }
        let max_attempts = parsed_or_default(&lookup, "TILLSYNC_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "TILLSYNC_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let backoff_cap_secs = parsed_or_default(&lookup, "TILLSYNC_BACKOFF_CAP_SECS", 900)?;
        if backoff_cap_secs < 1 {
            return Err(ConfigError::Invalid(
                "TILLSYNC_BACKOFF_CAP_SECS must be positive".to_string(),
            ));
        }
        let retention_days = parsed_or_default(&lookup, "TILLSYNC_RETENTION_DAYS", 30)?;

        Ok(Self {
            bind_addr,
            db_path,
            batch_limit,
            max_attempts,
            backoff_cap_secs,
            retention_days,
        })
    }
}

fn value_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name} is not a valid number: {value}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_env() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("tillsync.db"));
        assert_eq!(config.batch_limit, 50);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_cap_secs, 900);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = AppConfig::from_lookup(|name| match name {
            "TILLSYNC_BIND_ADDR" => Some("0.0.0.0:9000".to_string()),
            "TILLSYNC_BATCH_LIMIT" => Some("10".to_string()),
            "TILLSYNC_MAX_ATTEMPTS" => Some("3".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let result = AppConfig::from_lookup(|name| {
            (name == "TILLSYNC_BATCH_LIMIT").then(|| "lots".to_string())
        });
        assert!(result.is_err());

        let result = AppConfig::from_lookup(|name| {
            (name == "TILLSYNC_MAX_ATTEMPTS").then(|| "0".to_string())
        });
        assert!(result.is_err());
    }
}
