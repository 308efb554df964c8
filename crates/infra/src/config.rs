//! Engine configuration loaded from the environment.

use thiserror::Error;

pub const CACHE_PREFIX_ENV: &str = "STOCKFLOW_CACHE_PREFIX";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const WAREHOUSE_NAME_ENV: &str = "STOCKFLOW_WAREHOUSE_NAME";
pub const AUTO_CONFIRM_ENV: &str = "STOCKFLOW_AUTO_CONFIRM";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Namespace of every cache key.
    pub cache_prefix: String,
    /// Redis sorted-set backend when set (requires the `redis` feature).
    pub redis_url: Option<String>,
    /// Name given to the warehouse the scenario binary provisions.
    pub warehouse_name: String,
    /// Confirm spawned moves immediately (reserving their quantity).
    pub auto_confirm: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "stockflow".to_string(),
            redis_url: None,
            warehouse_name: "main".to_string(),
            auto_confirm: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cache_prefix = match lookup(CACHE_PREFIX_ENV) {
            Some(raw) => validate_prefix(raw)?,
            None => defaults.cache_prefix,
        };

        let redis_url = match lookup(REDIS_URL_ENV) {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => {
                let raw = raw.trim().to_string();
                if !(raw.starts_with("redis://") || raw.starts_with("rediss://")) {
                    return Err(ConfigError::Invalid {
                        key: REDIS_URL_ENV,
                        reason: format!("`{raw}` is not a redis:// or rediss:// url"),
                    });
                }
                Some(raw)
            }
            None => None,
        };

        let warehouse_name = match lookup(WAREHOUSE_NAME_ENV) {
            Some(raw) if raw.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    key: WAREHOUSE_NAME_ENV,
                    reason: "must not be empty".to_string(),
                });
            }
            Some(raw) => raw.trim().to_string(),
            None => defaults.warehouse_name,
        };

        let auto_confirm = match lookup(AUTO_CONFIRM_ENV) {
            Some(raw) => parse_bool(AUTO_CONFIRM_ENV, &raw)?,
            None => defaults.auto_confirm,
        };

        Ok(Self {
            cache_prefix,
            redis_url,
            warehouse_name,
            auto_confirm,
        })
    }
}

fn validate_prefix(raw: String) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: CACHE_PREFIX_ENV,
        reason: reason.to_string(),
    };
    if raw.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    if raw.starts_with(':') || raw.ends_with(':') {
        return Err(invalid("must not start or end with `:`"));
    }
    Ok(raw)
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("`{other}` is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let config = EngineConfig::from_lookup(lookup(&[
            (CACHE_PREFIX_ENV, "wh-eu"),
            (REDIS_URL_ENV, " redis://cache:6379 "),
            (WAREHOUSE_NAME_ENV, " Rotterdam "),
            (AUTO_CONFIRM_ENV, "off"),
        ]))
        .unwrap();
        assert_eq!(config.cache_prefix, "wh-eu");
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.warehouse_name, "Rotterdam");
        assert!(!config.auto_confirm);
    }

    #[test]
    fn invalid_values_name_their_key() {
        let err = EngineConfig::from_lookup(lookup(&[(CACHE_PREFIX_ENV, "a b")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: CACHE_PREFIX_ENV, .. }));

        let err = EngineConfig::from_lookup(lookup(&[(REDIS_URL_ENV, "http://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: REDIS_URL_ENV, .. }));

        let err = EngineConfig::from_lookup(lookup(&[(AUTO_CONFIRM_ENV, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: AUTO_CONFIRM_ENV, .. }));
    }
}
