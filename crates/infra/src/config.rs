//! Authority configuration: defaults, JSON files and `UNIAUTH_*` overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use uniauth_auth::{DirectoryPolicy, MAX_CACHE_TTL};
use uniauth_observability::LogFormat;

pub const ENV_CACHE_TTL_MS: &str = "UNIAUTH_CACHE_TTL_MS";
pub const ENV_STRICT_TRANSITIONS: &str = "UNIAUTH_STRICT_TRANSITIONS";
pub const ENV_MAX_FAILED_LOGINS: &str = "UNIAUTH_MAX_FAILED_LOGINS";
pub const ENV_LOCK_MINUTES: &str = "UNIAUTH_LOCK_MINUTES";
pub const ENV_KEY_TTL_DAYS: &str = "UNIAUTH_KEY_TTL_DAYS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "UNIAUTH_SWEEP_INTERVAL_SECS";
pub const ENV_LOG_FORMAT: &str = "UNIAUTH_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Parse {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("malformed configuration document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything tunable about a running authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorityConfig {
    /// Lifetime of cached effective-permission sets. `0` disables caching.
    pub cache_ttl_ms: u64,
    pub strict_transitions: bool,
    pub max_failed_logins: u32,
    pub lock_minutes: i64,
    pub key_ttl_days: i64,
    pub sweep_interval_secs: u64,
    pub log_format: LogFormat,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        let policy = DirectoryPolicy::default();
        Self {
            cache_ttl_ms: MAX_CACHE_TTL.as_millis() as u64,
            strict_transitions: policy.strict_transitions,
            max_failed_logins: policy.max_failed_logins,
            lock_minutes: policy.lock_duration.num_minutes(),
            key_ttl_days: 180,
            sweep_interval_secs: 60,
            log_format: LogFormat::default(),
        }
    }
}

impl AuthorityConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|var| std::env::var(var).ok())
    }

    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `UNIAUTH_*` values produced by `lookup`, then validates.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_CACHE_TTL_MS) {
            self.cache_ttl_ms = parse(ENV_CACHE_TTL_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_STRICT_TRANSITIONS) {
            self.strict_transitions = parse_bool(ENV_STRICT_TRANSITIONS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_FAILED_LOGINS) {
            self.max_failed_logins = parse(ENV_MAX_FAILED_LOGINS, &v)?;
        }
        if let Some(v) = lookup(ENV_LOCK_MINUTES) {
            self.lock_minutes = parse(ENV_LOCK_MINUTES, &v)?;
        }
        if let Some(v) = lookup(ENV_KEY_TTL_DAYS) {
            self.key_ttl_days = parse(ENV_KEY_TTL_DAYS, &v)?;
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            self.sweep_interval_secs = parse(ENV_SWEEP_INTERVAL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_LOG_FORMAT) {
            self.log_format = parse(ENV_LOG_FORMAT, &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Duration::from_millis(self.cache_ttl_ms) > MAX_CACHE_TTL {
            return Err(ConfigError::Invalid(format!(
                "cache_ttl_ms must be at most {} (got {})",
                MAX_CACHE_TTL.as_millis(),
                self.cache_ttl_ms
            )));
        }
        if self.max_failed_logins == 0 {
            return Err(ConfigError::Invalid("max_failed_logins must be at least 1".into()));
        }
        if self.lock_minutes <= 0 {
            return Err(ConfigError::Invalid("lock_minutes must be positive".into()));
        }
        if self.key_ttl_days <= 0 {
            return Err(ConfigError::Invalid("key_ttl_days must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn key_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.key_ttl_days)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn directory_policy(&self) -> DirectoryPolicy {
        DirectoryPolicy {
            strict_transitions: self.strict_transitions,
            max_failed_logins: self.max_failed_logins,
            lock_duration: chrono::Duration::minutes(self.lock_minutes),
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse {
            var,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid_and_match_the_directory_policy() {
        let config = AuthorityConfig::default();

        config.validate().unwrap();
        assert_eq!(config.directory_policy(), DirectoryPolicy::default());
        assert_eq!(config.cache_ttl(), MAX_CACHE_TTL);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let config = AuthorityConfig::default()
            .with_overrides(env(&[
                (ENV_CACHE_TTL_MS, "250"),
                (ENV_STRICT_TRANSITIONS, "off"),
                (ENV_MAX_FAILED_LOGINS, "3"),
                (ENV_LOG_FORMAT, "pretty"),
            ]))
            .unwrap();

        assert_eq!(config.cache_ttl_ms, 250);
        assert!(!config.strict_transitions);
        assert_eq!(config.max_failed_logins, 3);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.key_ttl_days, 180);
    }

    #[test]
    fn unparsable_override_names_the_variable() {
        let err = AuthorityConfig::default()
            .with_overrides(env(&[(ENV_MAX_FAILED_LOGINS, "many")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::Parse { var: ENV_MAX_FAILED_LOGINS, .. }));
    }

    #[test]
    fn cache_ttl_above_five_seconds_is_rejected() {
        let err = AuthorityConfig::default()
            .with_overrides(env(&[(ENV_CACHE_TTL_MS, "5001")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_failure_threshold_is_rejected() {
        let err = AuthorityConfig::from_json_str(r#"{"max_failed_logins": 0}"#).unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn json_document_keeps_defaults_for_absent_fields() {
        let config = AuthorityConfig::from_json_str(r#"{"key_ttl_days": 30, "log_format": "pretty"}"#).unwrap();

        assert_eq!(config.key_ttl(), chrono::Duration::days(30));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.max_failed_logins, 5);
    }

    #[test]
    fn unknown_json_fields_are_rejected() {
        assert!(matches!(
            AuthorityConfig::from_json_str(r#"{"cache_ttl": 10}"#).unwrap_err(),
            ConfigError::Json(_)
        ));
    }
}
