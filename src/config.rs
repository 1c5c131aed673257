//! Application configuration.
//!
//! Settings are loaded from environment variables; `main` loads a `.env` file
//! first, so either source works.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Demo application configuration.
///
/// # Environment Variables
///
/// - `CACHET_ADDR`: listen address (default: `127.0.0.1:8080`)
/// - `CACHET_MEMORY_TTL_SECS`: lifetime of the memory-cache timestamp (default: `20`)
/// - `CACHET_RESPONSE_MAX_AGE_SECS`: `max-age` of the response-cache route (default: `10`)
/// - `CACHET_SWEEP_INTERVAL_SECS`: period of the expired-entry sweeper, `0`
///   disables it (default: `60`)
/// - `CACHET_RESPONSE_CACHE_MAX_BODY`: largest body the response cache stores,
///   in bytes (default: `1048576`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    /// Address the server binds to.
    pub addr: String,

    /// TTL of the timestamp stored by `/memory-cache`.
    pub memory_ttl: Duration,

    /// `max-age` advertised by `/response-cache`.
    pub response_max_age: Duration,

    /// Sweeper period, `None` when disabled.
    pub sweep_interval: Option<Duration>,

    /// Body size limit for stored responses.
    pub response_cache_max_body: usize,
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a variable that is set but cannot
    /// be parsed, or a TTL of `0`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let addr = lookup("CACHET_ADDR")
            .filter(|addr| !addr.trim().is_empty())
            .unwrap_or(defaults.addr);

        let memory_ttl = match lookup("CACHET_MEMORY_TTL_SECS") {
            Some(value) => Duration::from_secs(positive_secs("CACHET_MEMORY_TTL_SECS", value)?),
            None => defaults.memory_ttl,
        };

        let response_max_age = match lookup("CACHET_RESPONSE_MAX_AGE_SECS") {
            Some(value) => {
                Duration::from_secs(positive_secs("CACHET_RESPONSE_MAX_AGE_SECS", value)?)
            }
            None => defaults.response_max_age,
        };

        let sweep_interval = match lookup("CACHET_SWEEP_INTERVAL_SECS") {
            Some(value) => match parse_number("CACHET_SWEEP_INTERVAL_SECS", value, "whole seconds")? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.sweep_interval,
        };

        let response_cache_max_body = match lookup("CACHET_RESPONSE_CACHE_MAX_BODY") {
            Some(value) => {
                parse_number::<usize>("CACHET_RESPONSE_CACHE_MAX_BODY", value, "a size in bytes")?
            }
            None => defaults.response_cache_max_body,
        };

        Ok(Self {
            addr,
            memory_ttl,
            response_max_age,
            sweep_interval,
            response_cache_max_body,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".into(),
            memory_ttl: Duration::from_secs(20),
            response_max_age: Duration::from_secs(10),
            sweep_interval: Some(Duration::from_secs(60)),
            response_cache_max_body: crate::cache::middleware::DEFAULT_MAX_BODY_SIZE,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    var: &'static str,
    value: String,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        })
}

fn positive_secs(var: &'static str, value: String) -> Result<u64, ConfigError> {
    match parse_number(var, value.clone(), "a positive number of seconds")? {
        0 => Err(ConfigError::Invalid {
            var,
            value,
            expected: "a positive number of seconds",
        }),
        secs => Ok(secs),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.addr, "127.0.0.1:8080");
        assert_eq!(config.memory_ttl, Duration::from_secs(20));
        assert_eq!(config.response_max_age, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.response_cache_max_body, 1024 * 1024);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("CACHET_ADDR", "0.0.0.0:3000"),
            ("CACHET_MEMORY_TTL_SECS", "5"),
            ("CACHET_RESPONSE_MAX_AGE_SECS", " 30 "),
            ("CACHET_SWEEP_INTERVAL_SECS", "0"),
            ("CACHET_RESPONSE_CACHE_MAX_BODY", "512"),
        ])
        .unwrap();
        assert_eq!(config.addr, "0.0.0.0:3000");
        assert_eq!(config.memory_ttl, Duration::from_secs(5));
        assert_eq!(config.response_max_age, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, None);
        assert_eq!(config.response_cache_max_body, 512);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = load(&[("CACHET_MEMORY_TTL_SECS", "0")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "CACHET_MEMORY_TTL_SECS", .. }
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = load(&[("CACHET_RESPONSE_CACHE_MAX_BODY", "lots")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value \"lots\" for CACHET_RESPONSE_CACHE_MAX_BODY: expected a size in bytes"
        );
    }
}
