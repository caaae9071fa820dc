//! Runtime configuration for the cache-and-sync layer.
//!
//! Built from defaults or from `CLUBSYNC_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Which local store backend to open at startup.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// SQLite when a database path can be resolved, memory otherwise.
    #[default]
    Auto,
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(StoreBackend::Auto),
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::invalid("CLUBSYNC_STORE", other)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineConfig {
    /// Base URL of the remote authority.
    pub api_url: String,
    pub auth_token: Option<String>,
    pub store_backend: StoreBackend,
    /// Explicit SQLite file; defaults to `{data_dir}/clubsync/cache.db`.
    pub db_path: Option<PathBuf>,
    /// Connectivity polling interval.
    pub poll_interval: Duration,
    /// Upper bound on a single connectivity probe.
    pub probe_timeout: Duration,
    /// Upper bound on a single remote replay (or direct write).
    pub replay_timeout: Duration,
    /// Pull all cached families after an online transition.
    pub refresh_on_reconnect: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            auth_token: None,
            store_backend: StoreBackend::Auto,
            db_path: None,
            poll_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            replay_timeout: Duration::from_secs(30),
            refresh_on_reconnect: true,
        }
    }
}

impl OfflineConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CLUBSYNC_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        config.auth_token = lookup("CLUBSYNC_AUTH_TOKEN").filter(|t| !t.is_empty());
        if let Some(backend) = lookup("CLUBSYNC_STORE") {
            config.store_backend = backend.parse()?;
        }
        config.db_path = lookup("CLUBSYNC_DB_PATH").map(PathBuf::from);

        if let Some(d) = secs(&lookup, "CLUBSYNC_POLL_INTERVAL_SECS")? {
            config.poll_interval = d;
        }
        if let Some(d) = secs(&lookup, "CLUBSYNC_PROBE_TIMEOUT_SECS")? {
            config.probe_timeout = d;
        }
        if let Some(d) = secs(&lookup, "CLUBSYNC_REPLAY_TIMEOUT_SECS")? {
            config.replay_timeout = d;
        }
        if let Some(raw) = lookup("CLUBSYNC_REFRESH_ON_RECONNECT") {
            config.refresh_on_reconnect = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::invalid("CLUBSYNC_REFRESH_ON_RECONNECT", raw)),
            };
        }

        Ok(config)
    }
}

fn secs<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::invalid(key, raw)),
            Ok(n) => Ok(Some(Duration::from_secs(n))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = OfflineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, OfflineConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = OfflineConfig::from_lookup(lookup_from(&[
            ("CLUBSYNC_API_URL", "https://club.example.org/api/"),
            ("CLUBSYNC_AUTH_TOKEN", "secret"),
            ("CLUBSYNC_STORE", "Memory"),
            ("CLUBSYNC_DB_PATH", "/tmp/club.db"),
            ("CLUBSYNC_POLL_INTERVAL_SECS", "3"),
            ("CLUBSYNC_REPLAY_TIMEOUT_SECS", "12"),
            ("CLUBSYNC_REFRESH_ON_RECONNECT", "no"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://club.example.org/api");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/club.db")));
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.replay_timeout, Duration::from_secs(12));
        assert!(!config.refresh_on_reconnect);
    }

    #[test]
    fn zero_or_garbage_durations_are_rejected() {
        let err = OfflineConfig::from_lookup(lookup_from(&[("CLUBSYNC_POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "CLUBSYNC_POLL_INTERVAL_SECS",
                value: "0".into()
            }
        );

        assert!(
            OfflineConfig::from_lookup(lookup_from(&[("CLUBSYNC_REPLAY_TIMEOUT_SECS", "soon")]))
                .is_err()
        );
        assert!(OfflineConfig::from_lookup(lookup_from(&[("CLUBSYNC_STORE", "redis")])).is_err());
    }
}
