//! Sync layer configuration.

use std::time::Duration;

use crate::errors::{Error, Result};

/// Default first reconnect delay for a dropped change feed.
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 500;

/// Default cap on reconnect delay.
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

const RECONNECT_BASE_ENV: &str = "SCHOOLOPS_SYNC_RECONNECT_BASE_MS";
const RECONNECT_MAX_ENV: &str = "SCHOOLOPS_SYNC_RECONNECT_MAX_MS";
const MAX_RECONNECT_ATTEMPTS_ENV: &str = "SCHOOLOPS_SYNC_MAX_RECONNECT_ATTEMPTS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_reconnect_attempts: None,
        }
    }
}

impl SyncConfig {
    /// Reads overrides from the environment; unset variables keep defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, RECONNECT_BASE_ENV)? {
            config.reconnect_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, RECONNECT_MAX_ENV)? {
            config.reconnect_max_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, MAX_RECONNECT_ATTEMPTS_ENV)? {
            config.max_reconnect_attempts = Some(attempts);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconnect_base_delay.is_zero() {
            return Err(Error::Config(
                "reconnect base delay must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(Error::Config(format!(
                "reconnect max delay ({:?}) is below base delay ({:?})",
                self.reconnect_max_delay, self.reconnect_base_delay
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            (RECONNECT_BASE_ENV, "100"),
            (RECONNECT_MAX_ENV, " 2000 "),
            (MAX_RECONNECT_ATTEMPTS_ENV, "7"),
        ]))
        .expect("config");
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(100));
        assert_eq!(config.reconnect_max_delay, Duration::from_millis(2000));
        assert_eq!(config.max_reconnect_attempts, Some(7));
    }

    #[test]
    fn rejects_garbage_and_inverted_bounds() {
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&[(RECONNECT_BASE_ENV, "soon")])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SyncConfig::from_lookup(lookup(&[
                (RECONNECT_BASE_ENV, "5000"),
                (RECONNECT_MAX_ENV, "100"),
            ])),
            Err(Error::Config(_))
        ));
    }
}
