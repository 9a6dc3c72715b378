//! Connection settings for the data API.

use std::time::Duration;

use crate::error::{RemoteError, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:54321";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FEED_POLL_MS: u64 = 1_000;
pub const DEFAULT_FEED_PAGE_LIMIT: u32 = 500;

const API_URL_ENV: &str = "SCHOOLOPS_API_URL";
const API_KEY_ENV: &str = "SCHOOLOPS_API_KEY";
const ACCESS_TOKEN_ENV: &str = "SCHOOLOPS_ACCESS_TOKEN";
const FEED_POLL_ENV: &str = "SCHOOLOPS_FEED_POLL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL without trailing slash.
    pub api_url: String,
    /// Sent as `apikey` on every request.
    pub api_key: Option<String>,
    /// Bearer token; falls back to the API key when absent.
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub page_limit: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_FEED_POLL_MS),
            page_limit: DEFAULT_FEED_PAGE_LIMIT,
        }
    }
}

impl RemoteConfig {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_url = read(API_URL_ENV)
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let mut config = Self {
            api_url,
            api_key: read(API_KEY_ENV),
            access_token: read(ACCESS_TOKEN_ENV),
            ..Self::default()
        };
        if let Some(raw) = read(FEED_POLL_ENV) {
            let ms = raw.parse::<u64>().map_err(|_| {
                RemoteError::invalid_request(format!("{} has invalid value '{}'", FEED_POLL_ENV, raw))
            })?;
            config.poll_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(RemoteError::invalid_request(format!(
                "API URL must be http(s): '{}'",
                self.api_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(RemoteError::invalid_request(
                "feed poll interval must be greater than zero",
            ));
        }
        if self.page_limit == 0 {
            return Err(RemoteError::invalid_request(
                "feed page limit must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Token for the Authorization header.
    pub fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref().or(self.api_key.as_deref())
    }
}
