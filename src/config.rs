// Client configuration.
// Reads API location, credentials, paging and retry settings from the environment.

use std::time::Duration;

use crate::error::{FeedError, Result};

pub const API_URL_VAR: &str = "FEEDSYNC_API_URL";
pub const TOKEN_VAR: &str = "FEEDSYNC_TOKEN";
pub const PAGE_SIZE_VAR: &str = "FEEDSYNC_PAGE_SIZE";
pub const RETRY_ATTEMPTS_VAR: &str = "FEEDSYNC_RETRY_ATTEMPTS";
pub const RETRY_BASE_MS_VAR: &str = "FEEDSYNC_RETRY_BASE_MS";

/// Feed page size; a shorter page is the last one.
pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff for reads that opt into retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failure number `failures` (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Settings for one client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the HTTP gateway. `None` selects no remote transport.
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub page_size: u64,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        config.api_url = lookup(API_URL_VAR)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        config.token = lookup(TOKEN_VAR).filter(|token| !token.is_empty());
        if config.api_url.is_some() && config.token.is_none() {
            return Err(FeedError::MissingEnv(TOKEN_VAR));
        }

        if let Some(value) = lookup(PAGE_SIZE_VAR) {
            config.page_size = parse_number(PAGE_SIZE_VAR, &value)?;
            if config.page_size == 0 {
                return Err(FeedError::Other(format!("{} must be positive", PAGE_SIZE_VAR)));
            }
        }

        if let Some(value) = lookup(RETRY_ATTEMPTS_VAR) {
            let attempts: u64 = parse_number(RETRY_ATTEMPTS_VAR, &value)?;
            config.retry.max_attempts = attempts.clamp(1, u32::MAX as u64) as u32;
        }

        if let Some(value) = lookup(RETRY_BASE_MS_VAR) {
            config.retry.base_delay = Duration::from_millis(parse_number(RETRY_BASE_MS_VAR, &value)?);
        }

        Ok(config)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| FeedError::Other(format!("Invalid value for {}: {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.page_size, 10);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_url_requires_token() {
        let err = ClientConfig::from_lookup(lookup(&[(API_URL_VAR, "https://api.example")]))
            .unwrap_err();
        assert!(matches!(err, FeedError::MissingEnv(TOKEN_VAR)));
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (API_URL_VAR, "https://api.example"),
            (TOKEN_VAR, "secret"),
            (PAGE_SIZE_VAR, "20"),
            (RETRY_ATTEMPTS_VAR, "5"),
            (RETRY_BASE_MS_VAR, "100"),
        ]))
        .unwrap();

        assert_eq!(config.api_url.as_deref(), Some("https://api.example"));
        assert_eq!(config.page_size, 20);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        assert!(ClientConfig::from_lookup(lookup(&[(PAGE_SIZE_VAR, "ten")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[(PAGE_SIZE_VAR, "0")])).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_secs(1));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }
}
