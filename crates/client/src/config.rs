//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ATELIER_API_URL` - Base URL of the remote REST API (e.g. `https://api.example.com/api/`)
//!
//! ## Optional
//! - `ATELIER_STATE_DIR` - Directory holding the persisted snapshot and cookies (default: `.atelier`)
//! - `ATELIER_COOKIE_DAYS` - Lifetime of the `auth-token`/`user-role` cookies (default: 7)
//! - `ATELIER_COOKIE_CONFIRM_MS` - Delay before re-reading a written cookie (default: 100)
//! - `ATELIER_MERGE_DELAY_MS` - Wait before merging the guest cart after login (default: 500)
//! - `ATELIER_MERGE_BUSY_DELAY_MS` - Wait when another merge is already running (default: 1500)
//! - `ATELIER_FETCH_DEBOUNCE_MS` - Window collapsing bursts of cart refetches (default: 300)
//! - `ATELIER_HTTP_TIMEOUT_SECS` - Request timeout for the remote API (default: 15)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Timings used by the cart merge coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartTimings {
    /// Wait after the authenticated edge before inspecting the guest cart.
    pub merge_delay: Duration,
    /// Wait used instead when a merge is already in flight.
    pub merge_busy_delay: Duration,
    /// Debounce window for externally triggered refetches.
    pub fetch_debounce: Duration,
}

impl Default for CartTimings {
    fn default() -> Self {
        Self {
            merge_delay: Duration::from_millis(500),
            merge_busy_delay: Duration::from_millis(1500),
            fetch_debounce: Duration::from_millis(300),
        }
    }
}

/// Atelier client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote API. Always ends with `/` so endpoints join beneath it.
    pub api_url: Url,
    /// Directory for `state.json` and `cookies.json`.
    pub state_dir: PathBuf,
    /// Lifetime of mirrored cookies, in days.
    pub cookie_days: i64,
    /// Delay before re-reading a cookie after writing it.
    pub cookie_confirm_delay: Duration,
    /// Cart coordinator timings.
    pub cart: CartTimings,
    /// Request timeout for the remote API.
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `ATELIER_API_URL` is missing or any variable
    /// fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_url = parse_api_url(&get_required_env("ATELIER_API_URL")?)?;
        let defaults = Self::default_for(api_url);

        Ok(Self {
            state_dir: std::env::var("ATELIER_STATE_DIR")
                .map_or(defaults.state_dir, PathBuf::from),
            cookie_days: parse_env_or("ATELIER_COOKIE_DAYS", defaults.cookie_days)?,
            cookie_confirm_delay: millis_env_or(
                "ATELIER_COOKIE_CONFIRM_MS",
                defaults.cookie_confirm_delay,
            )?,
            cart: CartTimings {
                merge_delay: millis_env_or("ATELIER_MERGE_DELAY_MS", defaults.cart.merge_delay)?,
                merge_busy_delay: millis_env_or(
                    "ATELIER_MERGE_BUSY_DELAY_MS",
                    defaults.cart.merge_busy_delay,
                )?,
                fetch_debounce: millis_env_or(
                    "ATELIER_FETCH_DEBOUNCE_MS",
                    defaults.cart.fetch_debounce,
                )?,
            },
            http_timeout: Duration::from_secs(parse_env_or(
                "ATELIER_HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
            api_url: defaults.api_url,
        })
    }

    /// Default settings for the given API base URL.
    #[must_use]
    pub fn default_for(api_url: Url) -> Self {
        Self {
            api_url: with_trailing_slash(api_url),
            state_dir: PathBuf::from(".atelier"),
            cookie_days: 7,
            cookie_confirm_delay: Duration::from_millis(100),
            cart: CartTimings::default(),
            http_timeout: Duration::from_secs(15),
        }
    }

    /// Path of the persisted store snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    /// Path of the persisted cookie jar.
    #[must_use]
    pub fn cookie_path(&self) -> PathBuf {
        self.state_dir.join("cookies.json")
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn millis_env_or(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env_or(key, default_ms).map(Duration::from_millis)
}

fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidEnvVar("ATELIER_API_URL".to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            "ATELIER_API_URL".to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    Ok(url)
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_for_appends_trailing_slash() {
        let config = ClientConfig::default_for(Url::parse("http://localhost:5000/api").unwrap());
        assert_eq!(config.api_url.as_str(), "http://localhost:5000/api/");
        assert_eq!(
            config.api_url.join("auth/login").unwrap().as_str(),
            "http://localhost:5000/api/auth/login"
        );
    }

    #[test]
    fn test_default_values() {
        let config = ClientConfig::default_for(Url::parse("http://localhost:5000/").unwrap());
        assert_eq!(config.cookie_days, 7);
        assert_eq!(config.cart.merge_delay, Duration::from_millis(500));
        assert!(config.cart.merge_busy_delay > config.cart.merge_delay);
        assert_eq!(config.snapshot_path(), PathBuf::from(".atelier/state.json"));
    }

    #[test]
    fn test_parse_api_url_rejects_non_base() {
        assert!(matches!(
            parse_api_url("mailto:someone@example.com"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(parse_api_url("not a url").is_err());
    }
}
