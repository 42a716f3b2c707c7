//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All optional:
//! - `AGRIHCM_API_URL` - REST API base URL (default: `http://localhost:8000`)
//! - `AGRIHCM_ACCESS_MAX_AGE_SECS` - Customer access cookie lifetime (default: 3600)
//! - `AGRIHCM_ADMIN_ACCESS_MAX_AGE_SECS` - Admin access cookie lifetime (default: 1800)
//! - `AGRIHCM_REFRESH_MAX_AGE_SECS` - Refresh cookie lifetime (default: 604800)
//! - `AGRIHCM_EXPIRY_MARGIN_SECS` - Seconds before expiry a token counts as stale (default: 60)
//! - `AGRIHCM_SECURE_COOKIES` - Mark credential cookies `Secure` (default: false)

use std::time::Duration;

use agrihcm_core::DEFAULT_EXPIRY_MARGIN_SECS;
use thiserror::Error;
use url::Url;

use crate::credentials::{Audience, CookiePolicy};

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_ACCESS_MAX_AGE_SECS: u64 = 60 * 60;
const DEFAULT_ADMIN_ACCESS_MAX_AGE_SECS: u64 = 30 * 60;
const DEFAULT_REFRESH_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// API client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, always ending in `/`
    pub api_url: Url,
    /// Lifetime of a customer access cookie
    pub access_max_age: Duration,
    /// Lifetime of an admin access cookie
    pub admin_access_max_age: Duration,
    /// Lifetime of the refresh cookie
    pub refresh_max_age: Duration,
    /// Safety margin applied to access token expiry
    pub expiry_margin_secs: i64,
    /// Whether credential cookies carry the `Secure` attribute
    pub secure_cookies: bool,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the API URL.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url: normalize_base(api_url),
            access_max_age: Duration::from_secs(DEFAULT_ACCESS_MAX_AGE_SECS),
            admin_access_max_age: Duration::from_secs(DEFAULT_ADMIN_ACCESS_MAX_AGE_SECS),
            refresh_max_age: Duration::from_secs(DEFAULT_REFRESH_MAX_AGE_SECS),
            expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS,
            secure_cookies: false,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_url = Url::parse(&get_env_or_default("AGRIHCM_API_URL", DEFAULT_API_URL))
            .map_err(|e| ConfigError::InvalidEnvVar("AGRIHCM_API_URL".to_string(), e.to_string()))?;

        Ok(Self {
            api_url: normalize_base(api_url),
            access_max_age: get_secs("AGRIHCM_ACCESS_MAX_AGE_SECS", DEFAULT_ACCESS_MAX_AGE_SECS)?,
            admin_access_max_age: get_secs(
                "AGRIHCM_ADMIN_ACCESS_MAX_AGE_SECS",
                DEFAULT_ADMIN_ACCESS_MAX_AGE_SECS,
            )?,
            refresh_max_age: get_secs("AGRIHCM_REFRESH_MAX_AGE_SECS", DEFAULT_REFRESH_MAX_AGE_SECS)?,
            expiry_margin_secs: get_env_or_default(
                "AGRIHCM_EXPIRY_MARGIN_SECS",
                &DEFAULT_EXPIRY_MARGIN_SECS.to_string(),
            )
            .parse::<i64>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("AGRIHCM_EXPIRY_MARGIN_SECS".to_string(), e.to_string())
            })?,
            secure_cookies: parse_bool(
                "AGRIHCM_SECURE_COOKIES",
                &get_env_or_default("AGRIHCM_SECURE_COOKIES", "false"),
            )?,
        })
    }

    /// Cookie attributes for credentials issued to `audience`.
    #[must_use]
    pub const fn cookie_policy(&self, audience: Audience) -> CookiePolicy {
        let access_max_age = match audience {
            Audience::Customer => self.access_max_age,
            Audience::Admin => self.admin_access_max_age,
        };
        CookiePolicy {
            secure: self.secure_cookies,
            access_max_age,
            refresh_max_age: self.refresh_max_age,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Relative joins replace the last path segment unless the base ends in `/`.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    get_env_or_default(key, &default.to_string())
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a boolean flag (`true`/`false`/`1`/`0`/`yes`/`no`).
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got '{other}'"),
        )),
    }
}
