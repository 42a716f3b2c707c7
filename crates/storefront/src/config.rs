//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront (default: `http://localhost:3000`)
//! - `STOREFRONT_PROTECTED_PREFIXES` - Comma-separated path prefixes behind the
//!   session guard (default: `/agrihcmAdmin`)
//! - `STOREFRONT_LOGIN_PATH` - Customer login page (default: `/auth/login`)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.1)
//!
//! API settings (`AGRIHCM_*`) are read by [`ClientConfig::from_env`].

use std::net::{IpAddr, SocketAddr};

use agrihcm_client::ClientConfig;
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_PROTECTED_PREFIXES: &str = "/agrihcmAdmin";
const DEFAULT_LOGIN_PATH: &str = "/auth/login";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error(transparent)]
    Client(#[from] agrihcm_client::ConfigError),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: Url,
    /// Path prefixes that require a session
    pub protected_prefixes: Vec<String>,
    /// Customer login page
    pub login_path: String,
    /// REST API client settings
    pub client: ClientConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions sent to Sentry
    pub sentry_traces_sample_rate: f32,
}

impl StorefrontConfig {
    /// Configuration with defaults for everything but the public URL and
    /// the API client.
    ///
    /// Credential cookies are marked `Secure` whenever the public URL is HTTPS.
    #[must_use]
    pub fn new(base_url: Url, mut client: ClientConfig) -> Self {
        client.secure_cookies |= base_url.scheme() == "https";

        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            base_url,
            protected_prefixes: parse_prefixes(DEFAULT_PROTECTED_PREFIXES),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            client,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.1,
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

        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_string(), e.to_string())
            })?;
        let base_url = Url::parse(&get_env_or_default("STOREFRONT_BASE_URL", DEFAULT_BASE_URL))
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
            })?;

        let protected_prefixes = parse_prefixes(&get_env_or_default(
            "STOREFRONT_PROTECTED_PREFIXES",
            DEFAULT_PROTECTED_PREFIXES,
        ));
        if protected_prefixes.is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "STOREFRONT_PROTECTED_PREFIXES".to_string(),
                "at least one prefix is required".to_string(),
            ));
        }

        let login_path = get_env_or_default("STOREFRONT_LOGIN_PATH", DEFAULT_LOGIN_PATH);
        if !login_path.starts_with('/') {
            return Err(ConfigError::InvalidEnvVar(
                "STOREFRONT_LOGIN_PATH".to_string(),
                "must be an absolute path".to_string(),
            ));
        }

        let mut config = Self::new(base_url, ClientConfig::from_env()?);
        config.host = host;
        config.port = port;
        config.protected_prefixes = protected_prefixes;
        config.login_path = login_path;
        config.sentry_dsn = get_optional_env("SENTRY_DSN");
        config.sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        config.sentry_sample_rate = get_rate("SENTRY_SAMPLE_RATE", 1.0)?;
        config.sentry_traces_sample_rate = get_rate("SENTRY_TRACES_SAMPLE_RATE", 0.1)?;

        Ok(config)
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Split a comma-separated prefix list into `/x`-shaped prefixes.
///
/// Empty entries are dropped and trailing slashes removed, so `/admin/`
/// and `admin` both become `/admin`.
fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().trim_end_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| {
            if p.starts_with('/') {
                p.to_string()
            } else {
                format!("/{p}")
            }
        })
        .collect()
}

fn get_rate(key: &str, default: f32) -> Result<f32, ConfigError> {
    let rate = get_env_or_default(key, &default.to_string())
        .parse::<f32>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("must be between 0 and 1, got {rate}"),
        ))
    }
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> ClientConfig {
        ClientConfig::new(Url::parse("http://localhost:8000").unwrap())
    }

    #[test]
    fn test_parse_prefixes_normalizes() {
        assert_eq!(
            parse_prefixes("/agrihcmAdmin/, staff ,,/ops"),
            vec!["/agrihcmAdmin", "/staff", "/ops"]
        );
    }

    #[test]
    fn test_parse_prefixes_empty() {
        assert!(parse_prefixes(" , ").is_empty());
    }

    #[test]
    fn test_https_base_url_enables_secure_cookies() {
        let config = StorefrontConfig::new(Url::parse("https://shop.agrihcm.vn").unwrap(), client());
        assert!(config.client.secure_cookies);

        let config = StorefrontConfig::new(Url::parse("http://localhost:3000").unwrap(), client());
        assert!(!config.client.secure_cookies);
    }

    #[test]
    fn test_defaults() {
        let config = StorefrontConfig::new(Url::parse(DEFAULT_BASE_URL).unwrap(), client());
        assert_eq!(config.protected_prefixes, vec!["/agrihcmAdmin"]);
        assert_eq!(config.login_path, "/auth/login");
        assert_eq!(config.socket_addr().port(), 3000);
    }
}
