//! Application state shared across handlers.

use std::sync::Arc;

use agrihcm_client::{ApiClient, ApiError};

use crate::config::StorefrontConfig;
use crate::middleware::session_guard::GuardPolicy;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`. It holds no per-user data;
/// credentials live in each request's cookies.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    api: ApiClient,
    guard: GuardPolicy,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured API URL cannot be used as a base.
    pub fn new(config: StorefrontConfig) -> Result<Self, ApiError> {
        let api = ApiClient::new(config.client.clone())?;
        let guard = GuardPolicy::new(config.protected_prefixes.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner { config, api, guard }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the REST API client.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Get a reference to the session guard policy.
    #[must_use]
    pub fn guard(&self) -> &GuardPolicy {
        &self.inner.guard
    }
}
