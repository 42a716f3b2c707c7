//! Credential storage.
//!
//! Access and refresh tokens live in one of two places depending on who is
//! making the call:
//!
//! - a server-rendered request reads the incoming cookie jar and writes the
//!   outgoing one (the storefront's cookie backend)
//! - in-process client code keeps a fast local store and falls back to the
//!   cookies its HTTP client has received ([`ClientCredentialStore`])
//!
//! Both implement [`CredentialStore`]. Storage never fails loudly: a failed
//! read is "no credential" and a failed write is logged and dropped, so
//! callers fall through to the unauthenticated path.

mod client;

pub use client::ClientCredentialStore;

use std::fmt::Write as _;
use std::time::Duration;

use agrihcm_core::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, TokenPair};

/// Storage for credential values keyed by cookie name.
///
/// Writes are last-write-wins; a refreshed token fully supersedes the old one.
pub trait CredentialStore: Send + Sync {
    /// Read a credential. `None` when absent or unreadable.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a credential with the given cookie attributes.
    fn set(&self, key: &str, value: &str, options: &CookieOptions);

    /// Remove a credential from whichever store is writable.
    fn delete(&self, key: &str);
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    /// Attribute value as written in a `Set-Cookie` header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Attributes for a credential cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// `None` makes a session cookie.
    pub max_age: Option<Duration>,
    pub path: String,
}

impl CookieOptions {
    /// `HttpOnly`, `SameSite=Lax`, `Path=/`, expiring after `max_age`.
    #[must_use]
    pub fn credential(max_age: Duration, secure: bool) -> Self {
        Self {
            http_only: true,
            secure,
            same_site: SameSite::Lax,
            max_age: Some(max_age),
            path: "/".to_string(),
        }
    }

    /// Render a `Set-Cookie` header value for `key=value`.
    ///
    /// The value is percent-encoded.
    #[must_use]
    pub fn set_cookie_header(&self, key: &str, value: &str) -> String {
        let mut header = format!(
            "{key}={}; Path={}; SameSite={}",
            urlencoding::encode(value),
            self.path,
            self.same_site.as_str()
        );
        if let Some(max_age) = self.max_age {
            let _ = write!(header, "; Max-Age={}", max_age.as_secs());
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

/// Who a credential was issued to. Admin sessions get a shorter access cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Audience {
    #[default]
    Customer,
    Admin,
}

/// Cookie attributes for one audience's credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub secure: bool,
    pub access_max_age: Duration,
    pub refresh_max_age: Duration,
}

impl CookiePolicy {
    /// Options for the access token cookie.
    #[must_use]
    pub fn access(&self) -> CookieOptions {
        CookieOptions::credential(self.access_max_age, self.secure)
    }

    /// Options for the refresh token cookie.
    #[must_use]
    pub fn refresh(&self) -> CookieOptions {
        CookieOptions::credential(self.refresh_max_age, self.secure)
    }
}

/// Persist a token pair. The refresh token is only written when present,
/// so a refresh that does not rotate keeps the existing one.
pub fn persist_tokens(store: &dyn CredentialStore, pair: &TokenPair, policy: &CookiePolicy) {
    store.set(ACCESS_TOKEN_COOKIE, &pair.access, &policy.access());
    if let Some(refresh) = &pair.refresh {
        store.set(REFRESH_TOKEN_COOKIE, refresh, &policy.refresh());
    }
}

/// Remove both credentials.
pub fn clear_tokens(store: &dyn CredentialStore) {
    store.delete(ACCESS_TOKEN_COOKIE);
    store.delete(REFRESH_TOKEN_COOKIE);
}

/// Whether any credential is stored at all.
#[must_use]
pub fn has_credential(store: &dyn CredentialStore) -> bool {
    store.get(ACCESS_TOKEN_COOKIE).is_some() || store.get(REFRESH_TOKEN_COOKIE).is_some()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, (String, CookieOptions)>>);

    impl CredentialStore for MapStore {
        fn get(&self, key: &str) -> Option<String> {
            self.0.lock().unwrap().get(key).map(|(v, _)| v.clone())
        }

        fn set(&self, key: &str, value: &str, options: &CookieOptions) {
            self.0
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), options.clone()));
        }

        fn delete(&self, key: &str) {
            self.0.lock().unwrap().remove(key);
        }
    }

    fn policy() -> CookiePolicy {
        CookiePolicy {
            secure: true,
            access_max_age: Duration::from_secs(3600),
            refresh_max_age: Duration::from_secs(604_800),
        }
    }

    #[test]
    fn test_persist_keeps_refresh_when_not_rotated() {
        let store = MapStore::default();
        store.set(REFRESH_TOKEN_COOKIE, "old-refresh", &policy().refresh());

        let pair = TokenPair {
            access: "new-access".to_string(),
            refresh: None,
        };
        persist_tokens(&store, &pair, &policy());

        assert_eq!(store.get(ACCESS_TOKEN_COOKIE).as_deref(), Some("new-access"));
        assert_eq!(store.get(REFRESH_TOKEN_COOKIE).as_deref(), Some("old-refresh"));
    }

    #[test]
    fn test_persist_replaces_rotated_refresh() {
        let store = MapStore::default();
        store.set(REFRESH_TOKEN_COOKIE, "old-refresh", &policy().refresh());

        let pair = TokenPair {
            access: "new-access".to_string(),
            refresh: Some("new-refresh".to_string()),
        };
        persist_tokens(&store, &pair, &policy());

        assert_eq!(store.get(REFRESH_TOKEN_COOKIE).as_deref(), Some("new-refresh"));
        let (_, options) = store.0.lock().unwrap()[REFRESH_TOKEN_COOKIE].clone();
        assert_eq!(options.max_age, Some(Duration::from_secs(604_800)));
    }

    #[test]
    fn test_clear_tokens() {
        let store = MapStore::default();
        store.set(ACCESS_TOKEN_COOKIE, "a", &policy().access());
        store.set(REFRESH_TOKEN_COOKIE, "r", &policy().refresh());
        assert!(has_credential(&store));

        clear_tokens(&store);
        assert!(!has_credential(&store));
    }

    #[test]
    fn test_set_cookie_header() {
        let header = policy().access().set_cookie_header("accessToken", "a b");
        assert_eq!(
            header,
            "accessToken=a%20b; Path=/; SameSite=Lax; Max-Age=3600; HttpOnly; Secure"
        );
    }
}
