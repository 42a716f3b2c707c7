//! In-process credential store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;
use reqwest::cookie::{CookieStore as _, Jar};
use url::Url;

use super::{CookieOptions, CredentialStore};

/// Upper bound on stored keys; only the two credential names are ever used.
const MAX_ENTRIES: u64 = 16;

#[derive(Clone)]
struct Entry {
    value: String,
    max_age: Option<Duration>,
}

/// Expires each entry after its cookie `Max-Age`.
struct MaxAgeExpiry;

impl Expiry<String, Entry> for MaxAgeExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.max_age
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.max_age
    }
}

/// Credential store for code running outside a server request.
///
/// Reads prefer a fast local store and fall back to the cookies the HTTP
/// client has been sent (for example by a storefront login). Entries
/// expire after their `Max-Age`, like the cookies they stand in for.
#[derive(Clone)]
pub struct ClientCredentialStore {
    local: Cache<String, Entry>,
    jar: Arc<Jar>,
    origin: Url,
}

impl ClientCredentialStore {
    /// A store whose cookie fallback reads cookies sent for `origin`.
    #[must_use]
    pub fn new(origin: Url) -> Self {
        Self::with_jar(origin, Arc::new(Jar::default()))
    }

    /// A store sharing an existing cookie jar.
    #[must_use]
    pub fn with_jar(origin: Url, jar: Arc<Jar>) -> Self {
        Self {
            local: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .expire_after(MaxAgeExpiry)
                .build(),
            jar,
            origin,
        }
    }

    /// The cookie jar, for `reqwest::ClientBuilder::cookie_provider`.
    #[must_use]
    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    fn cookie(&self, key: &str) -> Option<String> {
        let header = self.jar.cookies(&self.origin)?;
        let header = header.to_str().ok()?;

        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            if name != key {
                return None;
            }
            match urlencoding::decode(value) {
                Ok(decoded) => Some(decoded.into_owned()),
                Err(e) => {
                    tracing::debug!(cookie = key, error = %e, "Ignoring undecodable cookie");
                    None
                }
            }
        })
    }
}

impl CredentialStore for ClientCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.local
            .get(key)
            .map(|entry| entry.value)
            .or_else(|| self.cookie(key))
            .filter(|value| !value.is_empty())
    }

    fn set(&self, key: &str, value: &str, options: &CookieOptions) {
        if options.max_age.is_some_and(|age| age.is_zero()) {
            self.delete(key);
            return;
        }

        self.local.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                max_age: options.max_age,
            },
        );

        // HttpOnly cookies can only be set by a server response
        if !options.http_only {
            self.jar
                .add_cookie_str(&options.set_cookie_header(key, value), &self.origin);
        }
    }

    fn delete(&self, key: &str) {
        self.local.invalidate(key);
        self.jar
            .add_cookie_str(&format!("{key}=; Path=/; Max-Age=0"), &self.origin);
    }
}
