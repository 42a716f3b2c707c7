//! Cookie-backed credential store for server-rendered requests.
//!
//! Reads come from the incoming `Cookie` header; writes become `Set-Cookie`
//! headers on the response. Because `tower-cookies` tracks additions, a
//! token written early in a request (by the session guard, say) is what
//! later reads in the same request see.

use agrihcm_client::{CookieOptions, CredentialStore, SameSite};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

/// [`CredentialStore`] over one request's cookie jar.
#[derive(Clone)]
pub struct CookieJarStore {
    cookies: Cookies,
}

impl CookieJarStore {
    #[must_use]
    pub const fn new(cookies: Cookies) -> Self {
        Self { cookies }
    }
}

impl CredentialStore for CookieJarStore {
    fn get(&self, key: &str) -> Option<String> {
        self.cookies
            .get(key)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    fn set(&self, key: &str, value: &str, options: &CookieOptions) {
        let mut cookie = Cookie::build((key.to_string(), value.to_string()))
            .path(options.path.clone())
            .http_only(options.http_only)
            .secure(options.secure)
            .same_site(same_site(options.same_site));

        if let Some(max_age) = options.max_age {
            let secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            cookie = cookie.max_age(Duration::seconds(secs));
        }

        self.cookies.add(cookie.build());
    }

    fn delete(&self, key: &str) {
        let cookie = Cookie::build((key.to_string(), String::new()))
            .path("/")
            .http_only(true)
            .max_age(Duration::ZERO)
            .build();
        self.cookies.add(cookie);
    }
}

const fn same_site(value: SameSite) -> tower_cookies::cookie::SameSite {
    match value {
        SameSite::Strict => tower_cookies::cookie::SameSite::Strict,
        SameSite::Lax => tower_cookies::cookie::SameSite::Lax,
        SameSite::None => tower_cookies::cookie::SameSite::None,
    }
}
