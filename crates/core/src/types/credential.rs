//! Access and refresh credentials.
//!
//! Tokens are JWTs issued by the API. Signature verification is the API's
//! job; the storefront only reads the embedded `exp` claim to decide whether
//! an access token is still usable. An undecodable token is always treated
//! as expired.

use core::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cookie (and client store key) holding the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Cookie (and client store key) holding the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Seconds before the embedded expiry at which an access token counts as stale.
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 60;

/// Errors decoding a token's claims.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token does not have three dot-separated segments.
    #[error("token is not a three-part JWT")]
    Malformed,

    /// The payload segment is not valid base64url.
    #[error("invalid token payload encoding: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// The payload is not a JSON object with an `exp` claim.
    #[error("invalid token claims: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Claims read from an access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry as a Unix timestamp (seconds).
    pub exp: i64,
    /// Issued-at as a Unix timestamp (seconds).
    #[serde(default)]
    pub iat: Option<i64>,
    /// `access` or `refresh`.
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenClaims {
    /// The expiry as a UTC timestamp, if representable.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Decode a token's claims without verifying its signature.
///
/// # Errors
///
/// Returns `TokenError` if the token is not a JWT or its payload cannot be decoded.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    // Some issuers pad the segments even though the JOSE spec says not to
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Whether `token` must be treated as expired at `now`.
///
/// True when `now >= exp - margin_secs` or when the token cannot be decoded.
#[must_use]
pub fn is_expired_at(token: &str, margin_secs: i64, now: DateTime<Utc>) -> bool {
    decode_claims(token).map_or(true, |claims| {
        now.timestamp() >= claims.exp.saturating_sub(margin_secs)
    })
}

/// Whether `token` must be treated as expired right now.
#[must_use]
pub fn is_expired(token: &str, margin_secs: i64) -> bool {
    is_expired_at(token, margin_secs, Utc::now())
}

/// A credential pair as returned by the login and refresh endpoints.
///
/// `refresh` is only present when the API rotates the refresh token.
/// Implements `Debug` manually so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// The short-lived bearer credential.
    pub access: String,
    /// The rotated refresh token, if the API issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"[REDACTED]")
            .field("refresh", &self.refresh.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Where a stored credential sits in its lifecycle.
///
/// `Valid -> Stale -> (refresh) -> Valid | Invalid`. Invalid is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Either the access or the refresh token is absent.
    Missing,
    /// The access token is usable.
    Valid,
    /// The access token is past its expiry margin (or undecodable) and
    /// must be refreshed before use.
    Stale,
}

impl CredentialState {
    /// Classify a stored credential pair at `now`.
    ///
    /// Both tokens must be present for the credential to be anything but
    /// `Missing`; a valid access token alone is not a session.
    #[must_use]
    pub fn classify(
        access: Option<&str>,
        refresh: Option<&str>,
        margin_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        match (access, refresh) {
            (Some(access), Some(_)) if !access.is_empty() => {
                if is_expired_at(access, margin_secs, now) {
                    Self::Stale
                } else {
                    Self::Valid
                }
            }
            _ => Self::Missing,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token_expiring_at(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"token_type":"access"}}"#));
        format!("{header}.{payload}.signature")
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    #[test]
    fn test_decode_claims() {
        let claims = decode_claims(&token_expiring_at(1_700_003_600)).unwrap();
        assert_eq!(claims.exp, 1_700_003_600);
        assert_eq!(claims.token_type.as_deref(), Some("access"));
    }

    #[test]
    fn test_expiry_margin_boundary() {
        let issued = 1_700_000_000;
        let token = token_expiring_at(issued + 3600);

        assert!(!is_expired_at(&token, 60, at(issued + 3539)));
        assert!(is_expired_at(&token, 60, at(issued + 3540)));
        assert!(is_expired_at(&token, 60, at(issued + 3541)));
    }

    #[test]
    fn test_undecodable_token_is_expired() {
        let now = at(1_700_000_000);
        assert!(is_expired_at("not-a-jwt", 60, now));
        assert!(is_expired_at("a.!!!.c", 60, now));
        assert!(is_expired_at("a.b.c.d", 60, now));

        let no_exp = format!("x.{}.y", URL_SAFE_NO_PAD.encode(br#"{"sub":"1"}"#));
        assert!(is_expired_at(&no_exp, 60, now));
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":10}"#);
        let claims = decode_claims(&format!("h.{payload}.s")).unwrap();
        assert_eq!(claims.exp, 10);
    }

    #[test]
    fn test_classify_requires_both_tokens() {
        let now = at(1_700_000_000);
        let valid = token_expiring_at(1_700_003_600);

        assert_eq!(
            CredentialState::classify(Some(&valid), None, 60, now),
            CredentialState::Missing
        );
        assert_eq!(
            CredentialState::classify(None, Some("r"), 60, now),
            CredentialState::Missing
        );
        assert_eq!(
            CredentialState::classify(Some(&valid), Some("r"), 60, now),
            CredentialState::Valid
        );
        assert_eq!(
            CredentialState::classify(Some("garbage"), Some("r"), 60, now),
            CredentialState::Stale
        );
    }

    #[test]
    fn test_token_pair_debug_redacts() {
        let pair = TokenPair {
            access: "secret-access".to_string(),
            refresh: Some("secret-refresh".to_string()),
        };
        let debug = format!("{pair:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
