//! Gateway error type.
//!
//! Every non-2xx response is turned into one [`ApiError`] at the gateway so
//! callers match on a closed set of kinds instead of re-reading JSON.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Cap on how much of a non-JSON error body ends up in a message.
const MAX_TEXT_MESSAGE: usize = 200;

/// Errors surfaced by authenticated API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No credential, or the credential was rejected even after one refresh.
    #[error("authentication required")]
    Unauthorized,

    /// Field-level validation errors, from a 400 or 422.
    #[error("{message}")]
    Validation {
        status: u16,
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    /// The request conflicts with current server state (e.g. not enough stock).
    #[error("{message}")]
    Conflict { message: String },

    /// The request never got a response.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Any other non-success response.
    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    /// A success response whose body could not be read, or a request that
    /// could not be built.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Classify a non-success response.
    #[must_use]
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let json = serde_json::from_slice::<Value>(body).ok();
        let message = json
            .as_ref()
            .and_then(derive_message)
            .or_else(|| text_message(body))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });

        let stock_conflict = json.as_ref().is_some_and(|body| {
            body.get("shortages").is_some()
                || body
                    .get("error")
                    .and_then(Value::as_str)
                    .is_some_and(|e| e.to_lowercase().contains("stock"))
        });

        match status {
            StatusCode::CONFLICT => Self::Conflict { message },
            StatusCode::BAD_REQUEST if stock_conflict => Self::Conflict { message },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::Validation {
                status: status.as_u16(),
                message,
                fields: json.as_ref().map(field_errors).unwrap_or_default(),
            },
            _ => Self::Status {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Message suitable for showing to a user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => "Please log in to continue.".to_string(),
            Self::Network(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Malformed(_) => "Something went wrong. Please try again.".to_string(),
            Self::Status { status, .. } if *status >= 500 => {
                "Something went wrong. Please try again.".to_string()
            }
            Self::Validation { message, .. }
            | Self::Conflict { message }
            | Self::Status { message, .. } => message.clone(),
        }
    }

    /// Whether retrying the same request later might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// HTTP status of the response, if there was one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Conflict { .. } => Some(409),
            Self::Validation { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::Network(_) | Self::Malformed(_) => None,
        }
    }
}

/// Derive one human-readable message from an API error body.
///
/// Checked in order: `detail`, the first of `non_field_errors`, an
/// `error`/`message` string, then the first field-keyed error as
/// `"field: message"`. Fields keep the order the API wrote them in.
#[must_use]
pub fn derive_message(body: &Value) -> Option<String> {
    let object = body.as_object()?;

    if let Some(detail) = object.get("detail").and_then(Value::as_str) {
        return Some(detail.to_string());
    }

    if let Some(first) = object
        .get("non_field_errors")
        .and_then(first_message)
    {
        return Some(first);
    }

    for key in ["error", "message"] {
        if let Some(message) = object.get(key).and_then(Value::as_str) {
            return Some(message.to_string());
        }
    }

    object
        .iter()
        .filter(|(field, _)| !matches!(field.as_str(), "non_field_errors" | "shortages"))
        .find_map(|(field, value)| first_message(value).map(|message| format!("{field}: {message}")))
}

/// Field-keyed messages, excluding the non-field keys.
fn field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
    let Some(object) = body.as_object() else {
        return BTreeMap::new();
    };

    object
        .iter()
        .filter(|(field, _)| {
            !matches!(
                field.as_str(),
                "detail" | "non_field_errors" | "error" | "message" | "shortages"
            )
        })
        .filter_map(|(field, value)| {
            let messages: Vec<String> = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            (!messages.is_empty()).then(|| (field.clone(), messages))
        })
        .collect()
}

fn first_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(Value::as_str).map(ToString::to_string),
        _ => None,
    }
}

fn text_message(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() || text.starts_with('<') {
        return None;
    }
    Some(text.chars().take(MAX_TEXT_MESSAGE).collect())
}
