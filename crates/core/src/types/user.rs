//! User profile as returned by `GET /api/users/me/`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::id::UserId;

/// The logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub date_joined: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl User {
    /// Full name if known, otherwise the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) if !first.is_empty() => format!("{first} {last}"),
            (Some(first), _) if !first.is_empty() => first.to_string(),
            (_, Some(last)) if !last.is_empty() => last.to_string(),
            _ => self.username.clone(),
        }
    }
}
