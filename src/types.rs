//! Session, user, profile and role types shared by the manager and the
//! identity service adapters.
//!
//! DESIGN
//! ======
//! Field names follow the service's JSON rows (`profiles`, `user_roles`,
//! GoTrue session payloads) so serde maps them without custom codecs.
//! `ProfileUpdate` has no email field: the email column is immutable from
//! this client and the type makes that unrepresentable.

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds before `expires_at` at which a session is treated as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 10;

// =============================================================================
// ROLE
// =============================================================================

/// Permission role granted to a user through `user_roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Juriste,
    Citoyen,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Juriste, Role::Citoyen];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Juriste => "juriste",
            Self::Citoyen => "citoyen",
        }
    }

    /// Label shown in the user menu.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Admin => "Administrateur",
            Self::Juriste => "Juriste",
            Self::Citoyen => "Citoyen",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role string is not one of `admin`, `juriste`, `citoyen`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "juriste" => Ok(Self::Juriste),
            "citoyen" => Ok(Self::Citoyen),
            _ => Err(UnknownRole(s.to_owned())),
        }
    }
}

// =============================================================================
// USER / SESSION
// =============================================================================

/// Minimal identity record attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Server-issued proof of authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiry as unix seconds. `None` means the service did not say.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl Session {
    /// Whether the session is expired (or about to be) at `now` unix seconds.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|exp| exp - EXPIRY_MARGIN_SECS <= now)
    }

    /// Two sessions are the same when they carry the same access token.
    #[must_use]
    pub fn same_as(&self, other: &Session) -> bool {
        self.access_token == other.access_token
    }
}

/// Auth event kinds delivered on the session-change stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// One transition on the session-change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

// =============================================================================
// PROFILE
// =============================================================================

/// Row of the `profiles` table for one user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Legacy free-text role column; authorization uses `user_roles`.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Profile {
    /// `"First Last"`, else the email, else `"Utilisateur"`.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (non_empty(&self.first_name), non_empty(&self.last_name)) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            _ => non_empty(&self.email)
                .unwrap_or("Utilisateur")
                .to_owned(),
        }
    }

    /// Upper-cased first letters of first and last name, `"U"` when either is missing.
    #[must_use]
    pub fn initials(&self) -> String {
        let first = non_empty(&self.first_name).and_then(|s| s.chars().next());
        let last = non_empty(&self.last_name).and_then(|s| s.chars().next());
        match (first, last) {
            (Some(a), Some(b)) => a.to_uppercase().chain(b.to_uppercase()).collect(),
            _ => "U".to_owned(),
        }
    }

    /// Apply a confirmed update to a local copy. Used by test doubles that
    /// echo rows the way the service does.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(v) = &update.first_name {
            self.first_name = Some(v.clone());
        }
        if let Some(v) = &update.last_name {
            self.last_name = Some(v.clone());
        }
        if let Some(v) = &update.avatar_url {
            self.avatar_url = Some(v.clone());
        }
        if let Some(v) = &update.phone {
            self.phone = Some(v.clone());
        }
        if let Some(v) = &update.status {
            self.status = Some(v.clone());
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Partial profile update. Absent fields are left untouched server-side.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.avatar_url.is_none()
            && self.phone.is_none()
            && self.status.is_none()
    }
}

/// User metadata attached at sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}
