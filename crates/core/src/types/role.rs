//! User roles as reported by the remote API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a role string is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid user role: {0}")]
pub struct RoleParseError(pub String);

/// Role of a storefront account.
///
/// The string form (`user`, `admin`) is what the `user-role` cookie carries,
/// so the gatekeeper can compare it without parsing JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular shopper.
    #[default]
    User,
    /// Store administrator with access to `/admin`.
    Admin,
}

impl UserRole {
    /// Wire and cookie representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Whether this role may enter admin-prefixed routes.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}
