//! Session state types.

use atelier_core::User;
use serde::{Deserialize, Serialize};

/// The authoritative authentication record.
///
/// `is_authenticated` implies `user` and a non-empty `access_token`; the
/// token store resets to [`AuthState::default`] whenever a transition would
/// break that.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    /// Identity of the signed-in user.
    pub user: Option<User>,
    /// Short-lived bearer credential.
    pub access_token: Option<String>,
    /// Credential used to mint new access tokens.
    pub refresh_token: Option<String>,
    /// True iff login succeeded and no logout or failure happened since.
    pub is_authenticated: bool,
    /// A login request is in flight.
    pub is_loading: bool,
    /// Message of the last failed login, for display.
    pub error: Option<String>,
}

impl AuthState {
    /// The access token, if present and non-empty.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        non_empty(self.access_token.as_deref())
    }

    /// The refresh token, if present and non-empty.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(self.refresh_token.as_deref())
    }

    /// Whether the authentication invariant holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.is_authenticated || (self.user.is_some() && self.access_token().is_some())
    }

    /// Whether every field is cleared.
    #[must_use]
    pub fn is_logged_out(&self) -> bool {
        !self.is_authenticated
            && self.user.is_none()
            && self.access_token.is_none()
            && self.refresh_token.is_none()
    }

    /// Slice written to the persisted snapshot.
    #[must_use]
    pub fn persisted(&self) -> PersistedAuth {
        PersistedAuth {
            user: self.user.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            is_authenticated: self.is_authenticated,
        }
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("user", &self.user.as_ref().map(|u| u.id.as_str()))
            .field("access_token", &redacted(self.access_token.as_deref()))
            .field("refresh_token", &redacted(self.refresh_token.as_deref()))
            .field("is_authenticated", &self.is_authenticated)
            .field("is_loading", &self.is_loading)
            .field("error", &self.error)
            .finish()
    }
}

/// Persisted form of the session slice.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAuth {
    /// Identity of the signed-in user.
    #[serde(default)]
    pub user: Option<User>,
    /// Bearer credential.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Refresh credential.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Stored authentication flag (re-validated on rehydration).
    #[serde(default)]
    pub is_authenticated: bool,
}

impl PersistedAuth {
    /// Rebuild runtime state from a restored slice.
    ///
    /// Empty-string tokens are treated as absent, and the stored flag only
    /// authenticates when a user and both tokens survived.
    #[must_use]
    pub fn rehydrate(self) -> AuthState {
        let access_token = self.access_token.filter(|t| !t.trim().is_empty());
        let refresh_token = self.refresh_token.filter(|t| !t.trim().is_empty());
        let is_authenticated = self.is_authenticated
            && self.user.is_some()
            && access_token.is_some()
            && refresh_token.is_some();

        AuthState {
            user: self.user,
            access_token,
            refresh_token,
            is_authenticated,
            is_loading: false,
            error: None,
        }
    }
}

impl std::fmt::Debug for PersistedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedAuth")
            .field("user", &self.user.as_ref().map(|u| u.id.as_str()))
            .field("access_token", &redacted(self.access_token.as_deref()))
            .field("refresh_token", &redacted(self.refresh_token.as_deref()))
            .field("is_authenticated", &self.is_authenticated)
            .finish()
    }
}

/// What subscribers observe: the auth record plus store bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Authentication record.
    pub auth: AuthState,
    /// The persisted snapshot has been loaded.
    pub hydrated: bool,
    /// Bumped by every login success, login failure and logout.
    ///
    /// Async operations compare it before applying late results.
    pub epoch: u64,
}

impl Session {
    /// Authenticated and hydrated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.hydrated && self.auth.is_authenticated
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn redacted(value: Option<&str>) -> Option<&'static str> {
    value.map(|_| "[REDACTED]")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use atelier_core::{Email, UserId, UserRole};

    use super::*;

    fn user() -> User {
        User {
            id: UserId::new("u1"),
            email: Email::parse("a@x.com").unwrap(),
            first_name: "A".to_string(),
            last_name: "X".to_string(),
            role: UserRole::User,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_rehydrate_requires_non_empty_tokens() {
        let restored = PersistedAuth {
            user: Some(user()),
            access_token: Some(String::new()),
            refresh_token: Some("ref".to_string()),
            is_authenticated: true,
        }
        .rehydrate();
        assert!(!restored.is_authenticated);
        assert!(restored.access_token.is_none());
        assert!(restored.is_consistent());
    }

    #[test]
    fn test_rehydrate_null_tokens_do_not_authenticate() {
        let restored = PersistedAuth {
            user: Some(user()),
            access_token: None,
            refresh_token: None,
            is_authenticated: true,
        }
        .rehydrate();
        assert!(!restored.is_authenticated);
    }

    #[test]
    fn test_rehydrate_complete_session() {
        let restored = PersistedAuth {
            user: Some(user()),
            access_token: Some("acc-1234567890".to_string()),
            refresh_token: Some("ref".to_string()),
            is_authenticated: true,
        }
        .rehydrate();
        assert!(restored.is_authenticated);
        assert!(restored.is_consistent());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let state = AuthState {
            access_token: Some("very-secret-token".to_string()),
            ..AuthState::default()
        };
        assert!(!format!("{state:?}").contains("very-secret-token"));
    }
}
