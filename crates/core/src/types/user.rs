//! User identity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Email, UserId, UserRole};

/// Identity record returned by the remote API on login and `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Remote id.
    #[serde(alias = "_id")]
    pub id: UserId,
    /// Login email.
    pub email: Email,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Account role, mirrored into the `user-role` cookie.
    #[serde(default)]
    pub role: UserRole,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// "First Last", trimmed when either part is empty.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: UserPatch) {
        if let Some(first_name) = patch.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            self.last_name = last_name;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
    }
}

/// Partial update of the editable profile fields.
///
/// Role and id are not editable from the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    /// New given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// New family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// New email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> User {
        serde_json::from_str(
            r#"{"_id":"u1","email":"a@x.com","firstName":"Ada","lastName":"Lovelace","role":"admin","createdAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_deserializes_remote_shape() {
        let user = sample();
        assert_eq!(user.id.as_str(), "u1");
        assert_eq!(user.role, UserRole::Admin);
        assert_eq!(user.full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_role_defaults_to_user() {
        let user: User = serde_json::from_str(
            r#"{"id":"u2","email":"b@x.com","firstName":"B","lastName":"","createdAt":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.full_name(), "B");
    }

    #[test]
    fn test_apply_patch_only_touches_given_fields() {
        let mut user = sample();
        user.apply(UserPatch {
            first_name: Some("Augusta".into()),
            ..UserPatch::default()
        });
        assert_eq!(user.first_name, "Augusta");
        assert_eq!(user.last_name, "Lovelace");
        assert_eq!(user.role, UserRole::Admin);
    }
}
