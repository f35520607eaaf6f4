//! Notifications for whatever renders the session (CLI output, UI toasts).

use atelier_core::User;
use serde::Serialize;

/// Where logout sends the user.
pub const LOGIN_PATH: &str = "/login";

/// Severity of a [`SessionEvent::Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Login, signup or silent restore completed.
    LoggedIn { user: User },
    /// Explicit or forced logout. `redirect_to` is `None` when the logout
    /// came from cookie/store reconciliation.
    LoggedOut { redirect_to: Option<String> },
    /// Access token rotated.
    TokensRefreshed,
    /// Store claimed a session the cookie no longer backs.
    SessionMismatch,
    /// Server cart changed.
    CartUpdated { total_items: u32 },
    /// Toast-style message.
    Notice { level: NoticeLevel, message: String },
}

impl SessionEvent {
    pub(crate) fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self::Notice {
            level,
            message: message.into(),
        }
    }
}
