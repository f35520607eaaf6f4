//! Names shared by the cookie mirror and the storefront gatekeeper.

/// Cookie carrying the access token.
pub const AUTH_TOKEN_COOKIE: &str = "auth-token";

/// Cookie carrying the role marker (`user` or `admin`).
pub const USER_ROLE_COOKIE: &str = "user-role";

/// Shortest token the gatekeeper treats as present.
pub const MIN_TOKEN_LENGTH: usize = 10;

/// Whether a cookie value looks like a token.
///
/// Length only; signatures and expiry are checked by the API, not here.
#[must_use]
pub fn looks_like_token(value: &str, min_length: usize) -> bool {
    let value = value.trim();
    !value.is_empty() && value.chars().count() >= min_length
}
