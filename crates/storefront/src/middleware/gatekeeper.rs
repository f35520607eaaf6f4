//! Request-time gatekeeper.
//!
//! Runs before any page is served and decides from cookies alone. It never
//! sees the client's persisted session, only the `auth-token` and
//! `user-role` cookies the client mirrors.
//!
//! # Rules
//!
//! | Path | No token | Role != admin |
//! |------|----------|---------------|
//! | `/cart`, `/checkout`, `/profile`, `/orders` | 302 `/login?redirect=..` | - |
//! | `/admin` | 302 `/login?redirect=..` | 302 `/?error=access-denied` |
//! | `/api/{cart,checkout,profile,orders}` | 401 | - |
//! | `/api/admin` | 401 | 403 |
//! | `/login`, `/signup` with a token | 302 `/` | - |
//!
//! Paths are matched after [`canonical_path`], the same resolution the
//! static file service applies, so encoded or dotted paths cannot skip a rule.
//!
//! "Token" means a cookie value of at least `min_token_length` characters.
//! No signature or expiry check happens here.

use atelier_core::{AUTH_TOKEN_COOKIE, USER_ROLE_COOKIE, UserRole, looks_like_token};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use cookie::Cookie;
use tracing::debug;

use crate::config::GateConfig;
use crate::error::AppError;
use crate::state::AppState;

/// Page prefixes that need a session.
pub const PROTECTED_PAGES: &[&str] = &["/cart", "/checkout", "/profile", "/orders", "/admin"];

/// API prefixes that need a session.
pub const PROTECTED_API: &[&str] = &[
    "/api/cart",
    "/api/checkout",
    "/api/profile",
    "/api/orders",
    "/api/admin",
];

/// Prefixes that additionally need the admin role.
pub const ADMIN_PREFIXES: &[&str] = &["/admin", "/api/admin"];

/// Pages that bounce signed-in visitors home.
pub const AUTH_ENTRY_PAGES: &[&str] = &["/login", "/signup"];

/// Redirect target for non-admins on admin pages.
pub const ACCESS_DENIED_PATH: &str = "/?error=access-denied";

/// Outcome of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Serve the request.
    Allow,
    /// Protected page without a session.
    RedirectToLogin {
        /// Path to return to after login.
        redirect: String,
    },
    /// Protected API without a session.
    Unauthorized,
    /// Admin page with a non-admin role.
    AccessDenied,
    /// Admin API with a non-admin role.
    Forbidden,
    /// Login or signup page with a session.
    AlreadyAuthenticated,
}

/// Route protection rules.
#[derive(Debug, Clone, Copy)]
pub struct GateRules {
    min_token_length: usize,
}

impl GateRules {
    #[must_use]
    pub const fn new(config: GateConfig) -> Self {
        Self {
            min_token_length: config.min_token_length,
        }
    }

    /// Decide what to do with `path` given the raw cookie values.
    ///
    /// `path` is canonicalized first (see [`canonical_path`]) so it is matched
    /// in the form the static file service resolves it.
    #[must_use]
    pub fn evaluate(&self, path: &str, token: Option<&str>, role: Option<&str>) -> GateDecision {
        let canonical = canonical_path(path);
        let path = canonical.as_str();
        let has_session = token.is_some_and(|t| looks_like_token(t, self.min_token_length));
        let is_api = matches_any(path, PROTECTED_API);

        if has_session && matches_any(path, AUTH_ENTRY_PAGES) {
            return GateDecision::AlreadyAuthenticated;
        }

        if !is_api && !matches_any(path, PROTECTED_PAGES) {
            return GateDecision::Allow;
        }

        if !has_session {
            return if is_api {
                GateDecision::Unauthorized
            } else {
                GateDecision::RedirectToLogin {
                    redirect: path.to_string(),
                }
            };
        }

        let is_admin = role.is_some_and(|r| r == UserRole::Admin.as_str());
        if matches_any(path, ADMIN_PREFIXES) && !is_admin {
            return if is_api {
                GateDecision::Forbidden
            } else {
                GateDecision::AccessDenied
            };
        }

        GateDecision::Allow
    }
}

impl Default for GateRules {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

/// Resolve a request path the way the static file service does.
///
/// Percent-decodes once, drops empty and `.` segments and applies `..`
/// (never above the root). A trailing slash is kept. `//admin/./x`,
/// `/%61dmin/x` and `/shop/../admin/x` all become `/admin/x`.
#[must_use]
pub fn canonical_path(raw: &str) -> String {
    let decoded = urlencoding::decode_binary(raw.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut path = format!("/{}", segments.join("/"));
    if !segments.is_empty() && decoded.ends_with('/') {
        path.push('/');
    }
    path
}

/// Segment-aware prefix match: `/cart` matches `/cart` and `/cart/x`, not `/cartography`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn matches_any(path: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| matches_prefix(path, prefix))
}

/// Read the `auth-token` and `user-role` cookies from request headers.
fn session_cookies(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let mut token = None;
    let mut role = None;

    let cookies = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok);

    for cookie in cookies {
        match cookie.name() {
            AUTH_TOKEN_COOKIE => token = Some(cookie.value().to_string()),
            USER_ROLE_COOKIE => role = Some(cookie.value().to_string()),
            _ => {}
        }
    }

    (token, role)
}

/// 302 Found to `location`.
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => AppError::Internal(format!("invalid redirect target: {location}")).into_response(),
    }
}

/// Middleware applying [`GateRules`] to every request.
pub async fn gatekeeper_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (token, role) = session_cookies(request.headers());
    let path = request.uri().path();
    let decision = state.gate().evaluate(path, token.as_deref(), role.as_deref());

    if decision != GateDecision::Allow {
        debug!(path = %path, ?decision, "Gatekeeper intercepted request");
    }

    match decision {
        GateDecision::Allow => next.run(request).await,
        GateDecision::RedirectToLogin { redirect } => {
            found(&format!("/login?redirect={}", urlencoding::encode(&redirect)))
        }
        GateDecision::Unauthorized => {
            AppError::Unauthorized("Authentication required".to_string()).into_response()
        }
        GateDecision::AccessDenied => found(ACCESS_DENIED_PATH),
        GateDecision::Forbidden => {
            AppError::Forbidden("Admin access required".to_string()).into_response()
        }
        GateDecision::AlreadyAuthenticated => found("/"),
    }
}
