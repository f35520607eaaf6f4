//! Remote REST API boundary.
//!
//! # Architecture
//!
//! - [`RemoteApi`] is the seam between session logic and the network; the
//!   session layer only ever sees typed payloads or an [`ApiError`]
//! - [`HttpApi`] is the `reqwest` implementation used in production
//! - Response shapes live in [`types`]: every enveloped endpoint is decoded
//!   into `Envelope<T>` (success-with-payload vs. error-with-message) so no
//!   caller branches on missing fields
//!
//! # Endpoints
//!
//! ```text
//! POST /auth/login          {email,password}          -> Envelope<LoginPayload>
//! POST /auth/signup         {firstName,...,password}  -> Envelope<SignupPayload>
//! GET  /auth/me             (bearer)                  -> {user}
//! POST /auth/refresh-token  {refreshToken}            -> {data:{accessToken,refreshToken}}
//! POST /auth/logout         (bearer)
//! GET  /cart                (bearer)                  -> Envelope<ServerCart>
//! POST /cart/merge          (bearer) {items}          -> Envelope<ServerCart>
//! POST /cart/add            (bearer) {item}           -> Envelope<ServerCart>
//! ```

mod http;
pub mod types;

pub use http::HttpApi;
pub use types::*;

use async_trait::async_trait;
use atelier_core::{Email, User};
use secrecy::SecretString;
use thiserror::Error;

/// Errors that can occur when talking to the remote API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error envelope.
    #[error("{message}")]
    Rejected {
        /// HTTP status of the response.
        status: u16,
        /// Server-provided message, suitable for display.
        message: String,
        /// Optional machine-readable code (e.g. `invalid_credentials`).
        code: Option<String>,
    },

    /// Non-success status without a parseable error envelope.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status of the response.
        status: u16,
        /// First part of the body, for diagnostics.
        body: String,
    },

    /// The body did not match the expected contract.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// HTTP status, when the server responded at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } | Self::Status { status, .. } => Some(*status),
            Self::Network(_) | Self::Malformed(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Operations the session and cart layers need from the remote API.
///
/// Bearer tokens are passed in explicitly by callers, who read them from the
/// in-memory token cache.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Verify credentials and mint a token pair.
    async fn login(&self, email: &Email, password: &SecretString)
    -> Result<LoginPayload, ApiError>;

    /// Register an account. Does not establish a session.
    async fn signup(&self, request: &SignupRequest) -> Result<User, ApiError>;

    /// Fetch the identity behind an access token.
    async fn me(&self, access_token: &str) -> Result<User, ApiError>;

    /// Exchange a refresh token for a new pair.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;

    /// Revoke the session server-side.
    async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError>;

    /// Fetch the authoritative server cart.
    async fn get_cart(&self, access_token: &str) -> Result<ServerCart, ApiError>;

    /// Transfer guest lines into the server cart.
    async fn merge_cart(&self, access_token: &str, items: &[CartItemInput])
    -> Result<ServerCart, ApiError>;

    /// Add a single line to the server cart.
    async fn add_to_cart(&self, access_token: &str, item: &CartItemInput)
    -> Result<ServerCart, ApiError>;
}
