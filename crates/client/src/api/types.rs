//! Response and request contracts of the remote API.

use atelier_core::{Email, ProductId, ProductSnapshot, Size, User};
use serde::{Deserialize, Serialize};

use super::ApiError;

/// Standard `{status, data | message, code?}` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope<T> {
    /// `{"status":"success","data":...}`
    Success {
        /// Payload.
        data: T,
    },
    /// `{"status":"error","message":...,"code":...}`
    Error {
        /// Human readable message.
        message: String,
        /// Optional machine-readable code.
        #[serde(default)]
        code: Option<String>,
    },
}

impl<T> Envelope<T> {
    /// Convert into a `Result`, attaching the HTTP status to errors.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Rejected` for error envelopes.
    pub fn into_result(self, status: u16) -> Result<T, ApiError> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Error { message, code } => Err(ApiError::Rejected {
                status,
                message,
                code,
            }),
        }
    }
}

/// An access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Short-lived bearer credential.
    pub access_token: String,
    /// Credential used solely to mint new access tokens.
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a pair.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Both tokens are non-empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }

    /// Reject incomplete pairs as malformed.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Malformed` if either token is empty.
    pub fn validated(self) -> Result<Self, ApiError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(ApiError::Malformed("token pair is incomplete".to_string()))
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// `data` of a successful login.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    /// Authenticated identity.
    pub user: User,
    /// Minted credentials.
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// `data` of a successful signup.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupPayload {
    /// The created account.
    pub user: User,
}

/// Body of `GET /auth/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeResponse {
    /// Identity behind the bearer token.
    pub user: User,
}

/// Body of `POST /auth/refresh-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    /// New pair.
    pub data: TokenPair,
}

/// Signup form.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Login email.
    pub email: Email,
    /// Chosen password.
    #[serde(skip)]
    pub password: secrecy::SecretString,
}

impl std::fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupRequest")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A cart line sent to the server (merge or add).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemInput {
    /// Catalog id.
    pub product_id: ProductId,
    /// Size label, for sized garments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Number of units.
    pub quantity: u32,
}

/// A line of the authoritative server cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCartLine {
    /// Product data as the server prices it.
    pub product: ProductSnapshot,
    /// Size label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Number of units.
    pub quantity: u32,
}

/// The per-user server cart, mirrored read-only on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCart {
    /// Cart lines.
    #[serde(default)]
    pub items: Vec<ServerCartLine>,
}

impl ServerCart {
    /// Total number of units (the header badge count).
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }

    /// Quantity held for a product/size pair.
    #[must_use]
    pub fn quantity_of(&self, product_id: &ProductId, size: Option<&Size>) -> u32 {
        self.items
            .iter()
            .filter(|line| &line.product.id == product_id && line.size.as_ref() == size)
            .map(|line| line.quantity)
            .sum()
    }
}
