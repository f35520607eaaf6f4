//! Core types for Atelier.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod catalog;
pub mod cookie;
pub mod email;
pub mod id;
pub mod price;
pub mod role;
pub mod user;

pub use catalog::{ProductSnapshot, Size};
pub use cookie::{AUTH_TOKEN_COOKIE, MIN_TOKEN_LENGTH, USER_ROLE_COOKIE, looks_like_token};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use role::{RoleParseError, UserRole};
pub use user::{User, UserPatch};
