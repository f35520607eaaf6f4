//! Atelier client library.
//!
//! Keeps the shopper's session consistent across the places it lives:
//!
//! - [`session::TokenStore`] - authoritative, persisted auth record
//! - [`session::CookieMirror`] - `auth-token`/`user-role` cookies read by the
//!   storefront gatekeeper
//! - [`session::TokenCache`] - in-memory bearer token for outgoing requests
//! - the reconciler, which detects and repairs divergence between them
//! - [`cart::CartCoordinator`] - merges the guest cart once per login
//!
//! [`AtelierClient`] wires these together behind an injected [`api::RemoteApi`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
mod client;
pub mod config;
pub mod persist;
pub mod session;

#[cfg(test)]
mod testing;

pub use client::{AtelierClient, ClientError};
