//! Atelier Core - Shared types library.
//!
//! This crate provides the domain types used across all Atelier components:
//! - `client` - Session, token and cart synchronization against the remote API
//! - `storefront` - Edge server running the request-time gatekeeper
//! - `cli` - Shopper command line built on the client
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no storage.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, emails, roles, users, prices and product snapshots

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
