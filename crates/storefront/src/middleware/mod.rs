//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Gatekeeper (cookie-based route protection)

pub mod gatekeeper;

pub use gatekeeper::{GateDecision, GateRules, gatekeeper_middleware};
