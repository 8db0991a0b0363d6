//! Middleware for the reports gateway.
//!
//! # Components
//!
//! - `auth` - Bearer token authentication for protected routes
//! - `cors` - Fixed CORS headers and preflight short-circuit
//! - `http_metrics` - Request metrics for every response

pub mod auth;
pub mod cors;
pub mod http_metrics;

pub use auth::{require_auth, AuthState};
pub use cors::cors;
pub use http_metrics::http_metrics_middleware;
