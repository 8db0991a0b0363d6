//! Reports Gateway Library
//!
//! A single-endpoint data gateway: it verifies a caller's bearer token
//! against the identity provider's published signing keys and returns that
//! caller's device telemetry reports from ClickHouse as JSON.
//!
//! # Architecture
//!
//! The gateway follows the Handler -> Service -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//!                        |
//!                  auth/jwt.rs -> auth/jwks.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Key set cache, token verification and caller identity
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication, CORS and HTTP metrics
//! - `models` - Report records
//! - `observability` - Prometheus metrics
//! - `repositories` - Report store access
//! - `routes` - Axum router setup
//! - `services` - Identity-scoped report reads
//! - `tls` - rustls crypto provider setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tls;
