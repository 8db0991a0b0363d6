//! Bearer token authentication.
//!
//! - `jwks` - Identity provider key set retrieval, caching and refresh
//! - `jwt` - Token verification against the cached key set
//! - `claims` - The verified caller identity

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::Identity;
pub use jwks::{KeySetCache, KeySetConfig, KeySetError};
pub use jwt::{AuthError, TokenVerifier};
