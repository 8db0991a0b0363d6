//! Test utilities for the reports gateway.
//!
//! - `test_keys` - Deterministic Ed25519 signing keys and claim builders
//! - `mock_jwks` - Mock identity provider serving a JWKS document
//! - `server_harness` - Real gateway server on a random port

pub mod mock_jwks;
pub mod server_harness;
pub mod test_keys;

pub use mock_jwks::*;
pub use reports_gateway::repositories::reports::mock::InMemoryReportStore;
pub use server_harness::*;
pub use test_keys::*;
