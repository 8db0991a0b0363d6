//! TLS setup shared by the outbound HTTP clients.
//!
//! The dependency graph enables both the `ring` and `aws-lc-rs` rustls
//! backends, so rustls cannot pick a process-level provider by itself and
//! panics when the first client is built. One must be installed before any
//! JWKS or ClickHouse client exists.

use rustls::crypto::aws_lc_rs;

/// Install `aws-lc-rs` as the process-level rustls crypto provider.
///
/// A provider that is already installed is kept, so this is safe to call
/// more than once.
pub fn install_crypto_provider() {
    if aws_lc_rs::default_provider().install_default().is_err() {
        tracing::debug!(target: "rg.tls", "rustls crypto provider already installed");
    }
}
