//! Bearer token verification.
//!
//! Verifies tokens issued by the identity provider against the cached key
//! set and extracts the caller's identity.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only asymmetric algorithms compatible with the resolved key are accepted
//! - `exp` and `nbf` are checked with clock skew leeway when present
//! - `iat` may not be further in the future than the clock skew
//! - Claims decode into a JSON map, so an unexpected claim shape is a
//!   rejection and never a crash

use crate::auth::claims::{timestamp_claim, Identity};
use crate::auth::jwks::{KeySetCache, KeySetError};
use crate::observability::metrics::record_token_validation;
use common::jwt::{parse_header, validate_iat};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Token verification failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is absent, malformed, untrusted, or outside its validity window.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The token verified but carries no usable `email` claim.
    #[error("Token carries no identity claim")]
    MissingClaim,
}

/// Verification outcome, as a bounded metrics label plus the log reason.
struct Rejection {
    outcome: &'static str,
    error: AuthError,
}

impl Rejection {
    fn unauthenticated(outcome: &'static str, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            error: AuthError::Unauthenticated(reason.into()),
        }
    }
}

/// Verifies bearer tokens against the identity provider's key set.
pub struct TokenVerifier {
    key_set: Arc<KeySetCache>,
    clock_skew: Duration,
    expected_issuer: Option<String>,
}

impl TokenVerifier {
    /// Create a verifier.
    ///
    /// # Arguments
    ///
    /// * `key_set` - Cache of the identity provider's signing keys
    /// * `clock_skew` - Leeway for `exp`/`nbf` and the `iat` future bound
    /// * `expected_issuer` - Required `iss` value; `None` skips the check
    pub fn new(
        key_set: Arc<KeySetCache>,
        clock_skew: Duration,
        expected_issuer: Option<String>,
    ) -> Self {
        Self {
            key_set,
            clock_skew,
            expected_issuer,
        }
    }

    pub fn key_set(&self) -> &Arc<KeySetCache> {
        &self.key_set
    }

    /// Verify a raw bearer token and return the caller's identity.
    ///
    /// # Errors
    ///
    /// - `AuthError::Unauthenticated` for any structural, key, signature or
    ///   temporal failure
    /// - `AuthError::MissingClaim` if the token is valid but has no
    ///   non-empty string `email` claim
    #[instrument(skip_all, name = "rg.auth.verify")]
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        match self.verify_token(token).await {
            Ok(identity) => {
                record_token_validation("success");
                tracing::debug!(target: "rg.auth.jwt", "Token verified");
                Ok(identity)
            }
            Err(rejection) => {
                record_token_validation(rejection.outcome);
                tracing::debug!(
                    target: "rg.auth.jwt",
                    outcome = rejection.outcome,
                    error = %rejection.error,
                    "Token rejected"
                );
                Err(rejection.error)
            }
        }
    }

    async fn verify_token(&self, token: &str) -> Result<Identity, Rejection> {
        // 1. Size check and header decode
        let header = parse_header(token)
            .map_err(|e| Rejection::unauthenticated("malformed", format!("header: {e:?}")))?;

        // 2. Key lookup, refreshing the set once per window on a miss
        let key = self.key_set.resolve(&header.kid).await.map_err(|e| match e {
            KeySetError::KeyNotFound => {
                Rejection::unauthenticated("unknown_key", "no key for the token's kid")
            }
            other => Rejection::unauthenticated("unknown_key", other.to_string()),
        })?;

        // 3. Algorithm must fit the key
        if !key.supports(header.alg) {
            tracing::warn!(
                target: "rg.auth.jwt",
                alg = ?header.alg,
                kty = %key.jwk().kty,
                "Token algorithm does not match its signing key"
            );
            return Err(Rejection::unauthenticated(
                "algorithm",
                format!("algorithm {:?} not accepted for this key", header.alg),
            ));
        }

        // 4. Signature, exp, nbf and iss
        let validation = self.validation(header.alg);
        let claims = decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|e| {
                let outcome = match e.kind() {
                    ErrorKind::ExpiredSignature => "expired",
                    ErrorKind::ImmatureSignature => "not_yet_valid",
                    ErrorKind::InvalidSignature => "signature",
                    ErrorKind::InvalidIssuer => "issuer",
                    ErrorKind::MissingRequiredClaim(_) => "issuer",
                    _ => "invalid",
                };
                Rejection::unauthenticated(outcome, e.to_string())
            })?
            .claims;

        // 5. exp and nbf, when present, must be non-negative integers. The
        // decoder treats a value it cannot read as absent.
        for name in ["exp", "nbf"] {
            match timestamp_claim(&claims, name) {
                Ok(None) => {}
                Ok(Some(value)) if value >= 0 => {}
                _ => {
                    return Err(Rejection::unauthenticated(
                        "invalid",
                        format!("{name} is not a non-negative integer"),
                    ))
                }
            }
        }

        // 6. iat bound
        match timestamp_claim(&claims, "iat") {
            Ok(Some(iat)) => validate_iat(iat, self.clock_skew)
                .map_err(|_| Rejection::unauthenticated("iat", "iat too far in the future"))?,
            Ok(None) => {}
            Err(()) => return Err(Rejection::unauthenticated("invalid", "iat is not an integer")),
        }

        // 7. Identity
        Identity::from_claims(&claims).ok_or(Rejection {
            outcome: "missing_claim",
            error: AuthError::MissingClaim,
        })
    }

    fn validation(&self, alg: jsonwebtoken::Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // Identity provider access tokens carry the "account" audience by default
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        if let Some(issuer) = &self.expected_issuer {
            validation.set_issuer(&[issuer.as_str()]);
            validation.required_spec_claims.insert("iss".to_string());
        }

        validation
    }
}
