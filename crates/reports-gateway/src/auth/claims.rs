//! Verified caller identity.
//!
//! Claims are decoded into a dynamically-typed map so that an unexpected
//! claim shape never aborts decoding. Identity extraction then checks the
//! claim's presence and type explicitly.

use serde_json::{Map, Value};
use std::fmt;

/// Name of the claim that identifies the caller.
pub const IDENTITY_CLAIM: &str = "email";

/// The verified principal a request acts as.
///
/// The wrapped email is the only value ever bound into a report query. It is
/// redacted in Debug output so it cannot leak through logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    /// Wrap an already-verified email.
    pub fn new(email: impl Into<String>) -> Self {
        Self(email.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the identity from a verified claim map.
    ///
    /// Returns `None` unless the `email` claim is present, is a JSON string,
    /// and is non-empty.
    pub fn from_claims(claims: &Map<String, Value>) -> Option<Self> {
        match claims.get(IDENTITY_CLAIM) {
            Some(Value::String(email)) if !email.is_empty() => Some(Self(email.clone())),
            _ => None,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identity").field(&"[REDACTED]").finish()
    }
}

/// Read an integer timestamp claim such as `iat`.
///
/// Non-integer values are reported as `Err(())` so callers can reject the
/// token instead of silently skipping the check.
pub(crate) fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> Result<Option<i64>, ()> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or(()),
    }
}
