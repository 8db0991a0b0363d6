//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the analytics store password and
//! raw bearer tokens. `SecretString` implements `Debug` with redaction, so
//! any config or request struct deriving `Debug` stays safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreCredentials {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let creds = StoreCredentials {
//!     username: "reports".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("hunter2"));
//! assert_eq!(creds.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
