//! Common utilities shared across the reports gateway crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, header parsing, clock skew)
pub mod jwt;
