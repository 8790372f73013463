//! Credentials layer: signed capability claims and opaque identifiers
//!
//! Issues and verifies the JWTs that carry `RoomClaim` payloads, and
//! generates the cryptographically unpredictable ids used for rooms and
//! other peer-facing tokens.

mod jwt;

pub use jwt::*;
