//! Shared cryptographic helpers for Nova services
//!
//! - `jwt`: RS256 access-token validation (and issuance for tooling/tests)
//! - `hmac_signing`: HMAC-SHA256 signatures used by the realtime channel handshake

pub mod hmac_signing;
pub mod jwt;

pub use hmac_signing::{hmac_sha256_hex, verify_hmac_sha256_hex};
pub use jwt::{Claims, JwtIssuer, JwtValidator};
