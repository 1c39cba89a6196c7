//! # Actix Middleware Library
//!
//! Shared middleware components for Nova Actix services
//!
//! ## Modules
//! - `jwt_auth`: bearer-token identity resolution into a typed `UserId`
//! - `request_id`: `x-request-id` propagation
//! - `logging`: per-request tracing

pub mod jwt_auth;
pub mod logging;
pub mod request_id;

pub use jwt_auth::{
    IdentityError, IdentityProvider, JwtAuthMiddleware, JwtIdentityProvider, UserId,
};
pub use logging::Logging;
pub use request_id::{RequestId, RequestIdValue};
