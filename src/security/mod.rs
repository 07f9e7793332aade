//! Security stages.
//!
//! # Data Flow
//! ```text
//! Response hardening (headers.rs):
//!     Set the default security headers unless already present
//!
//! Input cleaning (sanitize.rs):
//!     Escape markup → Strip operator keys
//!
//! Cross-origin (cors.rs):
//!     Any origin → Preflights answered before routing
//!
//! Authentication (auth.rs):
//!     Register strategies → Routes extract `Authenticated`
//!
//! Rate limiting (rate_limit.rs):
//!     Production only → Per-client window on /v1/auth
//! ```

pub mod auth;
pub mod cors;
pub mod headers;
pub mod rate_limit;
pub mod sanitize;

pub use auth::{Authenticated, Authenticator, Principal};
pub use rate_limit::RateLimiterState;
