//! Request pipeline bootstrapper.
//!
//! Assembles a configured HTTP application as an explicit, ordered list of
//! stages: security headers, body parsing, input sanitizing, compression,
//! CORS, authentication, the auth rate limiter, routing and an error tail
//! that renders every failure as `{ code, message[, stack] }`.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::{AppConfig, Environment};
pub use error::ApiError;
pub use http::{build_application, Application, ApplicationBuilder, HttpServer, Stage};
pub use lifecycle::Shutdown;
