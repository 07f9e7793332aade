//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (APP_ENV / PORT / JWT_SECRET / TRUST_PROXY overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → consulted once while the pipeline is assembled
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; gates are not re-checked per request
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, read_config, ConfigError};
pub use schema::{
    AppConfig, BodyConfig, Environment, JwtConfig, ListenerConfig, ObservabilityConfig,
    ProxyConfig, RateLimitConfig,
};
pub use validation::{validate_config, ValidationError};
