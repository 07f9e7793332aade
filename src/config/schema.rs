//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root configuration for the pipeline server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment. Gates access logging, the auth rate limiter
    /// and stack exposure in error responses.
    pub environment: Environment,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Request body parsing limits.
    pub body: BodyConfig,

    /// Trust settings for proxy-forwarded headers.
    pub proxy: ProxyConfig,

    /// Bearer token verification settings.
    pub jwt: JwtConfig,

    /// Auth endpoint rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown environment `{0}` (expected development, production or test)")]
pub struct EnvironmentParseError(String);

impl FromStr for Environment {
    type Err = EnvironmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            _ => Err(EnvironmentParseError(s.to_string())),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Body parser configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum accepted JSON or urlencoded body, in bytes.
    pub limit_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 100 * 1024,
        }
    }
}

/// Proxy trust configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Derive the client address from the leftmost `X-Forwarded-For` entry.
    /// Only enable behind a proxy that overwrites the header.
    pub trust_forwarded: bool,
}

/// JWT strategy configuration.
#[derive(Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret used to verify access tokens.
    pub secret: String,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Rate limiting configuration for `/v1/auth`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of the counting window in seconds.
    pub window_secs: u64,

    /// Requests allowed per client within one window.
    pub max_requests: u32,

    /// Do not count responses with a status below 400.
    pub skip_successful: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_requests: 20,
            skip_successful: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error or a full
    /// `EnvFilter` expression).
    pub log_level: String,

    /// Emit JSON log lines. Always on in production.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(" Test ".parse::<Environment>().unwrap(), Environment::Test);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("environment = \"production\"").unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.rate_limit.max_requests, 20);
        assert_eq!(config.rate_limit.window_secs, 900);
        assert_eq!(config.body.limit_bytes, 102_400);
        assert!(!config.proxy.trust_forwarded);
    }

    #[test]
    fn jwt_secret_is_not_printed() {
        let config = JwtConfig {
            secret: "hunter2".into(),
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
