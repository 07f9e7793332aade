//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{AppConfig, Environment};
use crate::config::validation::ValidationError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a configuration file without validating it.
pub fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply `APP_ENV`, `PORT`, `JWT_SECRET` and `TRUST_PROXY` overrides.
///
/// `lookup` abstracts the environment so callers can pass a fixed map.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("APP_ENV") {
        config.environment = value.parse::<Environment>().map_err(|e| ConfigError::Env {
            var: "APP_ENV",
            reason: e.to_string(),
        })?;
    }

    if let Some(value) = lookup("PORT") {
        let port: u16 = value.trim().parse().map_err(|_| ConfigError::Env {
            var: "PORT",
            reason: format!("`{value}` is not a port number"),
        })?;
        config.listener.bind_address = replace_port(&config.listener.bind_address, port);
    }

    if let Some(value) = lookup("JWT_SECRET") {
        config.jwt.secret = value;
    }

    if let Some(value) = lookup("TRUST_PROXY") {
        config.proxy.trust_forwarded = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(ConfigError::Env {
                    var: "TRUST_PROXY",
                    reason: format!("`{value}` is not a boolean"),
                })
            }
        };
    }

    Ok(())
}

fn replace_port(bind_address: &str, port: u16) -> String {
    match bind_address.rsplit_once(':') {
        Some((host, _)) => format!("{host}:{port}"),
        None => format!("{bind_address}:{port}"),
    }
}
