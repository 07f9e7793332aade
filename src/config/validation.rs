//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and
//! environment-dependent requirements. All problems are reported at once.

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::AppConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("body.limit_bytes must be greater than zero")]
    BodyLimit,

    #[error("rate_limit.window_secs must be greater than zero")]
    RateLimitWindow,

    #[error("rate_limit.max_requests must be greater than zero")]
    RateLimitMax,

    #[error("jwt.secret is required in production")]
    MissingJwtSecret,

    #[error("observability.log_level `{0}` is not a valid filter")]
    LogLevel(String),
}

/// Validate a configuration before it is accepted.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.body.limit_bytes == 0 {
        errors.push(ValidationError::BodyLimit);
    }

    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::RateLimitWindow);
    }
    if config.rate_limit.max_requests == 0 {
        errors.push(ValidationError::RateLimitMax);
    }

    if config.environment.is_production() && config.jwt.secret.trim().is_empty() {
        errors.push(ValidationError::MissingJwtSecret);
    }

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::LogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = AppConfig::default();
        config.environment = Environment::Production;
        config.listener.bind_address = "nowhere".into();
        config.rate_limit.max_requests = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::BindAddress("nowhere".into()),
                ValidationError::RateLimitMax,
                ValidationError::MissingJwtSecret,
            ]
        );
    }

    #[test]
    fn secret_only_required_in_production() {
        let mut config = AppConfig::default();
        config.environment = Environment::Test;
        assert!(validate_config(&config).is_ok());
    }
}
