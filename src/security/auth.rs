//! Authentication strategy registry and the bearer-token strategy.
//!
//! The pipeline's authentication stage only registers strategies: it puts
//! an [`Authenticator`] into every request's extensions. Routes opt in by
//! extracting [`Authenticated`], which runs the `jwt` strategy and rejects
//! with `401 Please authenticate`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::JwtConfig;
use crate::error::ApiError;

pub const JWT_STRATEGY: &str = "jwt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenType {
    Access,
    Refresh,
    ResetPassword,
    VerifyEmail,
}

/// Claims carried by issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub iat: u64,
    pub exp: u64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub strategy: &'static str,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("invalid token type")]
    WrongTokenType,
}

/// A named way of turning request credentials into a [`Principal`].
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn authenticate(&self, parts: &Parts) -> Result<Principal, AuthError>;
}

/// Verifies HS256 access tokens from the `Authorization: Bearer` header.
pub struct JwtStrategy {
    key: DecodingKey,
    validation: Validation,
}

impl JwtStrategy {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode and check a token. Only access tokens are accepted.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.token_type != TokenType::Access {
            return Err(AuthError::WrongTokenType);
        }
        Ok(data.claims)
    }
}

impl Strategy for JwtStrategy {
    fn name(&self) -> &'static str {
        JWT_STRATEGY
    }

    fn authenticate(&self, parts: &Parts) -> Result<Principal, AuthError> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let claims = self.verify(token)?;
        Ok(Principal {
            subject: claims.sub,
            strategy: JWT_STRATEGY,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Registered strategies, shared by every request of one pipeline.
#[derive(Clone, Default)]
pub struct Authenticator {
    strategies: Arc<HashMap<&'static str, Arc<dyn Strategy>>>,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry the pipeline installs: just the `jwt` strategy.
    pub fn from_config(config: &JwtConfig) -> Self {
        Self::new().with_strategy(JwtStrategy::new(&config.secret))
    }

    /// Register `strategy` under its name, replacing any previous one.
    pub fn with_strategy(mut self, strategy: impl Strategy + 'static) -> Self {
        Arc::make_mut(&mut self.strategies).insert(strategy.name(), Arc::new(strategy));
        self
    }

    /// Registered strategy names, sorted.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run strategy `name` against the request.
    pub fn authenticate(&self, name: &str, parts: &Parts) -> Result<Principal, ApiError> {
        let strategy = self.strategies.get(name).ok_or_else(|| {
            ApiError::internal(format!("Unknown authentication strategy \"{name}\""))
        })?;

        strategy.authenticate(parts).map_err(|err| {
            tracing::debug!(strategy = name, error = %err, "Authentication failed");
            ApiError::unauthorized()
        })
    }
}

/// Extractor requiring a valid access token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = parts
            .extensions
            .get::<Authenticator>()
            .cloned()
            .ok_or_else(|| ApiError::internal("Authentication is not initialized"))?;
        authenticator
            .authenticate(JWT_STRATEGY, parts)
            .map(Authenticated)
    }
}
