//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Access log: one span per request, one event per response
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - JSON lines in production, human-readable format otherwise
//! - Responses below 400 log at info, the rest at error with the error
//!   message rendered by the error tail

use std::time::Duration;

use axum::http::{Request, Response};
use tower_http::trace::{MakeSpan, OnResponse};
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Environment, ObservabilityConfig};
use crate::error::ErrorMessage;
use crate::http::connection::client_ip;

/// Install the global subscriber.
pub fn init_tracing(config: &ObservabilityConfig, environment: Environment) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let json = config.json || environment.is_production();

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

/// Opens the access-log span with the caller's address, method and URL.
#[derive(Debug, Clone, Copy)]
pub struct AccessSpan {
    trust_forwarded: bool,
}

impl AccessSpan {
    pub fn new(trust_forwarded: bool) -> Self {
        Self { trust_forwarded }
    }
}

impl<B> MakeSpan<B> for AccessSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let remote_addr = client_ip(request, self.trust_forwarded)
            .map_or_else(|| "-".to_string(), |ip| ip.to_string());
        tracing::info_span!(
            "http",
            remote_addr = %remote_addr,
            method = %request.method(),
            url = %request.uri(),
        )
    }
}

/// Emits the access-log line when the response head is ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLogger;

impl<B> OnResponse<B> for AccessLogger {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        let status = response.status().as_u16();
        let response_time_ms = latency.as_secs_f64() * 1000.0;

        if status >= 400 {
            let error_message = response
                .extensions()
                .get::<ErrorMessage>()
                .map_or("", |m| m.0.as_str());
            tracing::error!(status, response_time_ms, error_message, "Request failed");
        } else {
            tracing::info!(status, response_time_ms, "Request completed");
        }
    }
}
