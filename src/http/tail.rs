//! The not-found stage and the error tail.
//!
//! ```text
//! stage raises ──▶ marker response (status + Raised extension)
//!     → convert_errors: Raised → typed ApiError (panics caught at the routes)
//!     → handle_errors:  ApiError → JSON { code, message[, stack] }
//! ```
//!
//! In production, non-operational errors are masked as a bare 500 and the
//! stack is never included.

use std::any::Any;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::config::Environment;
use crate::error::{ApiError, ErrorMessage, Raised};

/// Terminal stage for anything no route matched.
pub async fn not_found() -> ApiError {
    ApiError::not_found()
}

/// A panic caught while handling a request.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PanicError(pub String);

/// Turn a caught panic into a raised error for the converter.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "request handler panicked".to_string()
    };
    tracing::error!(panic = %message, "Request handler panicked");
    Raised::new(PanicError(message)).into_response()
}

/// Converter stage: normalize whatever was raised into an [`ApiError`].
pub async fn convert_errors(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if let Some(raised) = response.extensions_mut().remove::<Raised>() {
        let error = raised.convert();
        *response.status_mut() = error.status_code();
        response.extensions_mut().insert(Raised::from(error));
    }
    response
}

/// Settings the error handler renders with.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReporting {
    environment: Environment,
}

impl ErrorReporting {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// Replace the marker body with the JSON error body. Status and
    /// message are masked for non-operational errors in production.
    /// Headers set by earlier stages are kept.
    pub fn render(&self, response: Response, error: &ApiError) -> Response {
        let production = self.environment.is_production();
        let (status, message) = if production && !error.is_operational() {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        } else {
            (error.status_code(), error.message())
        };

        let body = ErrorBody {
            code: status.as_u16(),
            message,
            stack: (!production).then(|| error.stack()),
        };
        let bytes = serde_json::to_vec(&body).unwrap_or_default();

        let (mut parts, _) = response.into_parts();
        parts.status = status;
        // The marker body is discarded, and with it any encoding of it.
        parts.headers.remove(CONTENT_ENCODING);
        parts.headers.remove(CONTENT_LENGTH);
        parts
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        parts.extensions.insert(ErrorMessage(message.to_string()));
        Response::from_parts(parts, Body::from(bytes))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u16,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

/// Error handler stage: terminal for every raised error.
pub async fn handle_errors(
    State(reporting): State<ErrorReporting>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let mut response = next.run(request).await;
    let Some(raised) = response.extensions_mut().remove::<Raised>() else {
        return response;
    };
    let error = raised.convert();

    if error.is_operational() {
        tracing::debug!(
            method = %method,
            uri = %uri,
            status = error.status_code().as_u16(),
            error = %error,
            "Request raised an error"
        );
    } else if reporting.environment.is_production() {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = error.status_code().as_u16(),
            error = %error,
            "Unexpected error while handling request"
        );
    } else {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = error.status_code().as_u16(),
            stack = %error.stack(),
            "Unexpected error while handling request"
        );
    }

    reporting.render(response, &error)
}
