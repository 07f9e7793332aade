//! Typed application errors and the raised-error response marker.
//!
//! A stage that fails does not write the final error body itself. It returns
//! a marker response: status set, empty body, and the failure stored in the
//! response extensions as a [`Raised`]. The error tail (see
//! [`crate::http::tail`]) normalizes the marker into an [`ApiError`] and
//! renders it. Layers between the failing stage and the tail still see a
//! regular response, so their headers end up on the error response too.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// The normalized error shape: status, message and operational flag.
///
/// Operational errors are expected outcomes (a missing route, a bad token).
/// Everything else is treated as a bug: masked in production and logged at
/// error level.
#[derive(Clone)]
pub struct ApiError {
    status_code: StatusCode,
    message: String,
    is_operational: bool,
    source: Option<Arc<dyn StdError + Send + Sync>>,
    trace: Arc<Backtrace>,
}

impl ApiError {
    /// An operational error with the given status and message.
    pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            is_operational: true,
            source: None,
            trace: Arc::new(Backtrace::capture()),
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found")
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Please authenticate")
    }

    /// A non-operational 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message).non_operational()
    }

    pub fn non_operational(mut self) -> Self {
        self.is_operational = false;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn StdError + Send + Sync>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_operational(&self) -> bool {
        self.is_operational
    }

    /// Human-readable trace: the message, every cause, and the captured
    /// backtrace when `RUST_BACKTRACE` enabled capturing.
    pub fn stack(&self) -> String {
        let mut out = format!("ApiError: {}", self.message);

        let mut cause = self
            .source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static));
        while let Some(err) = cause {
            let _ = write!(out, "\n    caused by: {err}");
            cause = err.source();
        }

        if self.trace.status() == BacktraceStatus::Captured {
            let _ = write!(out, "\n{}", self.trace);
        }
        out
    }
}

impl fmt::Debug for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiError")
            .field("status_code", &self.status_code)
            .field("message", &self.message)
            .field("is_operational", &self.is_operational)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Raised::from(self).into_response()
    }
}

/// A failure travelling towards the error tail inside response extensions.
///
/// Foreign errors carry a status hint (500 unless the raising stage knows
/// better, e.g. a body parser reporting 413).
#[derive(Clone)]
pub struct Raised {
    error: Arc<dyn StdError + Send + Sync>,
    status: StatusCode,
}

impl Raised {
    /// Raise a foreign error with an unknown status.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::with_status(error, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Raise a foreign error that knows its HTTP status.
    pub fn with_status<E>(error: E, status: StatusCode) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            error: Arc::new(error),
            status,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.error
    }

    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.error.downcast_ref::<T>()
    }

    /// Normalize into an [`ApiError`].
    ///
    /// Typed errors pass through unchanged. Foreign errors become
    /// non-operational errors with their status hint and their own message,
    /// or the status reason phrase if the message is empty.
    pub fn convert(&self) -> ApiError {
        if let Some(api) = self.downcast_ref::<ApiError>() {
            return api.clone();
        }

        let mut message = self.error.to_string();
        if message.is_empty() {
            message = self
                .status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string();
        }

        ApiError::new(self.status, message)
            .non_operational()
            .with_source(self.error.clone())
    }
}

impl fmt::Debug for Raised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raised")
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}

impl From<ApiError> for Raised {
    fn from(error: ApiError) -> Self {
        let status = error.status_code();
        Self {
            error: Arc::new(error),
            status,
        }
    }
}

impl IntoResponse for Raised {
    fn into_response(self) -> Response {
        // Empty body: the compression predicate skips it, so the tail can
        // swap in the rendered body without a stale Content-Encoding.
        let mut response = self.status.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Final error message attached to rendered error responses for the access
/// log.
#[derive(Debug, Clone)]
pub struct ErrorMessage(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn typed_errors_convert_unchanged() {
        let raised = Raised::from(ApiError::not_found());
        let converted = raised.convert();
        assert_eq!(converted.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(converted.message(), "Not found");
        assert!(converted.is_operational());
    }

    #[test]
    fn foreign_errors_become_non_operational() {
        let converted = Raised::new(DiskError).convert();
        assert_eq!(converted.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(converted.message(), "disk on fire");
        assert!(!converted.is_operational());
        assert!(converted.stack().contains("caused by: disk on fire"));
    }

    #[test]
    fn status_hint_is_kept() {
        let converted = Raised::with_status(DiskError, StatusCode::PAYLOAD_TOO_LARGE).convert();
        assert_eq!(converted.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!converted.is_operational());
    }

    #[test]
    fn marker_response_carries_the_error() {
        let response = ApiError::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let raised = response.extensions().get::<Raised>().unwrap();
        assert_eq!(raised.convert().message(), "Please authenticate");
    }
}
