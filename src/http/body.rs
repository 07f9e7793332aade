//! Request body parsers.
//!
//! # Responsibilities
//! - Buffer `application/json` and `application/x-www-form-urlencoded`
//!   bodies up to the configured limit
//! - Store the structured form as [`ParsedBody`] in request extensions
//! - Hand the raw bytes on unchanged so downstream extractors still work
//!
//! Other content types pass through untouched. Failures are raised, not
//! rendered: the error tail turns them into JSON responses.

use std::error::Error as StdError;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::Raised;
use crate::http::form::parse_form;

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// Maximum body size accepted by the parsers, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
}

/// Structured request body produced by the parsers.
///
/// `raw` is the body as forwarded downstream. Stages that rewrite the body
/// keep `value` and `raw` in step.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody {
    pub kind: BodyKind,
    pub value: Value,
    pub raw: Bytes,
}

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("request entity too large")]
    TooLarge { limit: usize },

    #[error("request aborted")]
    Aborted,

    #[error("{0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("JSON body must be an object or an array")]
    NotStrict,
}

impl BodyError {
    pub fn status(&self) -> StatusCode {
        match self {
            BodyError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::Aborted | BodyError::MalformedJson(_) | BodyError::NotStrict => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for BodyError {
    fn into_response(self) -> Response {
        let status = self.status();
        Raised::with_status(self, status).into_response()
    }
}

/// Parse JSON bodies. Only objects and arrays are accepted; an empty body
/// parses as `{}`.
pub async fn parse_json(State(limit): State<BodyLimit>, request: Request, next: Next) -> Response {
    if !should_parse(&request, JSON) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let bytes = match read_body(body, limit.0, &parts.headers).await {
        Ok(bytes) => bytes,
        Err(e) => return e.into_response(),
    };

    let value = if bytes.is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
            Ok(_) => return BodyError::NotStrict.into_response(),
            Err(e) => return BodyError::MalformedJson(e).into_response(),
        }
    };

    tracing::trace!(bytes = bytes.len(), "Parsed JSON body");
    parts.extensions.insert(ParsedBody {
        kind: BodyKind::Json,
        value,
        raw: bytes.clone(),
    });
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Parse urlencoded bodies with bracket nesting.
pub async fn parse_urlencoded(
    State(limit): State<BodyLimit>,
    request: Request,
    next: Next,
) -> Response {
    if !should_parse(&request, FORM) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let bytes = match read_body(body, limit.0, &parts.headers).await {
        Ok(bytes) => bytes,
        Err(e) => return e.into_response(),
    };

    tracing::trace!(bytes = bytes.len(), "Parsed urlencoded body");
    parts.extensions.insert(ParsedBody {
        kind: BodyKind::Form,
        value: parse_form(&bytes),
        raw: bytes.clone(),
    });
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn should_parse(request: &Request, content_type: &str) -> bool {
    request.extensions().get::<ParsedBody>().is_none()
        && has_content_type(request.headers(), content_type)
}

fn has_content_type(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(expected))
}

async fn read_body(body: Body, limit: usize, headers: &HeaderMap) -> Result<Bytes, BodyError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(BodyError::TooLarge { limit });
    }

    axum::body::to_bytes(body, limit).await.map_err(|err| {
        if exceeded_limit(&err) {
            BodyError::TooLarge { limit }
        } else {
            BodyError::Aborted
        }
    })
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut cause: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cause {
        if e.is::<LengthLimitError>() {
            return true;
        }
        cause = e.source();
    }
    false
}
