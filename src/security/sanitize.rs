//! Input sanitizers for parsed bodies and query strings.
//!
//! Two stages, both rewriting the request in place:
//! - `xss_clean` escapes `<` as `&lt;` in every key and string value
//! - `mongo_sanitize` drops object keys starting with `$` or containing `.`,
//!   the operator-injection shapes understood by document stores
//!
//! Both run after the body parsers. When something changes, the cleaned
//! input is written back into the request body and URI so extractors that
//! read raw input see the sanitized version. Urlencoded input is rewritten
//! pair by pair: untouched pairs keep their spelling and position.

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderValue, Uri};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;

use crate::http::body::{BodyKind, ParsedBody};
use crate::http::form::{encode_pairs, key_segments, parse_form, parse_pairs};

type Pairs = Vec<(String, String)>;

/// One cleaning rule, over JSON trees and over urlencoded pairs.
struct Sanitizer {
    value: fn(&mut Value) -> bool,
    pairs: fn(&mut Pairs) -> bool,
}

const XSS: Sanitizer = Sanitizer {
    value: escape_markup,
    pairs: escape_pairs,
};

const OPERATOR_KEYS: Sanitizer = Sanitizer {
    value: strip_operator_keys,
    pairs: strip_operator_pairs,
};

/// Escape markup openers in body and query input.
pub async fn xss_clean(mut request: Request, next: Next) -> Response {
    sanitize_request(&mut request, &XSS);
    next.run(request).await
}

/// Remove operator-shaped keys from body and query input.
pub async fn mongo_sanitize(mut request: Request, next: Next) -> Response {
    if sanitize_request(&mut request, &OPERATOR_KEYS) {
        tracing::warn!(path = %request.uri().path(), "Removed operator keys from request input");
    }
    next.run(request).await
}

/// Replace `<` with `&lt;` in every string and object key. Returns whether
/// anything changed.
///
/// If escaping a key makes it equal to a key that was sent already escaped,
/// the one sent escaped keeps its value.
pub fn escape_markup(value: &mut Value) -> bool {
    match value {
        Value::String(s) => escape_in_place(s),
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| escape_markup(item) | changed),
        Value::Object(map) => {
            let mut changed = false;
            let mut escaped = Vec::new();
            for (mut key, mut child) in std::mem::take(map) {
                changed |= escape_markup(&mut child);
                if escape_in_place(&mut key) {
                    changed = true;
                    escaped.push((key, child));
                } else {
                    map.insert(key, child);
                }
            }
            for (key, child) in escaped {
                map.entry(key).or_insert(child);
            }
            changed
        }
        _ => false,
    }
}

/// Drop object keys that start with `$` or contain `.`, at any depth.
/// Returns whether anything was removed.
pub fn strip_operator_keys(value: &mut Value) -> bool {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_operator_key(key));
            let mut changed = map.len() != before;
            for child in map.values_mut() {
                changed |= strip_operator_keys(child);
            }
            changed
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| strip_operator_keys(item) | changed),
        _ => false,
    }
}

/// Escape `<` in every pair's key and value.
fn escape_pairs(pairs: &mut Pairs) -> bool {
    pairs.iter_mut().fold(false, |changed, (key, value)| {
        escape_in_place(key) | escape_in_place(value) | changed
    })
}

/// Drop pairs whose key has an operator-shaped segment (`$gt`, `a[$ne]`).
fn strip_operator_pairs(pairs: &mut Pairs) -> bool {
    let before = pairs.len();
    pairs.retain(|(key, _)| !key_segments(key).into_iter().any(is_operator_key));
    pairs.len() != before
}

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

fn escape_in_place(s: &mut String) -> bool {
    if s.contains('<') {
        *s = s.replace('<', "&lt;");
        true
    } else {
        false
    }
}

fn sanitize_request(request: &mut Request, sanitizer: &Sanitizer) -> bool {
    let rewritten = request
        .extensions_mut()
        .get_mut::<ParsedBody>()
        .and_then(|parsed| sanitize_body(parsed, sanitizer).then(|| parsed.raw.clone()));

    let changed_body = rewritten.is_some();
    if let Some(bytes) = rewritten {
        request
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        *request.body_mut() = Body::from(bytes);
    }

    let changed_query = match sanitize_query(request.uri(), sanitizer) {
        Some(uri) => {
            *request.uri_mut() = uri;
            true
        }
        None => false,
    };

    changed_body || changed_query
}

/// Clean a parsed body, keeping `value` and `raw` in step. Returns whether
/// anything changed.
fn sanitize_body(parsed: &mut ParsedBody, sanitizer: &Sanitizer) -> bool {
    match parsed.kind {
        BodyKind::Json => {
            if !(sanitizer.value)(&mut parsed.value) {
                return false;
            }
            parsed.raw = Bytes::from(serde_json::to_vec(&parsed.value).unwrap_or_default());
        }
        BodyKind::Form => {
            let mut pairs = parse_pairs(&parsed.raw);
            if !(sanitizer.pairs)(&mut pairs) {
                return false;
            }
            let encoded = encode_pairs(&pairs);
            parsed.value = parse_form(encoded.as_bytes());
            parsed.raw = Bytes::from(encoded);
        }
    }
    true
}

/// The URI with a sanitized query, or `None` if nothing changed.
fn sanitize_query(uri: &Uri, sanitizer: &Sanitizer) -> Option<Uri> {
    let query = uri.query()?;
    let mut pairs = parse_pairs(query.as_bytes());
    if !(sanitizer.pairs)(&mut pairs) {
        return None;
    }

    let query = encode_pairs(&pairs);
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), query)
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escapes_keys_and_nested_values() {
        let mut value = json!({
            "name": "<script>alert(1)</script>",
            "<b>": ["ok", "<i>"],
            "n": 5,
        });
        assert!(escape_markup(&mut value));
        assert_eq!(
            value,
            json!({
                "name": "&lt;script>alert(1)&lt;/script>",
                "&lt;b>": ["ok", "&lt;i>"],
                "n": 5,
            })
        );
    }

    #[test]
    fn key_sent_escaped_wins_over_key_escaped_here() {
        let mut value = json!({"<a": "raw", "&lt;a": "pre-escaped"});
        assert!(escape_markup(&mut value));
        assert_eq!(value, json!({"&lt;a": "pre-escaped"}));

        let mut value = json!({"&lt;a": "pre-escaped", "<a": "raw"});
        escape_markup(&mut value);
        assert_eq!(value, json!({"&lt;a": "pre-escaped"}));
    }

    #[test]
    fn clean_input_reports_no_change() {
        let mut value = json!({"email": "a@example.com", "tags": ["x"]});
        assert!(!escape_markup(&mut value));
        assert!(!strip_operator_keys(&mut value));
    }

    #[test]
    fn strips_operator_keys_at_any_depth() {
        let mut value = json!({
            "email": {"$gt": ""},
            "profile.admin": true,
            "items": [{"$where": "1", "ok": 1}],
            "name": "x",
        });
        assert!(strip_operator_keys(&mut value));
        assert_eq!(value, json!({"email": {}, "items": [{"ok": 1}], "name": "x"}));
    }

    #[test]
    fn query_is_rewritten_only_when_changed() {
        let uri: Uri = "/search?q=%3Cb%3E&page=2".parse().unwrap();
        let rewritten = sanitize_query(&uri, &XSS).unwrap();
        assert_eq!(rewritten.query(), Some("q=%26lt%3Bb%3E&page=2"));
        assert_eq!(rewritten.path(), "/search");

        let clean: Uri = "/search?q=b".parse().unwrap();
        assert!(sanitize_query(&clean, &XSS).is_none());
    }

    #[test]
    fn query_rewrite_keeps_repeated_keys_and_order() {
        let uri: Uri = "/v1/raw?zeta=1&tags=a&tags=b&q=%3Cx%3E".parse().unwrap();
        let rewritten = sanitize_query(&uri, &XSS).unwrap();
        assert_eq!(rewritten.query(), Some("zeta=1&tags=a&tags=b&q=%26lt%3Bx%3E"));
    }

    #[test]
    fn operator_pairs_are_dropped_by_any_segment() {
        let uri: Uri = "/users?name=ann&user%5B%24ne%5D=1&$where=1&a.b=2&tags%5B%5D=x"
            .parse()
            .unwrap();
        let rewritten = sanitize_query(&uri, &OPERATOR_KEYS).unwrap();
        assert_eq!(rewritten.query(), Some("name=ann&tags%5B%5D=x"));
    }

    #[test]
    fn query_losing_every_pair_drops_the_question_mark() {
        let uri: Uri = "/users?$where=1".parse().unwrap();
        let rewritten = sanitize_query(&uri, &OPERATOR_KEYS).unwrap();
        assert_eq!(rewritten.to_string(), "/users");
    }

    #[test]
    fn form_body_rewrite_keeps_value_and_raw_in_step() {
        let raw = Bytes::from_static(b"tags=a&tags=b&note=%3Ci%3E&user[$ne]=1");
        let mut parsed = ParsedBody {
            kind: BodyKind::Form,
            value: parse_form(&raw),
            raw,
        };

        assert!(sanitize_body(&mut parsed, &XSS));
        assert!(sanitize_body(&mut parsed, &OPERATOR_KEYS));
        assert_eq!(&parsed.raw[..], b"tags=a&tags=b&note=%26lt%3Bi%3E");
        assert_eq!(parsed.value, json!({"tags": ["a", "b"], "note": "&lt;i>"}));
    }

    #[test]
    fn untouched_body_is_left_alone() {
        let raw = Bytes::from_static(b"{\"a\":1}");
        let mut parsed = ParsedBody {
            kind: BodyKind::Json,
            value: json!({"a": 1}),
            raw: raw.clone(),
        };
        assert!(!sanitize_body(&mut parsed, &XSS));
        assert_eq!(parsed.raw, raw);
    }
}
