//! `application/x-www-form-urlencoded` codec with bracket nesting.
//!
//! `a=1&b[c]=2&d[]=3&d[]=4` parses to
//! `{"a": "1", "b": {"c": "2"}, "d": ["3", "4"]}`. Repeated plain keys
//! collect into an array. Used for urlencoded bodies and query strings.
//!
//! Rewrites go through the pair API so repeated keys, key spelling and pair
//! order survive.

use serde_json::{Map, Value};
use url::form_urlencoded;

/// Parse urlencoded input into a JSON object.
pub fn parse_form(input: &[u8]) -> Value {
    let mut root = Map::new();
    for (key, value) in form_urlencoded::parse(input) {
        let segments = key_segments(&key);
        insert(&mut root, &segments, Value::String(value.into_owned()));
    }
    Value::Object(root)
}

/// Decoded `(key, value)` pairs in wire order.
pub fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input).into_owned().collect()
}

/// Encode pairs in the given order, keys spelled as given.
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Split `a[b][]` into `["a", "b", ""]`. Malformed keys are one segment.
pub fn key_segments(key: &str) -> Vec<&str> {
    let Some(open) = key.find('[') else {
        return vec![key];
    };
    if open == 0 || !key.ends_with(']') {
        return vec![key];
    }

    let mut segments = vec![&key[..open]];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            return vec![key];
        };
        segments.push(&stripped[..close]);
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return vec![key];
    }
    segments
}

fn insert(target: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    // Leaf, or `key[]` which always appends.
    if rest.is_empty() || rest[0].is_empty() {
        match target.get_mut(*head) {
            None if rest.is_empty() => {
                target.insert((*head).to_string(), value);
            }
            None => {
                target.insert((*head).to_string(), Value::Array(vec![value]));
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
        }
        return;
    }

    let slot = target
        .entry((*head).to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    // A scalar already sits here; the nested pair conflicts and is dropped.
    if let Value::Object(child) = slot {
        insert(child, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_brackets_and_arrays() {
        let value = parse_form(b"a=1&b[c]=2&b[d][e]=3&f[]=x&f[]=y&g=1&g=2");
        assert_eq!(
            value,
            json!({
                "a": "1",
                "b": {"c": "2", "d": {"e": "3"}},
                "f": ["x", "y"],
                "g": ["1", "2"],
            })
        );
    }

    #[test]
    fn malformed_brackets_stay_literal() {
        let value = parse_form(b"[a]=1&b[c=2&d[e]f=3");
        assert_eq!(value, json!({"[a]": "1", "b[c": "2", "d[e]f": "3"}));
    }

    #[test]
    fn decodes_percent_and_plus() {
        let value = parse_form(b"name=Jane+Doe&note=%3Cb%3E");
        assert_eq!(value, json!({"name": "Jane Doe", "note": "<b>"}));
    }

    #[test]
    fn pairs_keep_order_and_key_spelling() {
        let pairs = parse_pairs(b"zeta=1&tags=a&tags=b&d[]=x&alpha=%3C");
        assert_eq!(
            encode_pairs(&pairs),
            "zeta=1&tags=a&tags=b&d%5B%5D=x&alpha=%3C"
        );
    }

    #[test]
    fn key_segments_follow_brackets() {
        assert_eq!(key_segments("a[b][]"), vec!["a", "b", ""]);
        assert_eq!(key_segments("plain"), vec!["plain"]);
        assert_eq!(key_segments("a[b"), vec!["a[b"]);
    }
}
