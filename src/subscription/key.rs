//! Canonical subscription keys and topic matching.

use crate::models::SubscriptionOptions;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct EncodedOptions<'a> {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    query: BTreeMap<&'a str, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<&'a str, &'a str>,
}

/// Build the key the server uses to name events for `topic` with `options`.
///
/// Without options the key is the topic itself. Otherwise the options are
/// serialized as `{"query": {...}, "headers": {...}}` (empty sections left
/// out), URL-encoded and appended as the `options` query parameter. Maps are
/// ordered, so equal options always produce the same key.
///
/// ```rust
/// use pocket_link::{subscription_key, SubscriptionOptions};
///
/// assert_eq!(subscription_key("demo/*", &SubscriptionOptions::new()), "demo/*");
///
/// let key = subscription_key("demo/*", &SubscriptionOptions::new().with_filter("a=1"));
/// assert!(key.starts_with("demo/*?options="));
/// ```
pub fn subscription_key(topic: &str, options: &SubscriptionOptions) -> String {
    let mut query: BTreeMap<&str, serde_json::Value> = options
        .query
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    for (name, value) in [
        ("expand", &options.expand),
        ("filter", &options.filter),
        ("fields", &options.fields),
    ] {
        if let Some(value) = value {
            query.insert(name, serde_json::Value::String(value.clone()));
        }
    }

    if query.is_empty() && options.headers.is_empty() {
        return topic.to_string();
    }

    let encoded = EncodedOptions {
        query,
        headers: options
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect(),
    };
    // Serializing string-keyed maps and JSON values cannot fail.
    let json = serde_json::to_string(&encoded).unwrap_or_default();
    let separator = if topic.contains('?') { '&' } else { '?' };
    format!("{}{}options={}", topic, separator, urlencoding::encode(&json))
}

/// Whether `key` belongs to `topic`.
///
/// A topic without `?` matches its bare key and every optioned variant of it;
/// a topic containing `?` is compared as a raw prefix.
pub(crate) fn matches_topic(key: &str, topic: &str) -> bool {
    let delimited = format!("{}?", key);
    if topic.contains('?') {
        delimited.starts_with(topic)
    } else {
        delimited.starts_with(&format!("{}?", topic))
    }
}

/// Whether `key` starts with `prefix` (with `?` acting as end delimiter).
pub(crate) fn matches_prefix(key: &str, prefix: &str) -> bool {
    format!("{}?", key).starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_options(key: &str) -> serde_json::Value {
        let encoded = key.split_once("options=").unwrap().1;
        let raw = urlencoding::decode(encoded).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_bare_topic_without_options() {
        assert_eq!(subscription_key("demo/abc", &SubscriptionOptions::new()), "demo/abc");
    }

    #[test]
    fn test_options_layout() {
        let options = SubscriptionOptions::new()
            .with_filter("title='x'")
            .with_query("page", 2)
            .with_header("X-Custom", "1");
        let key = subscription_key("demo/*", &options);
        assert!(key.starts_with("demo/*?options="));
        assert_eq!(
            decode_options(&key),
            json!({
                "query": {"filter": "title='x'", "page": 2},
                "headers": {"X-Custom": "1"}
            })
        );
    }

    #[test]
    fn test_headers_only_and_null_query_values() {
        let key = subscription_key("demo/*", &SubscriptionOptions::new().with_header("A", "b"));
        assert_eq!(decode_options(&key), json!({"headers": {"A": "b"}}));

        let key = subscription_key("demo/*", &SubscriptionOptions::new().with_query("x", json!(null)));
        assert_eq!(decode_options(&key), json!({"query": {"x": null}}));
    }

    #[test]
    fn test_named_options_override_query_entries() {
        let options = SubscriptionOptions::new()
            .with_query("filter", "ignored")
            .with_filter("kept");
        let key = subscription_key("demo", &options);
        assert_eq!(decode_options(&key)["query"]["filter"], "kept");
    }

    #[test]
    fn test_key_is_independent_of_insertion_order() {
        let a = SubscriptionOptions::new()
            .with_query("b", 2)
            .with_query("a", 1)
            .with_header("Y", "2")
            .with_header("X", "1");
        let b = SubscriptionOptions::new()
            .with_header("X", "1")
            .with_query("a", 1)
            .with_header("Y", "2")
            .with_query("b", 2);
        assert_eq!(subscription_key("demo/*", &a), subscription_key("demo/*", &b));
    }

    #[test]
    fn test_topic_with_query_uses_ampersand() {
        let key = subscription_key("demo/*?x=1", &SubscriptionOptions::new().with_expand("author"));
        assert!(key.starts_with("demo/*?x=1&options="));
    }

    #[test]
    fn test_topic_matching() {
        let optioned = subscription_key("demo/*", &SubscriptionOptions::new().with_filter("a=1"));
        assert!(matches_topic("demo/*", "demo/*"));
        assert!(matches_topic(&optioned, "demo/*"));
        assert!(!matches_topic("demo/*x", "demo/*"));
        assert!(!matches_topic("demo/abc", "demo/*"));

        assert!(matches_topic(&optioned, &optioned));
        assert!(!matches_topic("demo/*", &optioned));
    }

    #[test]
    fn test_prefix_matching() {
        assert!(matches_prefix("demo/abc", "demo"));
        assert!(matches_prefix("demo/*", "demo/"));
        assert!(matches_prefix("demo", "demo?"));
        assert!(!matches_prefix("users/abc", "demo"));
    }
}
