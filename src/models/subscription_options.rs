use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Auxiliary options attached to a realtime subscription.
///
/// The server applies `expand`/`filter`/`fields` and the extra query
/// parameters when it renders events for this subscription; `headers` are
/// evaluated as if they had been sent with a regular request (for example a
/// different `Authorization` for this subscription only).
///
/// Maps are ordered, so two option sets with the same content always encode
/// to the same subscription key.
///
/// # Example
///
/// ```rust
/// use pocket_link::SubscriptionOptions;
///
/// let options = SubscriptionOptions::new()
///     .with_filter("title = 'x'")
///     .with_expand("author")
///     .with_query("page", 1);
/// assert!(!options.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,

    /// Extra query parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, serde_json::Value>,

    /// Extra headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl SubscriptionOptions {
    /// Create empty subscription options
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expand(mut self, expand: impl Into<String>) -> Self {
        self.expand = Some(expand.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    /// Add an extra query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add an extra header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// `true` when no option is set, i.e. the key is the bare topic.
    pub fn is_empty(&self) -> bool {
        self.expand.is_none()
            && self.filter.is_none()
            && self.fields.is_none()
            && self.query.is_empty()
            && self.headers.is_empty()
    }
}
