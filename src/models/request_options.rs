use bytes::Bytes;
use reqwest::Method;
use std::collections::BTreeMap;
use std::time::Duration;

/// A file uploaded as one multipart field.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    /// Form field the file belongs to.
    pub field: String,
    pub file_name: Option<String>,
    pub data: Bytes,
}

impl FileAttachment {
    pub fn new(field: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            field: field.into(),
            file_name: None,
            data: data.into(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Everything [`Gateway::send`](crate::Gateway::send) needs besides the path.
///
/// Query values are rendered as strings (`null` values are dropped). When
/// `files` is non-empty the request is sent as `multipart/form-data` and the
/// JSON `body`, if it is an object, is flattened into text fields.
///
/// ```rust
/// use pocket_link::RequestOptions;
///
/// let options = RequestOptions::post(serde_json::json!({"title": "hello"}))
///     .with_query("expand", "author")
///     .with_header("X-Trace", "1");
/// assert_eq!(options.method, reqwest::Method::POST);
/// ```
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, serde_json::Value>,
    pub body: Option<serde_json::Value>,
    pub files: Vec<FileAttachment>,
    /// Overrides the client-wide request timeout.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            files: Vec::new(),
            timeout: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn post(body: serde_json::Value) -> Self {
        Self::new(Method::POST).with_body(body)
    }

    pub fn patch(body: serde_json::Value) -> Self {
        Self::new(Method::PATCH).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `true` if the caller already chose an `Authorization` header.
    pub(crate) fn has_authorization(&self) -> bool {
        self.headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("authorization"))
    }
}
