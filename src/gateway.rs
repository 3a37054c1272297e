//! Authenticated REST gateway.
//!
//! Every request the client makes goes through [`Gateway`]: REST calls via
//! [`Gateway::send`], and the realtime stream and subscription submissions
//! via its [`RealtimeTransport`] implementation. The gateway builds the URL
//! from the configured origin, adds `Accept-Language`, and injects
//! `Authorization: Bearer <token>` when the caller did not set an
//! `Authorization` header and the current token is valid.

use crate::auth::AuthState;
use crate::connection::{decode_event_stream, EventStream, RealtimeTransport};
use crate::error::{PocketLinkError, Result};
use crate::models::{ClientConfig, FileAttachment, RequestOptions, SubmitSubscriptionsRequest};
use crate::timeouts::PocketLinkTimeouts;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// HTTP access to the backend, decorated with the client's credentials.
#[derive(Clone)]
pub struct Gateway {
    config: ClientConfig,
    http_client: reqwest::Client,
    auth: Arc<AuthState>,
    timeouts: PocketLinkTimeouts,
}

impl Gateway {
    pub fn new(
        config: ClientConfig,
        auth: Arc<AuthState>,
        timeouts: PocketLinkTimeouts,
    ) -> Result<Self> {
        // No client-wide timeout: it would also cut the long-lived event
        // stream. REST requests get a per-request timeout instead.
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));
        if !PocketLinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
            builder = builder.connect_timeout(timeouts.connection_timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| PocketLinkError::ConfigurationError(e.to_string()))?;

        log::debug!("[HTTP] Gateway ready for {}", config.origin());
        Ok(Self {
            config,
            http_client,
            auth,
            timeouts,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthState> {
        &self.auth
    }

    /// Absolute URL for `path` with `query` appended.
    ///
    /// String values are used as-is, other values in their JSON form, and
    /// `null` values are skipped.
    ///
    /// ```rust
    /// use pocket_link::{AuthState, ClientConfig, Gateway, PocketLinkTimeouts};
    /// use std::collections::BTreeMap;
    /// use std::sync::Arc;
    ///
    /// let gateway = Gateway::new(
    ///     ClientConfig::from_url("http://127.0.0.1:8090").unwrap(),
    ///     Arc::new(AuthState::new()),
    ///     PocketLinkTimeouts::default(),
    /// )
    /// .unwrap();
    ///
    /// let mut query = BTreeMap::new();
    /// query.insert("page".to_string(), serde_json::json!(2));
    /// query.insert("skip".to_string(), serde_json::Value::Null);
    /// assert_eq!(
    ///     gateway.build_url("/api/health", &query).unwrap(),
    ///     "http://127.0.0.1:8090/api/health?page=2"
    /// );
    /// ```
    pub fn build_url(&self, path: &str, query: &BTreeMap<String, serde_json::Value>) -> Result<String> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let mut url = url::Url::parse(&format!("{}{}", self.config.origin(), path))?;

        let pairs: Vec<(&str, String)> = query
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.as_str(), query_value(value)))
            .collect();
        if !pairs.is_empty() {
            let mut serializer = url.query_pairs_mut();
            for (key, value) in pairs {
                serializer.append_pair(key, &value);
            }
        }
        Ok(url.to_string())
    }

    /// Execute a REST request.
    ///
    /// Status codes >= 400 become [`PocketLinkError::ServerError`] carrying the
    /// parsed JSON error body when there is one. Requests are never retried.
    pub async fn send(&self, path: &str, options: RequestOptions) -> Result<reqwest::Response> {
        let url = self.build_url(path, &options.query)?;
        let mut request = self.decorate(
            self.http_client.request(options.method.clone(), &url),
            &options,
        );

        let timeout = options.timeout.unwrap_or(self.timeouts.request_timeout);
        if !PocketLinkTimeouts::is_no_timeout(timeout) {
            request = request.timeout(timeout);
        }

        request = if options.files.is_empty() {
            match &options.body {
                Some(body) => request.json(body),
                None => request,
            }
        } else {
            request.multipart(multipart_form(options.body.as_ref(), &options.files)?)
        };

        let start = Instant::now();
        log::debug!("[HTTP] {} {}", options.method, url);
        let response = request.send().await?;
        log::debug!(
            "[HTTP] {} {} -> {} in {:?}",
            options.method,
            url,
            response.status(),
            start.elapsed()
        );
        check_status(response).await
    }

    /// [`send`](Self::send) and decode the JSON response. An empty body
    /// decodes as `null` (so `()` and `Option<T>` work for 204 responses).
    pub async fn send_json<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        let text = self.send(path, options).await?.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }

    fn decorate(&self, mut request: reqwest::RequestBuilder, options: &RequestOptions) -> reqwest::RequestBuilder {
        request = request.header(ACCEPT_LANGUAGE, self.config.lang.as_str());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !options.has_authorization() {
            let auth = self.auth.snapshot();
            if auth.is_valid() {
                request = request.bearer_auth(&auth.token);
            }
        }
        request
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("origin", &self.config.origin())
            .field("auth", &self.auth)
            .finish()
    }
}

#[async_trait]
impl RealtimeTransport for Gateway {
    async fn open_stream(&self, path: &str) -> Result<EventStream> {
        let url = self.build_url(path, &BTreeMap::new())?;
        let request = self
            .decorate(self.http_client.get(&url), &RequestOptions::get())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store");

        log::debug!("[HTTP] GET {} (event stream)", url);
        let response = check_status(request.send().await?).await?;
        Ok(decode_event_stream(response.bytes_stream()))
    }

    async fn submit(&self, path: &str, request: &SubmitSubscriptionsRequest) -> Result<()> {
        let body = serde_json::to_value(request)?;
        self.send(path, RequestOptions::post(body)).await?;
        Ok(())
    }
}

fn query_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.as_u16() < 400 {
        return Ok(response);
    }

    let url = response.url().to_string();
    let data = response
        .text()
        .await
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .filter(|value| value.is_object());
    log::warn!("[HTTP] Request to {} failed with status {}", url, status);

    Err(PocketLinkError::ServerError {
        status_code: status.as_u16(),
        url,
        data,
    })
}

/// Multipart form: object body members become text fields (strings as-is,
/// anything else JSON-encoded), followed by one part per file.
fn multipart_form(body: Option<&serde_json::Value>, files: &[FileAttachment]) -> Result<Form> {
    let mut form = Form::new();
    match body {
        Some(serde_json::Value::Object(fields)) => {
            for (name, value) in fields {
                form = form.text(name.clone(), query_value(value));
            }
        },
        Some(serde_json::Value::Null) | None => {},
        Some(_) => {
            return Err(PocketLinkError::SerializationError(
                "Multipart requests need a JSON object body".to_string(),
            ))
        },
    }

    for file in files {
        let mut part = Part::bytes(file.data.to_vec());
        if let Some(file_name) = &file.file_name {
            part = part.file_name(file_name.clone());
        }
        form = form.part(file.field.clone(), part);
    }
    Ok(form)
}
