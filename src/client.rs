//! Main pocket-link client with builder pattern.
//!
//! Owns one auth state, one gateway and one subscription multiplexer. Clones
//! share all three.

use crate::{
    auth::AuthState,
    collection::Collection,
    connection::{ArcRealtimeTransport, ConnectionState},
    error::{PocketLinkError, Result},
    event_handlers::EventHandlers,
    gateway::Gateway,
    models::{ClientConfig, ConnectionOptions, RealtimeEvent, RequestOptions, SubscriptionOptions},
    subscription::{SubscriptionMultiplexer, UnsubscribeHandle},
    timeouts::PocketLinkTimeouts,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Main pocket-link client.
///
/// Use [`PocketLinkClientBuilder`] to construct instances with custom configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use pocket_link::{PocketLinkClient, RequestOptions};
///
/// # async fn example() -> pocket_link::Result<()> {
/// let client = PocketLinkClient::builder()
///     .base_url("http://127.0.0.1:8090")
///     .build()?;
///
/// let health: serde_json::Value = client.send_json("/api/health", RequestOptions::get()).await?;
/// println!("{}", health);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PocketLinkClient {
    gateway: Arc<Gateway>,
    realtime: Arc<SubscriptionMultiplexer>,
    timeouts: PocketLinkTimeouts,
}

impl PocketLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> PocketLinkClientBuilder {
        PocketLinkClientBuilder::new()
    }

    /// Shared auth state; `save`/`clear` on it affect every later request.
    pub fn auth(&self) -> &Arc<AuthState> {
        self.gateway.auth()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn config(&self) -> &ClientConfig {
        self.gateway.config()
    }

    /// Get the configured timeouts
    pub fn timeouts(&self) -> &PocketLinkTimeouts {
        &self.timeouts
    }

    /// Execute a REST request. See [`Gateway::send`].
    pub async fn send(&self, path: &str, options: RequestOptions) -> Result<reqwest::Response> {
        self.gateway.send(path, options).await
    }

    /// Execute a REST request and decode the JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> Result<T> {
        self.gateway.send_json(path, options).await
    }

    /// Absolute URL for `path` and `query`.
    pub fn build_url(&self, path: &str, query: &BTreeMap<String, serde_json::Value>) -> Result<String> {
        self.gateway.build_url(path, query)
    }

    /// Subscribe to a realtime topic. See [`SubscriptionMultiplexer::subscribe`].
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        listener: F,
        options: Option<SubscriptionOptions>,
    ) -> Result<UnsubscribeHandle>
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.realtime.subscribe(topic, listener, options).await
    }

    /// Unsubscribe a topic; blank removes everything.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.realtime.unsubscribe(topic).await
    }

    pub async fn unsubscribe_by_prefix(&self, prefix: &str) -> Result<()> {
        self.realtime.unsubscribe_by_prefix(prefix).await
    }

    /// Realtime access scoped to one collection.
    pub fn collection(&self, id_or_name: impl Into<String>) -> Collection {
        Collection::new(id_or_name, self.realtime.clone())
    }

    /// Substitute `{:name}` placeholders. See [`crate::filter`].
    pub fn filter<I, K, V>(&self, expr: &str, params: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<serde_json::Value>,
    {
        crate::filter::filter(expr, params)
    }

    /// The realtime multiplexer, for introspection.
    pub fn realtime(&self) -> &SubscriptionMultiplexer {
        &self.realtime
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    /// Drop every realtime subscription and close the stream.
    pub async fn disconnect(&self) {
        self.realtime.shutdown().await;
    }
}

impl std::fmt::Debug for PocketLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketLinkClient")
            .field("gateway", &self.gateway)
            .field("realtime", &self.realtime)
            .finish()
    }
}

/// Builder for configuring [`PocketLinkClient`] instances.
pub struct PocketLinkClientBuilder {
    base_url: Option<String>,
    config: Option<ClientConfig>,
    lang: Option<String>,
    auth: Option<Arc<AuthState>>,
    timeouts: PocketLinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    transport: Option<ArcRealtimeTransport>,
}

impl PocketLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            config: None,
            lang: None,
            auth: None,
            timeouts: PocketLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            event_handlers: EventHandlers::default(),
            transport: None,
        }
    }

    /// Set the server URL, e.g. `http://127.0.0.1:8090`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the full server configuration. Takes precedence over `base_url`.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the `Accept-Language` header value.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Share an existing auth state (for example one restored through
    /// [`AuthState::with_persistence`]).
    pub fn auth_state(mut self, auth: Arc<AuthState>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Start with `token` as the current credential.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Arc::new(AuthState::with_token(token, None)));
        self
    }

    /// Set comprehensive timeout configuration for all operations
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use pocket_link::{PocketLinkClient, PocketLinkTimeouts};
    ///
    /// # fn example() -> pocket_link::Result<()> {
    /// let client = PocketLinkClient::builder()
    ///     .base_url("http://127.0.0.1:8090")
    ///     .timeouts(PocketLinkTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: PocketLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set reconnection behavior of the realtime stream
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Set connection lifecycle handlers
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Use a custom realtime transport instead of the HTTP gateway.
    pub fn realtime_transport(mut self, transport: ArcRealtimeTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<PocketLinkClient> {
        let mut config = match (self.config, self.base_url) {
            (Some(config), _) => config,
            (None, Some(url)) => ClientConfig::from_url(&url)?,
            (None, None) => {
                return Err(PocketLinkError::ConfigurationError(
                    "base_url is required".into(),
                ))
            },
        };
        if let Some(lang) = self.lang {
            config.lang = lang;
        }

        let auth = self.auth.unwrap_or_default();
        let gateway = Arc::new(Gateway::new(config, auth, self.timeouts.clone())?);
        let transport: ArcRealtimeTransport = match self.transport {
            Some(transport) => transport,
            None => gateway.clone(),
        };

        let realtime = Arc::new(SubscriptionMultiplexer::new(
            transport,
            self.connection_options,
            self.timeouts.clone(),
            self.event_handlers,
        ));
        log::info!("[pocket-link] Client created for {}", gateway.config().origin());

        Ok(PocketLinkClient {
            gateway,
            realtime,
            timeouts: self.timeouts,
        })
    }
}
