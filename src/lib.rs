//! # pocket-link
//!
//! Client for PocketBase-style backends: authenticated REST requests and a
//! realtime layer that multiplexes many logical subscriptions over a single
//! server-sent-events stream.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pocket_link::{PocketLinkClient, RealtimeEvent};
//!
//! # async fn example() -> pocket_link::Result<()> {
//! let client = PocketLinkClient::builder()
//!     .base_url("http://127.0.0.1:8090")
//!     .build()?;
//!
//! let handle = client
//!     .subscribe("demo/*", |event: &RealtimeEvent| println!("{:?}", event.data), None)
//!     .await?;
//!
//! handle.unsubscribe().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`auth`]: token state, expiry checks and the persistence hook
//! - [`gateway`]: REST requests with credential injection
//! - [`connection`]: the event-stream decoder and the reconnecting stream
//! - [`subscription`]: subscription keys and the multiplexer
//! - [`collection`]: record-level subscriptions for one collection

pub mod auth;
pub mod client;
pub mod collection;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod filter;
pub mod gateway;
pub mod models;
pub mod subscription;
pub mod timeouts;

// Re-export commonly used types
pub use auth::{
    is_token_valid, token_expiry, ArcAuthPersistence, AuthChange, AuthPersistence, AuthState,
    MemoryAuthPersistence, PersistedAuth,
};
pub use client::{PocketLinkClient, PocketLinkClientBuilder};
pub use collection::Collection;
pub use connection::{
    decode_event_stream, ArcRealtimeTransport, ConnectionState, EventStream, RealtimeTransport,
    SseDecoder, CONNECT_EVENT, REALTIME_PATH,
};
pub use error::{PocketLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use filter::filter;
pub use gateway::Gateway;
pub use models::{
    ClientConfig, ConnectionOptions, FileAttachment, Protocol, RealtimeEvent, RecordAction,
    RecordSubscriptionEvent, RequestOptions, SubmitSubscriptionsRequest, SubscriptionOptions,
};
pub use subscription::{subscription_key, Listener, ListenerId, SubscriptionMultiplexer, UnsubscribeHandle};
pub use timeouts::{PocketLinkTimeouts, PocketLinkTimeoutsBuilder};
