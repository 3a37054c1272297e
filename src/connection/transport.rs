use crate::error::Result;
use crate::models::{RealtimeEvent, SubmitSubscriptionsRequest};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// Decoded realtime events; an `Err` item means the stream broke.
pub type EventStream = BoxStream<'static, Result<RealtimeEvent>>;

/// How the realtime layer talks to the server.
///
/// [`Gateway`](crate::Gateway) is the production implementation: both
/// operations go through it, so every stream (re)connect and every
/// submission carries the current bearer token.
#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    /// Open the long-lived event stream at `path`.
    ///
    /// Resolves once the server accepted the request; events are then
    /// read from the returned stream.
    async fn open_stream(&self, path: &str) -> Result<EventStream>;

    /// Replace the server-side subscription set of a connection.
    async fn submit(&self, path: &str, request: &SubmitSubscriptionsRequest) -> Result<()>;
}

pub type ArcRealtimeTransport = Arc<dyn RealtimeTransport>;
