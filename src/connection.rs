//! Realtime stream management.
//!
//! This module contains:
//! - [`sse`]: incremental `text/event-stream` decoder and byte-stream adapter
//! - [`transport`]: the seam used to open the stream and submit subscriptions
//! - [`stream`]: the single physical stream with its reconnect loop

#[cfg(test)]
pub(crate) mod mock;
pub mod sse;
pub(crate) mod stream;
pub mod transport;

pub use sse::{decode_event_stream, SseDecoder};
pub use stream::ConnectionState;
pub(crate) use stream::{NoticeKind, StreamConnection, StreamNotice, StreamStatus};
pub use transport::{ArcRealtimeTransport, EventStream, RealtimeTransport};

/// Path of the realtime endpoint (stream and submissions).
pub const REALTIME_PATH: &str = "/api/realtime";

/// Name of the event announcing the connection id.
pub const CONNECT_EVENT: &str = "PB_CONNECT";

/// Default capacity for the stream → multiplexer notice channel.
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 8192;
