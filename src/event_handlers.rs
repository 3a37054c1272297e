//! Connection lifecycle event handlers for the realtime stream.
//!
//! Provides callback-based hooks for monitoring the stream:
//!
//! - [`on_connect`](EventHandlers::on_connect): the server announced a connection id
//! - [`on_disconnect`](EventHandlers::on_disconnect): the stream closed
//! - [`on_error`](EventHandlers::on_error): connect, stream or submission errors
//! - [`on_receive`](EventHandlers::on_receive): optional debug hook for every decoded event
//!
//! # Example
//!
//! ```rust,no_run
//! use pocket_link::{EventHandlers, PocketLinkClient};
//!
//! # fn example() -> pocket_link::Result<()> {
//! let handlers = EventHandlers::new()
//!     .on_connect(|connection_id| {
//!         println!("Realtime connected as {}", connection_id);
//!     })
//!     .on_disconnect(|reason| {
//!         println!("Disconnected: {}", reason);
//!     })
//!     .on_error(|error| {
//!         eprintln!("Realtime error: {}", error);
//!     });
//!
//! let client = PocketLinkClient::builder()
//!     .base_url("http://127.0.0.1:8090")
//!     .event_handlers(handlers)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::models::RealtimeEvent;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description of why the stream closed.
    pub message: String,
    /// `true` when the client closed the stream itself.
    pub requested: bool,
}

impl DisconnectReason {
    /// The stream was lost (transport failure, server close, end of body).
    pub fn lost(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requested: false,
        }
    }

    /// The client closed the stream on purpose.
    pub fn requested(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requested: true,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requested {
            write!(f, "{} (client requested)", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether this error is recoverable (i.e. a reconnect may succeed).
    pub recoverable: bool,
}

impl ConnectionError {
    /// Create a new connection error.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback (receives the connection id).
pub type OnConnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Type alias for the on_receive callback (debug hook for all inbound events).
pub type OnReceiveCallback = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers are `Send + Sync` and run on the
/// realtime background task, so they should return quickly.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create a new empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the server announces a connection id.
    ///
    /// Fires again after every successful reconnect, with the new id.
    pub fn on_connect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the stream closes.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection error occurs.
    ///
    /// # Example
    /// ```rust
    /// use pocket_link::EventHandlers;
    ///
    /// let handlers = EventHandlers::new()
    ///     .on_error(|err| eprintln!("Error (recoverable={}): {}", err.recoverable, err));
    /// ```
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every decoded event, including the
    /// connect announcement. Debug/tracing hook, not needed for normal use.
    pub fn on_receive(mut self, f: impl Fn(&RealtimeEvent) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_receive.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self, connection_id: &str) {
        if let Some(cb) = &self.on_connect {
            log_panic("on_connect", run_isolated(|| cb(connection_id)));
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            log_panic("on_disconnect", run_isolated(|| cb(reason)));
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            log_panic("on_error", run_isolated(|| cb(error)));
        }
    }

    pub(crate) fn emit_receive(&self, event: &RealtimeEvent) {
        if let Some(cb) = &self.on_receive {
            log_panic("on_receive", run_isolated(|| cb(event)));
        }
    }
}

/// Run a user callback on a background task. A panic is returned as its
/// message instead of unwinding into the task.
pub(crate) fn run_isolated(f: impl FnOnce()) -> std::result::Result<(), String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| panic_message(panic.as_ref()))
}

fn log_panic(hook: &str, result: std::result::Result<(), String>) {
    if let Err(message) = result {
        log::error!("[REALTIME] {} handler panicked: {}", hook, message);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
