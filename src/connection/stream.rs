//! The single physical realtime stream.
//!
//! A [`StreamConnection`] owns at most one background read task. The task
//! opens the stream through the [`RealtimeTransport`], turns the connect
//! announcement into a `Connected` notice, forwards every other event as a
//! `Message` notice and runs the reconnect loop. It never dispatches to
//! listeners itself; that happens in the owner.
//!
//! Every task carries a generation number. Starting or stopping the stream
//! bumps the generation, so notices still queued from a superseded task can
//! be recognized and dropped by the owner, and a superseded task can never
//! overwrite the shared status.

use crate::connection::{ArcRealtimeTransport, EventStream, CONNECT_EVENT, DEFAULT_EVENT_CHANNEL_CAPACITY};
use crate::error::PocketLinkError;
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{ConnectionOptions, RealtimeEvent};
use crate::timeouts::{with_timeout, PocketLinkTimeouts};
use futures_util::StreamExt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle state of the realtime stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream and no pending attempt.
    #[default]
    Disconnected,
    /// Stream requested, connection id not announced yet.
    Connecting,
    /// Connection id announced; submissions are possible.
    Connected,
    /// Stream lost, waiting before the next attempt.
    Reconnecting,
}

/// Snapshot shared between the stream task, its owner and introspection.
#[derive(Debug, Clone, Default)]
pub(crate) struct StreamStatus {
    pub state: ConnectionState,
    /// Set only while `Connected`.
    pub connection_id: Option<String>,
    pub generation: u64,
}

pub(crate) type SharedStatus = Arc<RwLock<StreamStatus>>;

/// Message from a stream task to its owner.
#[derive(Debug)]
pub(crate) struct StreamNotice {
    pub generation: u64,
    pub kind: NoticeKind,
}

#[derive(Debug)]
pub(crate) enum NoticeKind {
    /// The server announced a (new) connection id.
    Connected { connection_id: String },
    /// Any event other than the connect announcement.
    Message(RealtimeEvent),
    /// The stream was lost after having been connected.
    Disconnected(DisconnectReason),
    /// Reconnection was given up; the stream is `Disconnected`.
    Failed(PocketLinkError),
}

pub(crate) struct StreamConnection {
    transport: ArcRealtimeTransport,
    options: ConnectionOptions,
    timeouts: PocketLinkTimeouts,
    handlers: EventHandlers,
    notice_tx: mpsc::Sender<StreamNotice>,
    status: SharedStatus,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    pub(crate) fn new(
        transport: ArcRealtimeTransport,
        options: ConnectionOptions,
        timeouts: PocketLinkTimeouts,
        handlers: EventHandlers,
    ) -> (Self, mpsc::Receiver<StreamNotice>) {
        let (notice_tx, notice_rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let connection = Self {
            transport,
            options,
            timeouts,
            handlers,
            notice_tx,
            status: Arc::new(RwLock::new(StreamStatus::default())),
            generation: 0,
            task: None,
        };
        (connection, notice_rx)
    }

    /// Start a fresh stream at `path`, closing any previous one first.
    pub(crate) fn connect(&mut self, path: &str) {
        self.disconnect();
        self.generation += 1;
        self.write_status(ConnectionState::Connecting, None);

        log::info!("[REALTIME] Opening stream at {} (generation {})", path, self.generation);
        let task = StreamTask {
            transport: self.transport.clone(),
            path: path.to_string(),
            options: self.options.clone(),
            timeouts: self.timeouts.clone(),
            handlers: self.handlers.clone(),
            notice_tx: self.notice_tx.clone(),
            status: self.status.clone(),
            generation: self.generation,
        };
        self.task = Some(tokio::spawn(task.run()));
    }

    /// Close the stream. Legal in any state; a no-op when already closed.
    pub(crate) fn disconnect(&mut self) {
        let was_connected = self.state() == ConnectionState::Connected;
        let had_task = match self.task.take() {
            Some(task) => {
                task.abort();
                true
            },
            None => false,
        };
        self.generation += 1;
        self.write_status(ConnectionState::Disconnected, None);

        if had_task {
            log::info!("[REALTIME] Stream closed by client");
        }
        if was_connected {
            self.handlers
                .emit_disconnect(DisconnectReason::requested("Client disconnected"));
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.read_status().state
    }

    pub(crate) fn connection_id(&self) -> Option<String> {
        self.read_status().connection_id
    }

    /// `true` unless the stream is `Disconnected`.
    pub(crate) fn is_open(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle for lock-free-ish introspection from outside the owner.
    pub(crate) fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    fn read_status(&self) -> StreamStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn write_status(&self, state: ConnectionState, connection_id: Option<String>) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        *status = StreamStatus {
            state,
            connection_id,
            generation: self.generation,
        };
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Background read task ────────────────────────────────────────────────────

struct StreamTask {
    transport: ArcRealtimeTransport,
    path: String,
    options: ConnectionOptions,
    timeouts: PocketLinkTimeouts,
    handlers: EventHandlers,
    notice_tx: mpsc::Sender<StreamNotice>,
    status: SharedStatus,
    generation: u64,
}

impl StreamTask {
    async fn run(self) {
        let mut failed_attempts: u32 = 0;
        let mut retry_hint: Option<u64> = None;

        loop {
            let opened = with_timeout(
                self.timeouts.connection_timeout,
                "Realtime connect",
                self.transport.open_stream(&self.path),
            )
            .await;

            let error = match opened {
                Ok(events) => {
                    log::debug!("[REALTIME] Stream opened, waiting for {}", CONNECT_EVENT);
                    match self.pump(events, &mut failed_attempts, &mut retry_hint).await {
                        Some(error) => error,
                        None => return,
                    }
                },
                Err(e) => e,
            };

            let retry = self.options.allows_attempt(failed_attempts);
            let next_state = if retry {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            let Some(was_connected) = self.set_status(next_state, None) else {
                return;
            };

            if was_connected {
                let reason = DisconnectReason::lost(error.to_string());
                self.handlers.emit_disconnect(reason.clone());
                if !self.notify(NoticeKind::Disconnected(reason)).await {
                    return;
                }
            }

            log::warn!("[REALTIME] Stream failure: {} (will retry: {})", error, retry);
            self.handlers
                .emit_error(ConnectionError::new(error.to_string(), retry));

            if !retry {
                log::warn!(
                    "[REALTIME] Giving up after {} consecutive failed attempt(s)",
                    failed_attempts + 1
                );
                let _ = self.notify(NoticeKind::Failed(error)).await;
                return;
            }

            failed_attempts += 1;
            let delay = Duration::from_millis(retry_hint.unwrap_or(self.options.reconnect_delay_ms));
            log::info!(
                "[REALTIME] Reconnecting in {:?} (attempt {})",
                delay,
                failed_attempts
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Read until the stream breaks. Returns the cause, or `None` when the
    /// owner is gone and the task should stop.
    async fn pump(
        &self,
        mut events: EventStream,
        failed_attempts: &mut u32,
        retry_hint: &mut Option<u64>,
    ) -> Option<PocketLinkError> {
        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => return Some(e),
            };
            if let Some(retry) = event.retry {
                *retry_hint = Some(retry);
            }
            self.handlers.emit_receive(&event);

            if event.event != CONNECT_EVENT {
                if !self.notify(NoticeKind::Message(event)).await {
                    return None;
                }
                continue;
            }

            let Some(connection_id) = announced_connection_id(&event) else {
                log::warn!("[REALTIME] {} without a connection id, ignoring", CONNECT_EVENT);
                continue;
            };
            *failed_attempts = 0;
            self.set_status(ConnectionState::Connected, Some(connection_id.clone()))?;
            log::info!("[REALTIME] Connected with connection id {}", connection_id);
            self.handlers.emit_connect(&connection_id);
            if !self.notify(NoticeKind::Connected { connection_id }).await {
                return None;
            }
        }
        Some(PocketLinkError::StreamError(
            "Stream closed by server".to_string(),
        ))
    }

    /// Update the shared status unless this task was superseded. Returns
    /// whether the stream was `Connected` before, or `None` when superseded.
    fn set_status(&self, state: ConnectionState, connection_id: Option<String>) -> Option<bool> {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        if status.generation != self.generation {
            return None;
        }
        let was_connected = status.state == ConnectionState::Connected;
        status.state = state;
        status.connection_id = connection_id;
        Some(was_connected)
    }

    async fn notify(&self, kind: NoticeKind) -> bool {
        self.notice_tx
            .send(StreamNotice {
                generation: self.generation,
                kind,
            })
            .await
            .is_ok()
    }
}

/// Connection id from the SSE `id` field, falling back to the `clientId`
/// member of the JSON payload.
fn announced_connection_id(event: &RealtimeEvent) -> Option<String> {
    if let Some(id) = event.id.as_deref().filter(|id| !id.is_empty()) {
        return Some(id.to_string());
    }
    event
        .json::<serde_json::Value>()
        .ok()?
        .get("clientId")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
