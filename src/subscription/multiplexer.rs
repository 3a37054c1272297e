//! Many logical subscriptions over one realtime stream.
//!
//! The public [`SubscriptionMultiplexer`] is a thin handle. All state (the
//! key → listeners registry, the waiting subscribers and the
//! [`StreamConnection`]) lives in one background task that processes
//! commands and stream notices strictly one at a time, so a registry change,
//! the decision it triggers (connect, submit or disconnect) and the
//! submission itself never interleave with another change.

use crate::connection::{
    ArcRealtimeTransport, ConnectionState, NoticeKind, StreamConnection, StreamNotice,
    StreamStatus, REALTIME_PATH,
};
use crate::error::{PocketLinkError, Result};
use crate::event_handlers::{run_isolated, ConnectionError, EventHandlers};
use crate::models::{ConnectionOptions, RealtimeEvent, SubmitSubscriptionsRequest, SubscriptionOptions};
use crate::subscription::handle::UnsubscribeHandle;
use crate::subscription::key::{matches_prefix, matches_topic, subscription_key};
use crate::timeouts::{with_timeout, PocketLinkTimeouts};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::{mpsc, oneshot};

/// Callback invoked for every event routed to its subscription key.
pub type Listener = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Identity of one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Commands ────────────────────────────────────────────────────────────────

/// Commands sent from the public API to the background task.
pub(crate) enum Command {
    Subscribe {
        key: String,
        id: ListenerId,
        listener: Listener,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: String,
        done: oneshot::Sender<()>,
    },
    UnsubscribeByPrefix {
        prefix: String,
        done: oneshot::Sender<()>,
    },
    /// `done` is `None` when a waiting subscriber gave up.
    RemoveListener {
        key: String,
        id: ListenerId,
        done: Option<oneshot::Sender<()>>,
    },
    ListSubscriptions {
        result_tx: oneshot::Sender<BTreeMap<String, usize>>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
    Terminate,
}

// ── SubscriptionMultiplexer (public handle) ─────────────────────────────────

struct ActorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status: Arc<RwLock<StreamStatus>>,
}

struct ActorConfig {
    transport: ArcRealtimeTransport,
    connection_options: ConnectionOptions,
    timeouts: PocketLinkTimeouts,
    event_handlers: EventHandlers,
}

/// Turns many logical subscriptions into one physical realtime stream.
///
/// The stream is opened by the first `subscribe` and closed as soon as no
/// listener remains. The background task is started lazily on first use, so
/// constructing a multiplexer does not require a running runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use pocket_link::PocketLinkClient;
///
/// # async fn example() -> pocket_link::Result<()> {
/// let client = PocketLinkClient::builder()
///     .base_url("http://127.0.0.1:8090")
///     .build()?;
///
/// let handle = client
///     .subscribe("demo/*", |event| println!("{}: {:?}", event.event, event.data), None)
///     .await?;
///
/// // ... later
/// handle.unsubscribe().await;
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionMultiplexer {
    config: ActorConfig,
    actor: OnceLock<ActorHandle>,
    next_listener_id: AtomicU64,
}

impl SubscriptionMultiplexer {
    pub fn new(
        transport: ArcRealtimeTransport,
        connection_options: ConnectionOptions,
        timeouts: PocketLinkTimeouts,
        event_handlers: EventHandlers,
    ) -> Self {
        Self {
            config: ActorConfig {
                transport,
                connection_options,
                timeouts,
                event_handlers,
            },
            actor: OnceLock::new(),
            next_listener_id: AtomicU64::new(0),
        }
    }

    fn actor(&self) -> &ActorHandle {
        self.actor.get_or_init(|| {
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
            let (stream, notice_rx) = StreamConnection::new(
                self.config.transport.clone(),
                self.config.connection_options.clone(),
                self.config.timeouts.clone(),
                self.config.event_handlers.clone(),
            );
            let status = stream.status();
            let task = Multiplexer {
                registry: BTreeMap::new(),
                pending: Vec::new(),
                stream,
                connection_id: None,
                transport: self.config.transport.clone(),
                timeouts: self.config.timeouts.clone(),
                handlers: self.config.event_handlers.clone(),
            };
            tokio::spawn(task.run(cmd_rx, notice_rx));
            ActorHandle { cmd_tx, status }
        })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.actor().cmd_tx.send(cmd).map_err(|_| {
            PocketLinkError::InternalError("Realtime task is not running".to_string())
        })
    }

    /// Register `listener` for `topic`.
    ///
    /// Resolves once the server knows about the subscription: immediately
    /// when the stream is connected, otherwise after the connect
    /// announcement and the submission that follows it. Waiting is bounded
    /// by the configured `subscribe_timeout`; on timeout, failure or when
    /// the returned future is dropped the listener is removed again.
    pub async fn subscribe<F>(
        &self,
        topic: &str,
        listener: F,
        options: Option<SubscriptionOptions>,
    ) -> Result<UnsubscribeHandle>
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        if topic.trim().is_empty() {
            return Err(PocketLinkError::ConfigurationError(
                "Subscription topic must not be empty".to_string(),
            ));
        }

        let key = subscription_key(topic, &options.unwrap_or_default());
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (result_tx, result_rx) = oneshot::channel();

        self.send(Command::Subscribe {
            key: key.clone(),
            id,
            listener: Arc::new(listener),
            result_tx,
        })?;

        let cmd_tx = self.actor().cmd_tx.clone();
        let mut guard = PendingListener {
            key: key.clone(),
            id,
            cmd_tx: cmd_tx.clone(),
            armed: true,
        };

        with_timeout(self.config.timeouts.subscribe_timeout, "Realtime subscribe", async {
            result_rx.await.unwrap_or(Err(PocketLinkError::Cancelled))
        })
        .await?;

        guard.armed = false;
        Ok(UnsubscribeHandle::new(key, id, cmd_tx))
    }

    /// Remove every subscription of `topic`. A blank topic removes all
    /// subscriptions and closes the stream.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if self.actor.get().is_none() {
            return Ok(());
        }
        let (done, done_rx) = oneshot::channel();
        self.send(Command::Unsubscribe {
            topic: topic.to_string(),
            done,
        })?;
        let _ = done_rx.await;
        Ok(())
    }

    /// Remove every subscription whose key starts with `prefix`.
    pub async fn unsubscribe_by_prefix(&self, prefix: &str) -> Result<()> {
        if self.actor.get().is_none() {
            return Ok(());
        }
        let (done, done_rx) = oneshot::channel();
        self.send(Command::UnsubscribeByPrefix {
            prefix: prefix.to_string(),
            done,
        })?;
        let _ = done_rx.await;
        Ok(())
    }

    /// Current subscription keys with their listener counts.
    pub async fn subscriptions(&self) -> BTreeMap<String, usize> {
        let Some(actor) = self.actor.get() else {
            return BTreeMap::new();
        };
        let (result_tx, result_rx) = oneshot::channel();
        if actor
            .cmd_tx
            .send(Command::ListSubscriptions { result_tx })
            .is_err()
        {
            return BTreeMap::new();
        }
        result_rx.await.unwrap_or_default()
    }

    pub fn state(&self) -> ConnectionState {
        self.actor
            .get()
            .map(|actor| actor.status.read().unwrap_or_else(|e| e.into_inner()).state)
            .unwrap_or_default()
    }

    /// `true` while the server-announced connection id is current.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connection id announced by the server, while connected.
    pub fn connection_id(&self) -> Option<String> {
        self.actor.get().and_then(|actor| {
            actor
                .status
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .connection_id
                .clone()
        })
    }

    /// Drop every subscription and close the stream. The multiplexer stays
    /// usable; a later `subscribe` opens a new stream.
    pub async fn shutdown(&self) {
        let Some(actor) = self.actor.get() else {
            return;
        };
        let (done, done_rx) = oneshot::channel();
        if actor.cmd_tx.send(Command::Shutdown { done }).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        if let Some(actor) = self.actor.get() {
            let _ = actor.cmd_tx.send(Command::Terminate);
        }
    }
}

impl fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("started", &self.actor.get().is_some())
            .field("state", &self.state())
            .finish()
    }
}

/// Removes the listener of a `subscribe` call that did not complete.
struct PendingListener {
    key: String,
    id: ListenerId,
    cmd_tx: mpsc::UnboundedSender<Command>,
    armed: bool,
}

impl Drop for PendingListener {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.cmd_tx.send(Command::RemoveListener {
                key: std::mem::take(&mut self.key),
                id: self.id,
                done: None,
            });
        }
    }
}

// ── Background task ─────────────────────────────────────────────────────────

struct ListenerEntry {
    id: ListenerId,
    listener: Listener,
}

/// A `subscribe` call waiting for the connect announcement.
struct Waiter {
    key: String,
    id: ListenerId,
    result_tx: oneshot::Sender<Result<()>>,
}

struct Multiplexer {
    registry: BTreeMap<String, Vec<ListenerEntry>>,
    pending: Vec<Waiter>,
    stream: StreamConnection,
    /// Connection id as last announced to this task.
    connection_id: Option<String>,
    transport: ArcRealtimeTransport,
    timeouts: PocketLinkTimeouts,
    handlers: EventHandlers,
}

impl Multiplexer {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut notice_rx: mpsc::Receiver<StreamNotice>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Terminate) | None => {
                        self.clear_all();
                        log::debug!("[REALTIME] Multiplexer task stopped");
                        return;
                    },
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(notice) = notice_rx.recv() => self.handle_notice(notice).await,
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                key,
                id,
                listener,
                result_tx,
            } => self.add_listener(key, id, listener, result_tx).await,
            Command::Unsubscribe { topic, done } => {
                self.unsubscribe(&topic).await;
                let _ = done.send(());
            },
            Command::UnsubscribeByPrefix { prefix, done } => {
                self.unsubscribe_by_prefix(&prefix).await;
                let _ = done.send(());
            },
            Command::RemoveListener { key, id, done } => {
                self.remove_listener(&key, id).await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            },
            Command::ListSubscriptions { result_tx } => {
                let snapshot = self
                    .registry
                    .iter()
                    .map(|(key, listeners)| (key.clone(), listeners.len()))
                    .collect();
                let _ = result_tx.send(snapshot);
            },
            Command::Shutdown { done } => {
                self.clear_all();
                let _ = done.send(());
            },
            Command::Terminate => {},
        }
    }

    async fn add_listener(
        &mut self,
        key: String,
        id: ListenerId,
        listener: Listener,
        result_tx: oneshot::Sender<Result<()>>,
    ) {
        let is_new_key = !self.registry.contains_key(&key);
        self.registry
            .entry(key.clone())
            .or_default()
            .push(ListenerEntry { id, listener });
        log::debug!(
            "[REALTIME] Listener {} registered for '{}' (new key: {})",
            id,
            key,
            is_new_key
        );

        if let Some(connection_id) = self.connection_id.clone() {
            if is_new_key {
                // Failures are logged inside; the next change reconciles.
                let _ = self.submit(&connection_id).await;
            }
            let _ = result_tx.send(Ok(()));
            return;
        }

        self.pending.push(Waiter { key, id, result_tx });
        if !self.stream.is_open() {
            self.stream.connect(REALTIME_PATH);
        }
    }

    async fn unsubscribe(&mut self, topic: &str) {
        if topic.trim().is_empty() {
            self.clear_all();
            return;
        }
        let before = self.registry.len();
        self.registry.retain(|key, _| !matches_topic(key, topic));
        let removed = before - self.registry.len();
        log::debug!("[REALTIME] Unsubscribed '{}' ({} key(s) removed)", topic, removed);
        self.settle(removed > 0).await;
    }

    async fn unsubscribe_by_prefix(&mut self, prefix: &str) {
        let before = self.registry.len();
        self.registry.retain(|key, _| !matches_prefix(key, prefix));
        let removed = before - self.registry.len();
        if removed == 0 {
            return;
        }
        log::debug!(
            "[REALTIME] Unsubscribed prefix '{}' ({} key(s) removed)",
            prefix,
            removed
        );
        self.settle(true).await;
    }

    /// Remove exactly one listener. Other listeners of the key are untouched
    /// and cause no server traffic.
    async fn remove_listener(&mut self, key: &str, id: ListenerId) {
        self.pending.retain(|waiter| waiter.id != id);

        let Some(listeners) = self.registry.get_mut(key) else {
            return;
        };
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        if listeners.len() == before {
            return;
        }
        log::debug!("[REALTIME] Listener {} removed from '{}'", id, key);
        if !listeners.is_empty() {
            return;
        }
        self.registry.remove(key);
        self.settle(true).await;
    }

    /// After keys were removed: close the stream when nothing is left,
    /// otherwise push the new key set when connected.
    async fn settle(&mut self, changed: bool) {
        self.cancel_orphaned_waiters();
        if self.registry.is_empty() {
            self.close_stream();
            return;
        }
        if changed {
            if let Some(connection_id) = self.connection_id.clone() {
                let _ = self.submit(&connection_id).await;
            }
        }
    }

    fn clear_all(&mut self) {
        self.registry.clear();
        self.close_stream();
    }

    fn close_stream(&mut self) {
        for waiter in self.pending.drain(..) {
            let _ = waiter.result_tx.send(Err(PocketLinkError::Cancelled));
        }
        self.connection_id = None;
        self.stream.disconnect();
    }

    /// Waiters whose listener was removed by a topic-wide unsubscribe.
    fn cancel_orphaned_waiters(&mut self) {
        let registry = &self.registry;
        let (kept, orphaned): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|waiter| {
            registry
                .get(&waiter.key)
                .is_some_and(|listeners| listeners.iter().any(|entry| entry.id == waiter.id))
        });
        self.pending = kept;
        for waiter in orphaned {
            let _ = waiter.result_tx.send(Err(PocketLinkError::Cancelled));
        }
    }

    async fn handle_notice(&mut self, notice: StreamNotice) {
        if notice.generation != self.stream.generation() {
            log::debug!(
                "[REALTIME] Ignoring notice from superseded stream (generation {})",
                notice.generation
            );
            return;
        }

        match notice.kind {
            NoticeKind::Connected { connection_id } => self.on_connected(connection_id).await,
            NoticeKind::Message(event) => self.dispatch(&event),
            NoticeKind::Disconnected(reason) => {
                log::info!("[REALTIME] Stream lost: {}", reason);
                self.connection_id = None;
            },
            NoticeKind::Failed(error) => {
                log::warn!("[REALTIME] Realtime stream failed permanently: {}", error);
                self.connection_id = None;
                self.fail_waiters(&error);
                self.stream.disconnect();
            },
        }
    }

    /// New connect announcement: submit the full key set (initial handshake
    /// or replay after reconnect) and release waiting subscribers.
    async fn on_connected(&mut self, connection_id: String) {
        self.connection_id = Some(connection_id.clone());

        if self.registry.is_empty() {
            self.close_stream();
            return;
        }

        let waiters = std::mem::take(&mut self.pending);
        log::info!(
            "[REALTIME] Submitting {} subscription key(s) for connection {} ({} waiting)",
            self.registry.len(),
            connection_id,
            waiters.len()
        );

        match self.submit(&connection_id).await {
            Ok(()) => {
                for waiter in waiters {
                    if waiter.result_tx.send(Ok(())).is_err() {
                        self.remove_listener(&waiter.key, waiter.id).await;
                    }
                }
            },
            Err(error) if !waiters.is_empty() => {
                self.pending = waiters;
                self.fail_waiters(&error);
                if self.registry.is_empty() {
                    self.close_stream();
                }
            },
            Err(_) => {},
        }
    }

    /// Fail every waiting subscriber and remove the listeners they never
    /// received handles for.
    fn fail_waiters(&mut self, error: &PocketLinkError) {
        for waiter in std::mem::take(&mut self.pending) {
            if let Some(listeners) = self.registry.get_mut(&waiter.key) {
                listeners.retain(|entry| entry.id != waiter.id);
                if listeners.is_empty() {
                    self.registry.remove(&waiter.key);
                }
            }
            let _ = waiter.result_tx.send(Err(error.clone()));
        }
    }

    fn dispatch(&self, event: &RealtimeEvent) {
        let Some(listeners) = self.registry.get(&event.event) else {
            log::debug!("[REALTIME] No listener for event '{}'", event.event);
            return;
        };
        for entry in listeners {
            let listener = &entry.listener;
            if let Err(message) = run_isolated(|| listener(event)) {
                log::error!(
                    "[REALTIME] Listener {} for '{}' panicked: {}",
                    entry.id,
                    event.event,
                    message
                );
            }
        }
    }

    /// Replace the server-side subscription set with the registry keys.
    async fn submit(&self, connection_id: &str) -> Result<()> {
        let request = SubmitSubscriptionsRequest {
            connection_id: connection_id.to_string(),
            subscriptions: self.registry.keys().cloned().collect(),
        };
        log::debug!(
            "[REALTIME] Submitting {:?} for connection {}",
            request.subscriptions,
            connection_id
        );

        let result = with_timeout(
            self.timeouts.submit_timeout,
            "Subscription submission",
            self.transport.submit(REALTIME_PATH, &request),
        )
        .await;

        if let Err(e) = &result {
            log::warn!("[REALTIME] Subscription submission failed: {}", e);
            self.handlers.emit_error(ConnectionError::new(
                format!("Subscription submission failed: {}", e),
                true,
            ));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockTransport;
    use crate::connection::CONNECT_EVENT;
    use std::sync::Mutex;
    use std::time::Duration;

    fn new_multiplexer(transport: Arc<MockTransport>) -> SubscriptionMultiplexer {
        new_multiplexer_with(transport, PocketLinkTimeouts::fast(), ConnectionOptions::new())
    }

    fn new_multiplexer_with(
        transport: Arc<MockTransport>,
        timeouts: PocketLinkTimeouts,
        options: ConnectionOptions,
    ) -> SubscriptionMultiplexer {
        SubscriptionMultiplexer::new(transport, options, timeouts, EventHandlers::new())
    }

    fn announce(transport: &MockTransport, id: &str) {
        transport.emit(RealtimeEvent::new(CONNECT_EVENT).with_id(id).with_data("{}"));
    }

    async fn wait_for_keys(mux: &SubscriptionMultiplexer, count: usize) {
        for _ in 0..400 {
            if mux.subscriptions().await.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} subscription key(s)", count);
    }

    /// Subscribe while disconnected and complete the handshake.
    async fn subscribe_connected(
        mux: &SubscriptionMultiplexer,
        transport: &MockTransport,
        topic: &str,
        options: Option<SubscriptionOptions>,
        connection_id: &str,
    ) -> UnsubscribeHandle {
        let opens = transport.opened_paths().len();
        let (handle, _) = tokio::join!(mux.subscribe(topic, |_| {}, options), async {
            transport.wait_for_opens(opens + 1).await;
            announce(transport, connection_id);
        });
        handle.unwrap()
    }

    fn last_submitted(transport: &MockTransport) -> Vec<String> {
        transport
            .submissions()
            .last()
            .map(|s| s.subscriptions.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_pending_subscribers_share_one_submission() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());

        let (a, b, _) = tokio::join!(
            mux.subscribe("demo/a", |_| {}, None),
            mux.subscribe("demo/b", |_| {}, None),
            async {
                transport.wait_for_opens(1).await;
                wait_for_keys(&mux, 2).await;
                announce(&transport, "conn-1");
            }
        );
        a.unwrap();
        b.unwrap();

        let submissions = transport.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].connection_id, "conn-1");
        assert_eq!(submissions[0].subscriptions, vec!["demo/a", "demo/b"]);
        assert_eq!(transport.open_attempts(), 1, "one physical stream");
        assert!(mux.is_connected());
        assert_eq!(mux.connection_id().as_deref(), Some("conn-1"));
    }

    #[tokio::test]
    async fn test_same_options_share_one_key() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());
        let first_options = SubscriptionOptions::new()
            .with_filter("title='x'")
            .with_query("a", 1)
            .with_query("b", 2);
        let second_options = SubscriptionOptions::new()
            .with_query("b", 2)
            .with_query("a", 1)
            .with_filter("title='x'");

        let first =
            subscribe_connected(&mux, &transport, "demo/*", Some(first_options), "conn-1").await;
        let second = mux
            .subscribe("demo/*", |_| {}, Some(second_options))
            .await
            .unwrap();

        assert_eq!(first.key(), second.key());
        let subs = mux.subscriptions().await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[first.key()], 2);
        assert_eq!(transport.submission_count(), 1);

        // Non-last listener: no server traffic.
        first.unsubscribe().await;
        assert_eq!(transport.submission_count(), 1);
        assert_eq!(mux.subscriptions().await.values().sum::<usize>(), 1);
        assert!(mux.is_connected());

        // Last listener of the last key: disconnect instead of submitting.
        second.unsubscribe().await;
        assert_eq!(transport.submission_count(), 1);
        assert!(mux.subscriptions().await.is_empty());
        assert_eq!(mux.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_removing_last_listener_of_a_key_resubmits_once() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());

        let _a = subscribe_connected(&mux, &transport, "demo/a", None, "conn-1").await;
        let b = mux.subscribe("demo/b", |_| {}, None).await.unwrap();
        assert_eq!(transport.submission_count(), 2);
        assert_eq!(last_submitted(&transport), vec!["demo/a", "demo/b"]);

        b.unsubscribe().await;
        assert_eq!(transport.submission_count(), 3);
        assert_eq!(last_submitted(&transport), vec!["demo/a"]);
        let keys: Vec<String> = mux.subscriptions().await.into_keys().collect();
        assert_eq!(keys, last_submitted(&transport));
    }

    #[tokio::test]
    async fn test_routing_order_and_panic_isolation() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _first = subscribe_connected(&mux, &transport, "demo/a", None, "conn-1").await;
        let s = seen.clone();
        mux.subscribe(
            "demo/a",
            move |e: &RealtimeEvent| {
                s.lock().unwrap().push(format!("panicky:{}", e.event));
                panic!("listener bug");
            },
            None,
        )
        .await
        .unwrap();
        let s = seen.clone();
        mux.subscribe("demo/a", move |e: &RealtimeEvent| s.lock().unwrap().push(format!("ok:{}", e.event)), None)
            .await
            .unwrap();
        let s = seen.clone();
        mux.subscribe("demo/b", move |e: &RealtimeEvent| s.lock().unwrap().push(format!("b:{}", e.event)), None)
            .await
            .unwrap();

        transport.emit(RealtimeEvent::new("demo/a").with_data("{}"));
        transport.emit(RealtimeEvent::new("unknown").with_data("{}"));
        transport.emit(RealtimeEvent::new("demo/b").with_data("{}"));
        crate::connection::mock::eventually(|| seen.lock().unwrap().len() == 3).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["panicky:demo/a", "ok:demo/a", "b:demo/b"]
        );
    }

    #[tokio::test]
    async fn test_blank_unsubscribe_clears_and_disconnects() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());

        let _a = subscribe_connected(&mux, &transport, "demo/a", None, "conn-1").await;
        mux.subscribe("demo/b", |_| {}, None).await.unwrap();
        let submissions = transport.submission_count();

        mux.unsubscribe("  ").await.unwrap();
        assert!(mux.subscriptions().await.is_empty());
        assert_eq!(mux.state(), ConnectionState::Disconnected);
        assert!(mux.connection_id().is_none());
        assert_eq!(transport.submission_count(), submissions);
    }

    #[tokio::test]
    async fn test_unsubscribe_topic_removes_all_variants() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());

        let _a = subscribe_connected(&mux, &transport, "demo/*", None, "conn-1").await;
        mux.subscribe("demo/*", |_| {}, Some(SubscriptionOptions::new().with_filter("a=1")))
            .await
            .unwrap();
        mux.subscribe("demo/abc", |_| {}, None).await.unwrap();
        let submissions = transport.submission_count();

        mux.unsubscribe("demo/*").await.unwrap();
        assert_eq!(transport.submission_count(), submissions + 1);
        assert_eq!(last_submitted(&transport), vec!["demo/abc"]);

        // Unknown topic: nothing removed, nothing submitted.
        mux.unsubscribe("other").await.unwrap();
        assert_eq!(transport.submission_count(), submissions + 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_by_prefix() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());

        let _a = subscribe_connected(&mux, &transport, "demo/a", None, "conn-1").await;
        mux.subscribe("demo/b", |_| {}, None).await.unwrap();
        mux.subscribe("users/x", |_| {}, None).await.unwrap();
        let submissions = transport.submission_count();

        mux.unsubscribe_by_prefix("posts").await.unwrap();
        assert_eq!(transport.submission_count(), submissions);

        mux.unsubscribe_by_prefix("demo").await.unwrap();
        assert_eq!(transport.submission_count(), submissions + 1);
        assert_eq!(last_submitted(&transport), vec!["users/x"]);

        mux.unsubscribe_by_prefix("users").await.unwrap();
        assert_eq!(transport.submission_count(), submissions + 1);
        assert_eq!(mux.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_replays_full_key_set() {
        let transport = Arc::new(MockTransport::new());
        let options = ConnectionOptions::new().with_reconnect_delay_ms(10);
        let mux = new_multiplexer_with(transport.clone(), PocketLinkTimeouts::fast(), options);

        let _a = subscribe_connected(&mux, &transport, "demo/a", None, "conn-1").await;
        mux.subscribe("demo/a", |_| {}, None).await.unwrap();
        mux.subscribe("demo/b", |_| {}, None).await.unwrap();
        let before = mux.subscriptions().await;
        let submissions = transport.submission_count();

        transport.close_stream();
        transport.wait_for_opens(2).await;
        announce(&transport, "conn-2");
        transport.wait_for_submissions(submissions + 1).await;

        let replay = transport.submissions().pop().unwrap();
        assert_eq!(replay.connection_id, "conn-2");
        assert_eq!(replay.subscriptions, vec!["demo/a", "demo/b"]);
        assert_eq!(mux.subscriptions().await, before, "listeners are not duplicated");
    }

    #[tokio::test]
    async fn test_initial_submission_failure_fails_waiters() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_submits(1);
        let mux = new_multiplexer(transport.clone());

        let (result, _) = tokio::join!(mux.subscribe("demo/a", |_| {}, None), async {
            transport.wait_for_opens(1).await;
            announce(&transport, "conn-1");
        });

        assert!(matches!(result, Err(PocketLinkError::ServerError { status_code: 400, .. })));
        assert!(mux.subscriptions().await.is_empty());
        assert_eq!(mux.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_permanent_stream_failure_fails_waiters() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_opens(1);
        let options = ConnectionOptions::new().with_auto_reconnect(false);
        let mux = new_multiplexer_with(transport.clone(), PocketLinkTimeouts::fast(), options);

        let result = mux.subscribe("demo/a", |_| {}, None).await;
        assert!(matches!(result, Err(PocketLinkError::NetworkError(_))));
        assert!(mux.subscriptions().await.is_empty());

        // The multiplexer recovers on the next subscribe.
        subscribe_connected(&mux, &transport, "demo/b", None, "conn-2").await;
        assert_eq!(last_submitted(&transport), vec!["demo/b"]);
    }

    #[tokio::test]
    async fn test_subscribe_timeout_removes_listener_and_closes_stream() {
        let transport = Arc::new(MockTransport::new());
        let timeouts = PocketLinkTimeouts::builder()
            .subscribe_timeout(Duration::from_millis(50))
            .build();
        let mux = new_multiplexer_with(transport.clone(), timeouts, ConnectionOptions::new());

        let result = mux.subscribe("demo/a", |_| {}, None).await;
        assert!(matches!(result, Err(PocketLinkError::TimeoutError(_))));
        wait_for_keys(&mux, 0).await;
        assert_eq!(mux.state(), ConnectionState::Disconnected);
        assert_eq!(transport.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_removed() {
        let transport = Arc::new(MockTransport::new());
        let mux = Arc::new(new_multiplexer(transport.clone()));

        let abandoned = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.subscribe("demo/gone", |_| {}, None).await })
        };
        transport.wait_for_opens(1).await;
        wait_for_keys(&mux, 1).await;
        abandoned.abort();

        wait_for_keys(&mux, 0).await;
        assert_eq!(mux.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waiters_and_stays_usable() {
        let transport = Arc::new(MockTransport::new());
        let mux = new_multiplexer(transport.clone());

        let (result, _) = tokio::join!(mux.subscribe("demo/a", |_| {}, None), async {
            transport.wait_for_opens(1).await;
            wait_for_keys(&mux, 1).await;
            mux.shutdown().await;
        });
        assert!(matches!(result, Err(PocketLinkError::Cancelled)));
        assert_eq!(mux.state(), ConnectionState::Disconnected);

        subscribe_connected(&mux, &transport, "demo/b", None, "conn-2").await;
        assert!(mux.is_connected());
    }

    #[tokio::test]
    async fn test_panicking_receive_hook_keeps_stream_alive() {
        let transport = Arc::new(MockTransport::new());
        let handlers = EventHandlers::new().on_receive(|e| {
            if e.event == "demo/a" {
                panic!("receive hook bug");
            }
        });
        let options = ConnectionOptions::new().with_reconnect_delay_ms(10);
        let mux = SubscriptionMultiplexer::new(
            transport.clone(),
            options,
            PocketLinkTimeouts::fast(),
            handlers,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();

        let (handle, _) = tokio::join!(
            mux.subscribe("demo/a", move |e: &RealtimeEvent| s.lock().unwrap().push(e.event.clone()), None),
            async {
                transport.wait_for_opens(1).await;
                announce(&transport, "conn-1");
            }
        );
        handle.unwrap();

        transport.emit(RealtimeEvent::new("demo/a").with_data("{}"));
        transport.emit(RealtimeEvent::new("demo/a").with_data("{}"));
        crate::connection::mock::eventually(|| seen.lock().unwrap().len() == 2).await;

        // The read task survived: a server close is noticed and recovered.
        transport.close_stream();
        transport.wait_for_opens(2).await;
        announce(&transport, "conn-2");
        crate::connection::mock::eventually(|| mux.connection_id().as_deref() == Some("conn-2")).await;
        transport.wait_for_submissions(2).await;
        assert_eq!(transport.submissions()[1].connection_id, "conn-2");
    }

    #[tokio::test]
    async fn test_panicking_error_hook_keeps_multiplexer_alive() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_next_submits(1);
        let handlers = EventHandlers::new()
            .on_error(|_| panic!("error hook bug"))
            .on_disconnect(|_| panic!("disconnect hook bug"));
        let mux = SubscriptionMultiplexer::new(
            transport.clone(),
            ConnectionOptions::new(),
            PocketLinkTimeouts::fast(),
            handlers,
        );

        let (result, _) = tokio::join!(mux.subscribe("demo/a", |_| {}, None), async {
            transport.wait_for_opens(1).await;
            announce(&transport, "conn-1");
        });
        assert!(matches!(result, Err(PocketLinkError::ServerError { status_code: 400, .. })));

        subscribe_connected(&mux, &transport, "demo/b", None, "conn-2").await;
        let keys: Vec<String> = mux.subscriptions().await.into_keys().collect();
        assert_eq!(keys, vec!["demo/b"]);
        assert_eq!(last_submitted(&transport), vec!["demo/b"]);

        // Requested disconnect fires the panicking on_disconnect hook.
        mux.unsubscribe("").await.unwrap();
        assert_eq!(mux.state(), ConnectionState::Disconnected);
        subscribe_connected(&mux, &transport, "demo/c", None, "conn-3").await;
        assert!(mux.is_connected());
    }

    mod sequences {
        use super::*;
        use crate::subscription::key::{matches_prefix, matches_topic};
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        const TOPICS: [&str; 5] = ["demo/a", "demo/b", "demo/*", "users/x", "users/*"];
        const PREFIXES: [&str; 3] = ["demo", "users", "posts"];

        #[derive(Debug, Clone)]
        enum Op {
            Subscribe { topic: usize, filtered: bool },
            UnsubscribeHandle(usize),
            UnsubscribeTopic(usize),
            UnsubscribePrefix(usize),
            UnsubscribeAll,
        }

        fn arb_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                4 => (0..TOPICS.len(), any::<bool>())
                    .prop_map(|(topic, filtered)| Op::Subscribe { topic, filtered }),
                3 => any::<usize>().prop_map(Op::UnsubscribeHandle),
                1 => (0..TOPICS.len()).prop_map(Op::UnsubscribeTopic),
                1 => (0..PREFIXES.len()).prop_map(Op::UnsubscribePrefix),
                1 => Just(Op::UnsubscribeAll),
            ]
        }

        async fn run_sequence(ops: Vec<Op>) {
            let transport = Arc::new(MockTransport::new());
            let mux = new_multiplexer(transport.clone());
            let mut handles: Vec<UnsubscribeHandle> = Vec::new();
            let mut expected: BTreeMap<String, BTreeSet<ListenerId>> = BTreeMap::new();
            let mut connects = 0;

            for op in ops {
                match op {
                    Op::Subscribe { topic, filtered } => {
                        let options = filtered.then(|| SubscriptionOptions::new().with_filter("n > 1"));
                        let handle = if mux.is_connected() {
                            mux.subscribe(TOPICS[topic], |_| {}, options).await.unwrap()
                        } else {
                            connects += 1;
                            let id = format!("conn-{}", connects);
                            subscribe_connected(&mux, &transport, TOPICS[topic], options, &id).await
                        };
                        expected
                            .entry(handle.key().to_string())
                            .or_default()
                            .insert(handle.listener_id());
                        handles.push(handle);
                    },
                    Op::UnsubscribeHandle(index) => {
                        if handles.is_empty() {
                            continue;
                        }
                        let handle = handles.remove(index % handles.len());
                        if let Some(ids) = expected.get_mut(handle.key()) {
                            ids.remove(&handle.listener_id());
                            if ids.is_empty() {
                                expected.remove(handle.key());
                            }
                        }
                        handle.unsubscribe().await;
                    },
                    Op::UnsubscribeTopic(topic) => {
                        expected.retain(|key, _| !matches_topic(key, TOPICS[topic]));
                        mux.unsubscribe(TOPICS[topic]).await.unwrap();
                    },
                    Op::UnsubscribePrefix(prefix) => {
                        expected.retain(|key, _| !matches_prefix(key, PREFIXES[prefix]));
                        mux.unsubscribe_by_prefix(PREFIXES[prefix]).await.unwrap();
                    },
                    Op::UnsubscribeAll => {
                        expected.clear();
                        mux.unsubscribe("").await.unwrap();
                    },
                }

                let registry = mux.subscriptions().await;
                let counts: BTreeMap<String, usize> = expected
                    .iter()
                    .map(|(key, ids)| (key.clone(), ids.len()))
                    .collect();
                assert_eq!(registry, counts);

                let keys: Vec<String> = registry.into_keys().collect();
                if keys.is_empty() {
                    assert_eq!(mux.state(), ConnectionState::Disconnected);
                } else {
                    assert!(mux.is_connected());
                    assert_eq!(last_submitted(&transport), keys);
                }
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn submitted_keys_track_registry(ops in prop::collection::vec(arb_op(), 1..24)) {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap()
                    .block_on(run_sequence(ops));
            }
        }
    }

    #[tokio::test]
    async fn test_empty_topic_is_rejected() {
        let mux = new_multiplexer(Arc::new(MockTransport::new()));
        let result = mux.subscribe("", |_| {}, None).await;
        assert!(matches!(result, Err(PocketLinkError::ConfigurationError(_))));
        assert_eq!(mux.state(), ConnectionState::Disconnected);
    }
}
