use crate::subscription::multiplexer::{Command, ListenerId};
use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Removes one listener registered through `subscribe`.
///
/// Dropping the handle does **not** unsubscribe; the listener stays
/// registered until [`unsubscribe`](Self::unsubscribe) is called or the
/// topic is unsubscribed as a whole.
pub struct UnsubscribeHandle {
    key: String,
    listener_id: ListenerId,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl UnsubscribeHandle {
    pub(crate) fn new(
        key: String,
        listener_id: ListenerId,
        cmd_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            key,
            listener_id,
            cmd_tx,
        }
    }

    /// Subscription key the listener is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    /// Remove exactly this listener.
    ///
    /// When it was the last listener of its key the key is dropped from the
    /// server-side set (or the stream is closed if nothing else remains).
    /// Resolves once the change is settled.
    pub async fn unsubscribe(self) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self.cmd_tx.send(Command::RemoveListener {
            key: self.key,
            id: self.listener_id,
            done: Some(done_tx),
        });
        if sent.is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl fmt::Debug for UnsubscribeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubscribeHandle")
            .field("key", &self.key)
            .field("listener_id", &self.listener_id)
            .finish()
    }
}
