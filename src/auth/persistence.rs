//! Pluggable persistence for the auth state.
//!
//! The client never decides where credentials live. Applications plug in an
//! [`AuthPersistence`] implementation (keychain, file, browser storage, ...)
//! and the auth state forwards every change to it, in order, from a single
//! background queue.
//!
//! ```rust,no_run
//! use pocket_link::{AuthPersistence, AuthState};
//! use std::sync::Arc;
//!
//! struct FileStore { path: std::path::PathBuf }
//!
//! #[async_trait::async_trait]
//! impl AuthPersistence for FileStore {
//!     async fn save(&self, serialized: String) -> pocket_link::Result<()> {
//!         std::fs::write(&self.path, serialized)
//!             .map_err(|e| pocket_link::PocketLinkError::InternalError(e.to_string()))
//!     }
//! }
//!
//! # async fn example() -> pocket_link::Result<()> {
//! let previous = std::fs::read_to_string("auth.json").ok();
//! let auth = AuthState::with_persistence(
//!     Arc::new(FileStore { path: "auth.json".into() }),
//!     previous.as_deref(),
//! )?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Storage hook for the serialized auth state.
#[async_trait::async_trait]
pub trait AuthPersistence: Send + Sync + 'static {
    /// Store the serialized state (a JSON document, see [`PersistedAuth`]).
    async fn save(&self, serialized: String) -> Result<()>;

    /// Remove the stored state. Defaults to saving an empty string.
    async fn clear(&self) -> Result<()> {
        self.save(String::new()).await
    }
}

/// A reference-counted [`AuthPersistence`].
pub type ArcAuthPersistence = Arc<dyn AuthPersistence>;

/// Serialized form handed to [`AuthPersistence::save`].
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedAuth {
    pub token: String,
    #[serde(default)]
    pub model: Option<serde_json::Value>,
}

impl PersistedAuth {
    /// Parse a previously persisted document.
    ///
    /// Returns `None` for empty or malformed input and for documents without a
    /// token; a missing or non-object `model` is treated as no identity.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        let mut parsed: PersistedAuth = serde_json::from_str(raw).ok()?;
        if parsed.token.is_empty() {
            return None;
        }
        if !matches!(parsed.model, Some(serde_json::Value::Object(_))) {
            parsed.model = None;
        }
        Some(parsed)
    }
}

impl fmt::Debug for PersistedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedAuth")
            .field("token", &"***")
            .field("model", &self.model)
            .finish()
    }
}

/// In-memory persistence, mostly useful for tests.
///
/// ```rust
/// use pocket_link::MemoryAuthPersistence;
///
/// let store = MemoryAuthPersistence::new();
/// assert!(store.stored().is_none());
/// ```
#[derive(Debug, Default)]
pub struct MemoryAuthPersistence {
    stored: Mutex<Option<String>>,
    writes: Mutex<usize>,
}

impl MemoryAuthPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written, `None` if nothing was written or it was cleared.
    pub fn stored(&self) -> Option<String> {
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of save/clear operations applied so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, value: Option<String>) {
        *self.stored.lock().unwrap_or_else(|e| e.into_inner()) = value;
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}

#[async_trait::async_trait]
impl AuthPersistence for MemoryAuthPersistence {
    async fn save(&self, serialized: String) -> Result<()> {
        self.record(Some(serialized));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.record(None);
        Ok(())
    }
}

// ── Ordered write queue ─────────────────────────────────────────────────────

enum PersistOp {
    Save(String),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Applies persistence operations one at a time, in submission order.
pub(crate) struct PersistenceQueue {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl PersistenceQueue {
    /// Spawn the worker on `handle`.
    pub(crate) fn spawn(hook: ArcAuthPersistence, handle: &tokio::runtime::Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();
        handle.spawn(async move {
            while let Some(op) = rx.recv().await {
                let outcome = match op {
                    PersistOp::Save(serialized) => hook.save(serialized).await,
                    PersistOp::Clear => hook.clear().await,
                    PersistOp::Flush(done) => {
                        let _ = done.send(());
                        Ok(())
                    },
                };
                if let Err(e) = outcome {
                    log::warn!("[pocket-link] Auth persistence failed: {}", e);
                }
            }
        });
        Self { tx }
    }

    pub(crate) fn save(&self, state: &PersistedAuth) {
        match serde_json::to_string(state) {
            Ok(serialized) => self.push(PersistOp::Save(serialized)),
            Err(e) => log::warn!("[pocket-link] Failed to serialize auth state: {}", e),
        }
    }

    pub(crate) fn clear(&self) {
        self.push(PersistOp::Clear);
    }

    /// Resolves once every operation queued before this call was applied.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.push(PersistOp::Flush(done_tx));
        let _ = done_rx.await;
    }

    fn push(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            log::warn!("[pocket-link] Auth persistence worker is gone; change not persisted");
        }
    }
}
