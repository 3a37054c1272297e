//! Authentication state for the pocket-link client.
//!
//! [`AuthState`] holds the current bearer token together with an opaque
//! identity payload (usually the authenticated user or superuser record).
//! Validity is derived lazily from the `exp` claim embedded in the token, so
//! saving a malformed token is allowed and simply yields an unauthenticated
//! client.
//!
//! Every mutation is published on a most-recent-wins channel: a consumer that
//! falls behind only ever sees the latest `(token, identity)` pair and never
//! slows down the writer.
//!
//! ```rust
//! use pocket_link::AuthState;
//!
//! let auth = AuthState::new();
//! let mut changes = auth.on_change();
//!
//! auth.save("header.payload.signature", Some(serde_json::json!({"id": "u1"})));
//! assert!(changes.has_changed().unwrap());
//! assert!(!auth.is_valid()); // payload is not a decodable claim set
//!
//! auth.clear();
//! assert_eq!(auth.token(), "");
//! ```

mod persistence;
mod token;

pub use persistence::{ArcAuthPersistence, AuthPersistence, MemoryAuthPersistence, PersistedAuth};
pub use token::{is_token_valid, token_expiry};

#[cfg(test)]
pub(crate) use token::{now_secs, tests::make_token};

use crate::error::{PocketLinkError, Result};
use persistence::PersistenceQueue;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// A `(token, identity)` pair, as stored and as published on change.
#[derive(Clone, Default, PartialEq)]
pub struct AuthChange {
    /// Bearer token; empty when unauthenticated.
    pub token: String,
    /// Opaque identity payload.
    pub identity: Option<serde_json::Value>,
}

impl AuthChange {
    /// `true` when the token is non-empty and not expired.
    pub fn is_valid(&self) -> bool {
        token::is_token_valid(&self.token)
    }
}

impl fmt::Debug for AuthChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_empty() { "" } else { "***" };
        write!(f, "AuthChange(token={}, identity={:?})", token, self.identity)
    }
}

/// Shared, read-mostly authentication state.
///
/// Cheap to read concurrently; writes replace the whole snapshot so readers
/// never observe a token paired with the wrong identity.
pub struct AuthState {
    current: RwLock<Arc<AuthChange>>,
    change_tx: watch::Sender<AuthChange>,
    persistence: Option<PersistenceQueue>,
}

impl AuthState {
    /// Create an empty, memory-only auth state.
    pub fn new() -> Self {
        Self::from_parts(AuthChange::default(), None)
    }

    /// Create a memory-only auth state that starts out with `token`.
    pub fn with_token(token: impl Into<String>, identity: Option<serde_json::Value>) -> Self {
        Self::from_parts(
            AuthChange {
                token: token.into(),
                identity,
            },
            None,
        )
    }

    /// Create an auth state backed by a persistence hook.
    ///
    /// `initial` is the value previously handed to [`AuthPersistence::save`];
    /// empty or malformed input is ignored. Must be called from within a
    /// Tokio runtime (the write queue runs as a background task).
    pub fn with_persistence(hook: ArcAuthPersistence, initial: Option<&str>) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            PocketLinkError::ConfigurationError(
                "AuthState::with_persistence requires a Tokio runtime".to_string(),
            )
        })?;

        let restored = initial
            .and_then(PersistedAuth::parse)
            .map(|p| AuthChange {
                token: p.token,
                identity: p.model,
            })
            .unwrap_or_default();

        if !restored.token.is_empty() {
            log::debug!("[pocket-link] Restored persisted auth state (valid={})", restored.is_valid());
        }

        Ok(Self::from_parts(
            restored,
            Some(PersistenceQueue::spawn(hook, &handle)),
        ))
    }

    fn from_parts(initial: AuthChange, persistence: Option<PersistenceQueue>) -> Self {
        let (change_tx, _) = watch::channel(initial.clone());
        Self {
            current: RwLock::new(Arc::new(initial)),
            change_tx,
            persistence,
        }
    }

    /// Replace token and identity, then notify listeners.
    ///
    /// No validation happens here; see [`AuthState::is_valid`].
    pub fn save(&self, token: impl Into<String>, identity: Option<serde_json::Value>) {
        let next = AuthChange {
            token: token.into(),
            identity,
        };
        self.replace(next);
    }

    /// Forget token and identity. Equivalent to `save("", None)`.
    pub fn clear(&self) {
        self.replace(AuthChange::default());
    }

    fn replace(&self, next: AuthChange) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next.clone());

        if let Some(queue) = &self.persistence {
            if next.token.is_empty() {
                queue.clear();
            } else {
                queue.save(&PersistedAuth {
                    token: next.token.clone(),
                    model: next.identity.clone(),
                });
            }
        }

        // Published while still holding the write lock so events are
        // observed in the same order as the writes.
        self.change_tx.send_replace(next);
    }

    /// Current `(token, identity)` snapshot.
    pub fn snapshot(&self) -> Arc<AuthChange> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current token (empty when unauthenticated).
    pub fn token(&self) -> String {
        self.snapshot().token.clone()
    }

    /// Current identity payload.
    pub fn identity(&self) -> Option<serde_json::Value> {
        self.snapshot().identity.clone()
    }

    /// `true` when the token is well formed and its `exp` claim lies in the
    /// future. Never fails; malformed tokens are simply invalid.
    pub fn is_valid(&self) -> bool {
        self.snapshot().is_valid()
    }

    /// Subscribe to changes. Only changes made after this call are reported,
    /// and an unconsumed change is overwritten by the next one.
    pub fn on_change(&self) -> watch::Receiver<AuthChange> {
        self.change_tx.subscribe()
    }

    /// Wait until every change made so far reached the persistence hook.
    /// Returns immediately for memory-only state.
    pub async fn flush_persistence(&self) {
        if let Some(queue) = &self.persistence {
            queue.flush().await;
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("current", &*self.snapshot())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}
