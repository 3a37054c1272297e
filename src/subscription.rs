//! Realtime subscriptions.
//!
//! - [`key`]: canonical subscription keys and topic/prefix matching
//! - [`multiplexer`]: the registry and its background task
//! - [`handle`]: per-listener unsubscribe handles

pub mod handle;
pub mod key;
pub mod multiplexer;

pub use handle::UnsubscribeHandle;
pub use key::subscription_key;
pub use multiplexer::{Listener, ListenerId, SubscriptionMultiplexer};
