//! Collection-scoped realtime subscriptions.

use crate::error::Result;
use crate::models::{RealtimeEvent, RecordSubscriptionEvent, SubscriptionOptions};
use crate::subscription::{SubscriptionMultiplexer, UnsubscribeHandle};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Realtime access to one collection.
///
/// Topics are relative to the collection: `*` for every record, or a record
/// id. Obtained from [`PocketLinkClient::collection`](crate::PocketLinkClient::collection).
///
/// ```rust,no_run
/// use pocket_link::{PocketLinkClient, RecordAction};
///
/// # async fn example() -> pocket_link::Result<()> {
/// let client = PocketLinkClient::builder().base_url("http://127.0.0.1:8090").build()?;
///
/// let handle = client
///     .collection("demo")
///     .subscribe::<serde_json::Value, _>("*", |e| {
///         if e.action == RecordAction::Create {
///             println!("created: {:?}", e.record);
///         }
///     }, None)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    realtime: Arc<SubscriptionMultiplexer>,
}

impl Collection {
    pub(crate) fn new(name: impl Into<String>, realtime: Arc<SubscriptionMultiplexer>) -> Self {
        Self {
            name: name.into(),
            realtime,
        }
    }

    /// Collection id or name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn topic(&self, topic: &str) -> String {
        format!("{}/{}", self.name, topic)
    }

    /// Subscribe to record changes of `topic` within the collection.
    ///
    /// Payloads that do not decode as `RecordSubscriptionEvent<T>` are
    /// logged and skipped.
    pub async fn subscribe<T, F>(
        &self,
        topic: &str,
        callback: F,
        options: Option<SubscriptionOptions>,
    ) -> Result<UnsubscribeHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(RecordSubscriptionEvent<T>) + Send + Sync + 'static,
    {
        let listener = move |event: &RealtimeEvent| match event.json::<RecordSubscriptionEvent<T>>() {
            Ok(record_event) => callback(record_event),
            Err(e) => log::warn!(
                "[REALTIME] Skipping undecodable record event '{}': {}",
                event.event,
                e
            ),
        };
        self.realtime
            .subscribe(&self.topic(topic), listener, options)
            .await
    }

    /// Unsubscribe `topic`, or every subscription of the collection when
    /// `topic` is blank (keys starting with `"{name}/"`).
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if topic.trim().is_empty() {
            self.realtime.unsubscribe_by_prefix(&self.topic("")).await
        } else {
            self.realtime.unsubscribe(&self.topic(topic)).await
        }
    }
}
