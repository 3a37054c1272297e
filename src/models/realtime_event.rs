use crate::error::{PocketLinkError, Result};
use serde::de::DeserializeOwned;

/// One named event read from the realtime stream.
///
/// For subscription events `event` equals the subscription key the server
/// matched and `data` holds the raw JSON payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeEvent {
    /// Event name (`message` when the server sent none).
    pub event: String,
    /// Last event id seen on the stream.
    pub id: Option<String>,
    /// Payload, `None` when the event carried no `data:` line.
    pub data: Option<String>,
    /// Server-suggested reconnection delay in milliseconds.
    pub retry: Option<u64>,
}

impl RealtimeEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.data.as_deref().ok_or_else(|| {
            PocketLinkError::SerializationError(format!("Event '{}' carries no data", self.event))
        })?;
        Ok(serde_json::from_str(data)?)
    }
}
