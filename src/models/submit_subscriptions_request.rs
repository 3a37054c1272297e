use serde::{Deserialize, Serialize};

/// Body of the subscription submission (`POST /api/realtime`).
///
/// Always carries the complete desired key set for the connection; the
/// server replaces whatever it had before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitSubscriptionsRequest {
    /// Connection id announced by the server on the stream.
    #[serde(rename = "clientId")]
    pub connection_id: String,
    pub subscriptions: Vec<String>,
}
