use serde::{Deserialize, Serialize};

/// What happened to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

/// Typed payload of a collection subscription event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSubscriptionEvent<T> {
    pub action: RecordAction,
    pub record: Option<T>,
}
