use serde::Serialize;
use uuid::Uuid;

/// Result of a delivery acknowledgement. Only a freshly written receipt is
/// worth telling the sender about.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Notify {
        sender_id: Uuid,
        conversation_id: Uuid,
        delivered_at: chrono::DateTime<chrono::Utc>,
    },
    NothingToNotify,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    /// Messages that gained a read receipt from this call.
    pub message_ids: Vec<Uuid>,
    pub read_at: chrono::DateTime<chrono::Utc>,
}
