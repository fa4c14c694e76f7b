//! Hand-off to the external push pipeline for recipients with no live
//! connection anywhere.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::configs::{EventPublisher, RealtimeConfig};
use crate::modules::message::schema::{MessageEntity, MessageType};

use super::presence::PresenceTracker;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineMessageEvent {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_ids: Vec<Uuid>,
    #[serde(rename = "type")]
    pub _type: MessageType,
    /// Type-derived placeholder, never message content.
    pub preview: String,
}

#[derive(Clone)]
pub struct OfflineNotifier {
    presence: PresenceTracker,
    publisher: Arc<dyn EventPublisher + Send + Sync>,
    channel: String,
}

impl OfflineNotifier {
    pub fn new(
        presence: PresenceTracker,
        publisher: Arc<dyn EventPublisher + Send + Sync>,
        config: &RealtimeConfig,
    ) -> Self {
        Self { presence, publisher, channel: config.offline_channel.clone() }
    }

    /// Publishes an `OfflineMessageEvent` for whichever of `recipients` are
    /// offline. Returns the ids it published for.
    pub async fn notify(&self, message: &MessageEntity, recipients: &[Uuid]) -> Vec<Uuid> {
        let offline: Vec<Uuid> = match recipients {
            // direct threads: one EXISTS instead of the pipeline
            [only] if self.presence.is_online(only).await => vec![],
            [only] => vec![*only],
            _ => self
                .presence
                .batch_is_online(recipients)
                .await
                .into_iter()
                .filter(|info| !info.is_online)
                .map(|info| info.user_id)
                .collect(),
        };

        if offline.is_empty() {
            return offline;
        }

        let event = OfflineMessageEvent {
            message_id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            recipient_ids: offline.clone(),
            _type: message._type,
            preview: message._type.preview().to_string(),
        };

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode offline event for {}: {}", message.id, e);
                return vec![];
            }
        };

        match self.publisher.publish(&self.channel, payload).await {
            Ok(()) => {
                tracing::debug!(
                    "Offline notification for message {} ({} recipients)",
                    message.id,
                    offline.len()
                );
                offline
            }
            Err(e) => {
                tracing::error!("Failed to publish offline event for {}: {}", message.id, e);
                vec![]
            }
        }
    }
}
