use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::service::ConversationService;
use crate::modules::delivery::model::{DeliveryOutcome, ReadOutcome};
use crate::modules::message::repository::MessageRepository;
use crate::modules::settings::service::SettingsService;
use crate::modules::websocket::events::Broadcast;
use crate::modules::websocket::fanout::Broadcaster;
use crate::modules::websocket::message::ServerMessage;

/// Delivered and read receipts.
///
/// A receipt is written at most once per (message, user, kind); repeated
/// acknowledgements are no-ops and never re-notify anyone.
#[derive(Clone)]
pub struct DeliveryService {
    message_repo: Arc<dyn MessageRepository + Send + Sync>,
    conversations: ConversationService,
    settings: SettingsService,
    broadcaster: Arc<dyn Broadcaster + Send + Sync>,
}

impl DeliveryService {
    pub fn with_dependencies(
        message_repo: Arc<dyn MessageRepository + Send + Sync>,
        conversations: ConversationService,
        settings: SettingsService,
        broadcaster: Arc<dyn Broadcaster + Send + Sync>,
    ) -> Self {
        info!("DeliveryService initialized with dependencies");
        DeliveryService { message_repo, conversations, settings, broadcaster }
    }

    /// Records that `user_id` received `message_id` and tells the sender's
    /// connections when the receipt is new.
    pub async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> Result<DeliveryOutcome, error::SystemError> {
        let message = self
            .message_repo
            .find_by_id(&message_id)
            .await?
            .filter(|m| !m.is_hidden_for(&user_id))
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        self.conversations.validate_participant(&message.conversation_id, &user_id).await?;

        if message.sender_id == user_id {
            return Ok(DeliveryOutcome::NothingToNotify);
        }

        let Some(delivered_at) = self.message_repo.add_delivered(&message_id, &user_id).await? else {
            debug!("Delivery of {} to {} already recorded", message_id, user_id);
            return Ok(DeliveryOutcome::NothingToNotify);
        };

        self.broadcaster
            .broadcast(Broadcast::User {
                user_id: message.sender_id,
                message: ServerMessage::MessageDelivered {
                    message_id,
                    conversation_id: message.conversation_id,
                    delivered_to: user_id,
                    delivered_at,
                },
            })
            .await;

        Ok(DeliveryOutcome::Notify {
            sender_id: message.sender_id,
            conversation_id: message.conversation_id,
            delivered_at,
        })
    }

    /// Writes read receipts for every other-authored message up to and
    /// including `upto`.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        upto: Uuid,
    ) -> Result<ReadOutcome, error::SystemError> {
        self.conversations.validate_participant(&conversation_id, &user_id).await?;

        let in_conversation = self
            .message_repo
            .find_by_id(&upto)
            .await?
            .is_some_and(|m| m.conversation_id == conversation_id);
        if !in_conversation {
            return Err(error::SystemError::not_found("Message not found in this conversation"));
        }

        let read_at = chrono::Utc::now();
        let message_ids =
            self.message_repo.add_read_upto(&conversation_id, &user_id, &upto, read_at).await?;

        Ok(ReadOutcome { message_ids, read_at })
    }

    /// `mark_read`, then clears the reader's unread count and tells the room,
    /// unless the reader turned read receipts off.
    pub async fn acknowledge_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        upto: Uuid,
    ) -> Result<ReadOutcome, error::SystemError> {
        let outcome = self.mark_read(conversation_id, user_id, upto).await?;

        self.conversations.reset_unread(&conversation_id, &user_id, Some(upto)).await?;

        let settings = self.settings.get_or_default(&user_id).await;
        if settings.read_receipts {
            self.broadcaster
                .broadcast(Broadcast::room(
                    conversation_id,
                    ServerMessage::MessageRead {
                        conversation_id,
                        message_id: upto,
                        read_by: user_id,
                        read_at: outcome.read_at,
                    },
                ))
                .await;
        }

        Ok(outcome)
    }
}
