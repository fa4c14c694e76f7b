use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::schema::ConversationType;
use crate::modules::conversation::service::ConversationService;
use crate::modules::keys::repository::KeyRepository;
use crate::modules::message::model::{
    InsertMessage, MessagePage, MessageQuery, SendMessage, DEFAULT_MESSAGE_PAGE,
};
use crate::modules::message::repository::MessageRepository;
use crate::modules::message::schema::MessageEntity;
use crate::modules::settings::service::SettingsService;
use crate::modules::websocket::events::Broadcast;
use crate::modules::websocket::fanout::Broadcaster;
use crate::modules::websocket::message::{NewMessageEvent, ServerMessage};
use crate::modules::websocket::notifier::OfflineNotifier;

#[derive(Clone)]
pub struct MessageService {
    message_repo: Arc<dyn MessageRepository + Send + Sync>,
    conversations: ConversationService,
    settings: SettingsService,
    key_repo: Arc<dyn KeyRepository + Send + Sync>,
    broadcaster: Arc<dyn Broadcaster + Send + Sync>,
    notifier: OfflineNotifier,
}

impl MessageService {
    pub fn with_dependencies(
        message_repo: Arc<dyn MessageRepository + Send + Sync>,
        conversations: ConversationService,
        settings: SettingsService,
        key_repo: Arc<dyn KeyRepository + Send + Sync>,
        broadcaster: Arc<dyn Broadcaster + Send + Sync>,
        notifier: OfflineNotifier,
    ) -> Self {
        info!("MessageService initialized with dependencies");
        MessageService { message_repo, conversations, settings, key_repo, broadcaster, notifier }
    }

    /// Stores an encrypted message and fans it out.
    ///
    /// Flow:
    /// 1. Validate the envelope and the sender's membership
    /// 2. Apply recipients' block / who-can-message settings (non-group only)
    /// 3. Persist, update the conversation preview and unread counts
    /// 4. Broadcast `message:new` to the room, skipping the origin connection
    /// 5. Hand offline recipients to the push pipeline
    pub async fn send(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        body: SendMessage,
        origin_connection: Option<Uuid>,
    ) -> Result<MessageEntity, error::SystemError> {
        body.check()?;

        let detail = self.conversations.validate_participant(&conversation_id, &sender_id).await?;
        let conversation_type = detail.conversation._type;

        if conversation_type != ConversationType::Group {
            for other in detail.participants.iter().filter(|p| p.user_id != sender_id) {
                let settings = self.settings.get_or_default(&other.user_id).await;
                if !settings.accepts_message_from(&sender_id, conversation_type) {
                    return Err(error::SystemError::forbidden(
                        "The recipient does not accept messages from you",
                    ));
                }
            }
        }

        if let Some(reply_to) = body.reply_to {
            let valid = self
                .message_repo
                .find_by_id(&reply_to)
                .await?
                .is_some_and(|m| m.conversation_id == conversation_id && !m.is_hidden_for(&sender_id));
            if !valid {
                return Err(error::SystemError::bad_request(
                    "replyTo: message not found in this conversation",
                ));
            }
        }

        let sender_public_key = self
            .key_repo
            .find_active_by_user(&sender_id)
            .await?
            .into_iter()
            .next()
            .map(|k| k.public_key);

        let message = self
            .message_repo
            .create(&InsertMessage {
                id: Uuid::now_v7(),
                conversation_id,
                sender_id,
                _type: body._type,
                encrypted: body.encrypted,
                media: body.media,
                reply_to: body.reply_to,
                sender_public_key,
                system_event: None,
            })
            .await?;

        // Direct recipients who had hidden the thread are back in it now.
        let revived: Vec<Uuid> = detail
            .participants
            .iter()
            .filter(|p| {
                conversation_type == ConversationType::Direct && p.user_id != sender_id && p.is_deleted
            })
            .map(|p| p.user_id)
            .collect();
        if !revived.is_empty() {
            self.broadcaster
                .broadcast(Broadcast::JoinRoom { user_ids: revived, conversation_id })
                .await;
        }

        self.broadcaster
            .broadcast(Broadcast::room_except(
                conversation_id,
                ServerMessage::MessageNew(NewMessageEvent::from(&message)),
                origin_connection,
            ))
            .await;

        let now = chrono::Utc::now();
        let recipients: Vec<Uuid> = detail
            .participants
            .iter()
            .filter(|p| p.user_id != sender_id)
            .filter(|p| !p.is_deleted || conversation_type == ConversationType::Direct)
            .filter(|p| !p.is_muted_at(now))
            .map(|p| p.user_id)
            .collect();
        if !recipients.is_empty() {
            self.notifier.notify(&message, &recipients).await;
        }

        info!("Message {} sent to conversation {}", message.id, conversation_id);
        Ok(message)
    }

    pub async fn list(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        query: MessageQuery,
    ) -> Result<MessagePage, error::SystemError> {
        self.conversations.validate_participant(&conversation_id, &viewer_id).await?;

        let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_PAGE).clamp(1, 100);
        let mut messages = self
            .message_repo
            .find_page(
                &conversation_id,
                &viewer_id,
                query.cursor,
                limit + 1,
                query.order.unwrap_or_default(),
            )
            .await?;

        let has_more = messages.len() as i64 > limit;
        messages.truncate(limit as usize);
        let next_cursor = if has_more { messages.last().map(|m| m.id) } else { None };

        Ok(MessagePage { messages, next_cursor, has_more })
    }

    /// Deletes for everyone (sender only, hard delete, broadcast) or hides the
    /// message for the caller alone.
    pub async fn delete(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        for_everyone: bool,
    ) -> Result<(), error::SystemError> {
        let message = self
            .message_repo
            .find_by_id(&message_id)
            .await?
            .filter(|m| !m.is_hidden_for(&user_id))
            .ok_or_else(|| error::SystemError::not_found("Message not found"))?;

        self.conversations.validate_participant(&message.conversation_id, &user_id).await?;

        if for_everyone {
            if message.sender_id != user_id {
                return Err(error::SystemError::forbidden(
                    "You can only delete your own messages for everyone",
                ));
            }

            let deleted = self.message_repo.delete_for_everyone(&message_id, &user_id).await?;
            if !deleted {
                return Err(error::SystemError::not_found("Message not found"));
            }

            self.broadcaster
                .broadcast(Broadcast::room(
                    message.conversation_id,
                    ServerMessage::MessageDeleted {
                        conversation_id: message.conversation_id,
                        message_id,
                    },
                ))
                .await;

            info!("Message {} deleted for everyone by {}", message_id, user_id);
            return Ok(());
        }

        if !self.message_repo.hide_for_user(&message_id, &user_id).await? {
            return Err(error::SystemError::not_found("Message not found"));
        }
        Ok(())
    }
}
