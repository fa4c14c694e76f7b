//! Per-event work for realtime connections.
//!
//! The session actor owns connection state; everything that touches storage
//! or other users lives here so it can run off the actor and be tested
//! without a socket.
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::configs::RealtimeConfig;
use crate::modules::conversation::service::ConversationService;
use crate::modules::delivery::service::DeliveryService;
use crate::modules::keys::repository::KeyRepository;
use crate::modules::message::service::MessageService;
use crate::modules::settings::service::SettingsService;
use crate::utils::Claims;

use super::events::Broadcast;
use super::fanout::Broadcaster;
use super::message::{PresenceStatus, SendMessagePayload, ServerMessage};
use super::presence::PresenceTracker;
use super::typing::TypingTracker;

/// What the session needs to finish an authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub conversation_ids: Vec<Uuid>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct GatewayService {
    jwt_secret: String,
    conversations: ConversationService,
    messages: MessageService,
    delivery: DeliveryService,
    settings: SettingsService,
    key_repo: Arc<dyn KeyRepository + Send + Sync>,
    presence: PresenceTracker,
    typing: TypingTracker,
    broadcaster: Arc<dyn Broadcaster + Send + Sync>,
    config: RealtimeConfig,
}

impl GatewayService {
    #[allow(clippy::too_many_arguments)]
    pub fn with_dependencies(
        jwt_secret: String,
        conversations: ConversationService,
        messages: MessageService,
        delivery: DeliveryService,
        settings: SettingsService,
        key_repo: Arc<dyn KeyRepository + Send + Sync>,
        presence: PresenceTracker,
        typing: TypingTracker,
        broadcaster: Arc<dyn Broadcaster + Send + Sync>,
        config: RealtimeConfig,
    ) -> Self {
        tracing::info!("GatewayService initialized for instance {}", config.instance_id);
        GatewayService {
            jwt_secret,
            conversations,
            messages,
            delivery,
            settings,
            key_repo,
            presence,
            typing,
            broadcaster,
            config,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Verifies the token, marks the user online on this connection and
    /// returns the rooms the connection should join.
    pub async fn authenticate(
        &self,
        token: &str,
        connection_id: Uuid,
    ) -> Result<AuthenticatedUser, error::SystemError> {
        let claims = Claims::decode_access(token, self.jwt_secret.as_bytes())?;
        let user_id = claims.sub;

        let conversation_ids = self.conversations.conversation_ids_for_user(&user_id).await?;
        self.presence.set_online(&user_id, &connection_id).await;

        self.announce_presence(&user_id, PresenceStatus::Online, None).await;

        tracing::info!(
            "User {} authenticated on connection {} ({} conversations)",
            user_id,
            connection_id,
            conversation_ids.len()
        );

        Ok(AuthenticatedUser { user_id, conversation_ids, connected_at: chrono::Utc::now() })
    }

    /// Clears typing flags the connection still held and, if this was the
    /// user's current connection, marks them offline.
    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid, typing_in: Vec<Uuid>) {
        for conversation_id in typing_in {
            self.typing.stop(&conversation_id, &user_id).await;
            self.broadcast_typing(conversation_id, user_id, Some(connection_id), false).await;
        }

        if let Some(last_seen) = self.presence.set_offline(&user_id, &connection_id).await {
            self.announce_presence(&user_id, PresenceStatus::Offline, Some(last_seen)).await;
        }

        tracing::info!("User {} disconnected from connection {}", user_id, connection_id);
    }

    /// Keeps the presence record alive. When the heartbeat had to re-create
    /// it, counterparts last heard "offline" and are told the user is back.
    pub async fn heartbeat(&self, user_id: Uuid, connection_id: Uuid) {
        if self.presence.refresh(&user_id, &connection_id).await {
            self.announce_presence(&user_id, PresenceStatus::Online, None).await;
        }
    }

    /// Persists and fans out a message, answering the sender with
    /// `message:sent`.
    pub async fn send_message(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        payload: SendMessagePayload,
    ) -> Result<ServerMessage, error::SystemError> {
        let message = self
            .messages
            .send(user_id, payload.conversation_id, payload.message, Some(connection_id))
            .await?;

        Ok(ServerMessage::MessageSent {
            temp_id: payload.temp_id,
            message_id: message.id,
            conversation_id: message.conversation_id,
            sent_at: message.created_at,
        })
    }

    pub async fn mark_delivered(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), error::SystemError> {
        self.delivery.mark_delivered(message_id, user_id).await?;
        Ok(())
    }

    pub async fn mark_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Result<(), error::SystemError> {
        self.delivery.acknowledge_read(conversation_id, user_id, message_id).await?;
        Ok(())
    }

    pub async fn typing_start(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), error::SystemError> {
        self.conversations.validate_participant(&conversation_id, &user_id).await?;
        self.typing.start(&conversation_id, &user_id).await;
        self.broadcast_typing(conversation_id, user_id, Some(connection_id), true).await;
        Ok(())
    }

    pub async fn typing_stop(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), error::SystemError> {
        self.conversations.validate_participant(&conversation_id, &user_id).await?;
        self.typing.stop(&conversation_id, &user_id).await;
        self.broadcast_typing(conversation_id, user_id, Some(connection_id), false).await;
        Ok(())
    }

    /// Called when a connection's typing timer fires. Announces the stop only
    /// if the flag really lapsed.
    pub async fn typing_lapsed(&self, user_id: Uuid, connection_id: Uuid, conversation_id: Uuid) {
        if self.typing.is_typing(&conversation_id, &user_id).await {
            return;
        }
        self.broadcast_typing(conversation_id, user_id, Some(connection_id), false).await;
    }

    pub fn typing_ttl(&self) -> u64 {
        self.typing.ttl()
    }

    /// Authorizes a room join; the session performs the join itself.
    pub async fn join(&self, user_id: Uuid, conversation_id: Uuid) -> Result<(), error::SystemError> {
        self.conversations.validate_participant(&conversation_id, &user_id).await?;
        Ok(())
    }

    /// Status changes are relayed, not stored; only connection state decides
    /// whether a user is online.
    pub async fn update_presence(&self, user_id: Uuid, status: PresenceStatus) {
        self.announce_presence(&user_id, status, None).await;
    }

    pub async fn get_keys(&self, target_id: Uuid) -> Result<ServerMessage, error::SystemError> {
        let keys = self.key_repo.find_active_by_user(&target_id).await?;
        Ok(ServerMessage::KeysResponse { user_id: target_id, keys })
    }

    async fn broadcast_typing(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        skip_connection: Option<Uuid>,
        is_typing: bool,
    ) {
        let settings = self.settings.get_or_default(&user_id).await;
        if !settings.typing_indicators {
            return;
        }

        self.broadcaster
            .broadcast(Broadcast::room_except(
                conversation_id,
                ServerMessage::TypingUpdate {
                    conversation_id,
                    user_id,
                    is_typing,
                    timestamp: chrono::Utc::now(),
                },
                skip_connection,
            ))
            .await;
    }

    /// Sends a presence change to everyone sharing a conversation with the
    /// user, unless they hide their online status.
    async fn announce_presence(
        &self,
        user_id: &Uuid,
        status: PresenceStatus,
        last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let settings = self.settings.get_or_default(user_id).await;
        if !settings.online_status {
            return;
        }

        let counterparts = match self.conversations.counterpart_ids(user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Could not resolve presence audience for {}: {}", user_id, e);
                return;
            }
        };
        if counterparts.is_empty() {
            return;
        }

        self.broadcaster
            .broadcast(Broadcast::Users {
                user_ids: counterparts,
                message: ServerMessage::PresenceUpdate { user_id: *user_id, status, last_seen_at },
            })
            .await;
    }
}
