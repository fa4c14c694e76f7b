//! Realtime event protocol.
//!
//! Every frame is `{"event": <name>, "data": {...}}` with camelCase fields,
//! in both directions.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::modules::keys::schema::UserKeyEntity;
use crate::modules::message::model::SendMessage;
use crate::modules::message::schema::{
    EncryptedContent, MediaInfo, MessageEntity, MessageType, SystemEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: Uuid,
    pub temp_id: Option<String>,
    #[serde(flatten)]
    pub message: SendMessage,
}

/// Events sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "message:send")]
    MessageSend(SendMessagePayload),

    #[serde(rename = "message:delivered", rename_all = "camelCase")]
    MessageDelivered { message_id: Uuid },

    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead { conversation_id: Uuid, message_id: Uuid },

    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "conversation:join", rename_all = "camelCase")]
    ConversationJoin { conversation_id: Uuid },

    #[serde(rename = "conversation:leave", rename_all = "camelCase")]
    ConversationLeave { conversation_id: Uuid },

    #[serde(rename = "presence:update")]
    PresenceUpdate { status: PresenceStatus },

    #[serde(rename = "keys:get", rename_all = "camelCase")]
    KeysGet { user_id: Uuid },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    pub fn temp_id(&self) -> Option<String> {
        match self {
            ClientMessage::MessageSend(payload) => payload.temp_id.clone(),
            _ => None,
        }
    }
}

/// `message:new` payload. Receipts are not part of it; the recipient's
/// client acknowledges with `message:delivered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub _type: MessageType,
    pub encrypted: Option<EncryptedContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub sender_public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_event: Option<SystemEvent>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&MessageEntity> for NewMessageEvent {
    fn from(message: &MessageEntity) -> Self {
        NewMessageEvent {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            _type: message._type,
            encrypted: message.encrypted.clone(),
            media: message.media.clone(),
            reply_to: message.reply_to,
            sender_public_key: message.sender_public_key.clone(),
            system_event: message.system_event.clone(),
            created_at: message.created_at,
        }
    }
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "authenticated", rename_all = "camelCase")]
    Authenticated {
        user_id: Uuid,
        session_id: Uuid,
        connected_at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "message:new")]
    MessageNew(NewMessageEvent),

    #[serde(rename = "message:sent", rename_all = "camelCase")]
    MessageSent {
        temp_id: Option<String>,
        message_id: Uuid,
        conversation_id: Uuid,
        sent_at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "message:delivered", rename_all = "camelCase")]
    MessageDelivered {
        message_id: Uuid,
        conversation_id: Uuid,
        delivered_to: Uuid,
        delivered_at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "message:read", rename_all = "camelCase")]
    MessageRead {
        conversation_id: Uuid,
        message_id: Uuid,
        read_by: Uuid,
        read_at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "message:deleted", rename_all = "camelCase")]
    MessageDeleted { conversation_id: Uuid, message_id: Uuid },

    #[serde(rename = "conversation:updated", rename_all = "camelCase")]
    ConversationUpdated { conversation_id: Uuid },

    #[serde(rename = "typing:update", rename_all = "camelCase")]
    TypingUpdate {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "presence:update", rename_all = "camelCase")]
    PresenceUpdate {
        user_id: Uuid,
        status: PresenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[serde(rename = "keys:response", rename_all = "camelCase")]
    KeysResponse { user_id: Uuid, keys: Vec<UserKeyEntity> },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(err: &crate::api::error::Error, temp_id: Option<String>) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.message().into_owned(),
            temp_id,
        }
    }
}
