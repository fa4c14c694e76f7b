use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

use crate::modules::message::schema::{MessageEntity, MessageType};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "conversation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Direct,
    Group,
    Listing,
    DatingMatch,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "conversation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Deleted,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "participant_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Member,
    Admin,
}

#[derive(Debug, Clone, FromRow)]
pub struct ConversationEntity {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub _type: ConversationType,
    pub group_name: Option<String>,
    pub group_avatar: Option<String>,
    pub group_description: Option<String>,
    pub related_type: Option<String>,
    pub related_id: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub last_message_sender_id: Option<Uuid>,
    pub last_message_preview: Option<String>,
    pub last_message_type: Option<MessageType>,
    pub last_message_sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub messages_count: i64,
    pub status: ConversationStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ConversationEntity {
    pub fn group_info(&self) -> Option<GroupInfo> {
        self.group_name.as_ref().map(|name| GroupInfo {
            name: name.clone(),
            avatar: self.group_avatar.clone(),
            description: self.group_description.clone(),
        })
    }

    pub fn related_to(&self) -> Option<RelatedEntity> {
        match (&self.related_type, &self.related_id) {
            (Some(kind), Some(id)) => Some(RelatedEntity { kind: kind.clone(), id: id.clone() }),
            _ => None,
        }
    }

    pub fn last_message(&self) -> Option<LastMessage> {
        match (
            self.last_message_id,
            self.last_message_sender_id,
            self.last_message_type,
            self.last_message_sent_at,
        ) {
            (Some(message_id), Some(sender_id), Some(_type), Some(sent_at)) => Some(LastMessage {
                message_id,
                sender_id,
                preview: self.last_message_preview.clone().unwrap_or_default(),
                _type,
                sent_at,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantEntity {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub role: ParticipantRole,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub last_read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_read_message_id: Option<Uuid>,
    pub unread_count: i32,
    pub is_archived: bool,
    pub is_muted: bool,
    pub muted_until: Option<chrono::DateTime<chrono::Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ParticipantEntity {
    /// A mute with a `muted_until` in the past has lapsed.
    pub fn is_muted_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_muted && self.muted_until.is_none_or(|until| until > now)
    }
}

/// A conversation together with its full participant list, in join order.
#[derive(Debug, Clone)]
pub struct ConversationWithParticipants {
    pub conversation: ConversationEntity,
    pub participants: Vec<ParticipantEntity>,
}

impl ConversationWithParticipants {
    pub fn participant(&self, user_id: &Uuid) -> Option<&ParticipantEntity> {
        self.participants.iter().find(|p| &p.user_id == user_id)
    }

    pub fn active_participant(&self, user_id: &Uuid) -> Option<&ParticipantEntity> {
        self.participant(user_id).filter(|p| !p.is_deleted)
    }

    /// Participants other than `user_id` who have not left or hidden the thread.
    pub fn other_active_ids(&self, user_id: &Uuid) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| &p.user_id != user_id && !p.is_deleted)
            .map(|p| p.user_id)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupInfo {
    pub name: String,
    pub avatar: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub preview: String,
    #[serde(rename = "type")]
    pub _type: MessageType,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

impl From<&MessageEntity> for LastMessage {
    fn from(message: &MessageEntity) -> Self {
        LastMessage {
            message_id: message.id,
            sender_id: message.sender_id,
            preview: message._type.preview().to_string(),
            _type: message._type,
            sent_at: message.created_at,
        }
    }
}

/// Sorted-pair key backing the one-direct-thread-per-pair constraint.
pub fn direct_key(user_a: &Uuid, user_b: &Uuid) -> String {
    if user_a <= user_b {
        format!("{user_a}:{user_b}")
    } else {
        format!("{user_b}:{user_a}")
    }
}
