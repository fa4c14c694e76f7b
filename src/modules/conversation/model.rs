use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::modules::conversation::schema::{
    ConversationStatus, ConversationType, ConversationWithParticipants, GroupInfo, LastMessage,
    ParticipantRole, RelatedEntity,
};
use crate::utils::double_option;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetaInput {
    #[validate(length(min = 1, max = 100, message = "Group name must be 1-100 characters"))]
    pub name: String,
    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar: Option<String>,
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    #[serde(rename = "type")]
    pub _type: ConversationType,
    #[validate(length(min = 1, max = 256, message = "Between 1 and 256 participants required"))]
    pub participant_ids: Vec<Uuid>,
    #[validate(nested)]
    pub group: Option<GroupMetaInput>,
    pub related_to: Option<RelatedEntity>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    pub cursor: Option<chrono::DateTime<chrono::Utc>>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub include_archived: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversation {
    pub is_archived: Option<bool>,
    pub is_muted: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub muted_until: Option<Option<chrono::DateTime<chrono::Utc>>>,
    #[validate(length(min = 1, max = 100, message = "Group name must be 1-100 characters"))]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

impl UpdateConversation {
    pub fn participant_settings(&self) -> Option<ParticipantSettingsUpdate> {
        if self.is_archived.is_none() && self.is_muted.is_none() && self.muted_until.is_none() {
            return None;
        }
        Some(ParticipantSettingsUpdate {
            is_archived: self.is_archived,
            is_muted: self.is_muted,
            muted_until: self.muted_until,
        })
    }

    pub fn group_meta(&self) -> Option<GroupMetaUpdate> {
        if self.name.is_none() && self.avatar.is_none() && self.description.is_none() {
            return None;
        }
        Some(GroupMetaUpdate {
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            description: self.description.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParticipantSettingsUpdate {
    pub is_archived: Option<bool>,
    pub is_muted: Option<bool>,
    pub muted_until: Option<Option<chrono::DateTime<chrono::Utc>>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupMetaUpdate {
    pub name: Option<String>,
    pub avatar: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub user_id: Uuid,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone)]
pub struct InsertConversation {
    pub id: Uuid,
    pub _type: ConversationType,
    pub direct_key: Option<String>,
    pub group: Option<GroupInfo>,
    pub related_to: Option<RelatedEntity>,
    /// In join order; the first entry is the creator.
    pub participants: Vec<NewParticipant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// A conversation as seen by one participant: shared fields plus only that
/// participant's own read/mute/archive state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub _type: ConversationType,
    pub participants: Vec<ParticipantSummary>,
    pub group: Option<GroupInfo>,
    pub related_to: Option<RelatedEntity>,
    pub last_message: Option<LastMessage>,
    pub messages_count: i64,
    pub status: ConversationStatus,
    pub unread_count: i32,
    pub last_read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_read_message_id: Option<Uuid>,
    pub is_archived: bool,
    pub is_muted: bool,
    pub muted_until: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ConversationView {
    pub fn for_user(detail: &ConversationWithParticipants, user_id: &Uuid) -> Option<Self> {
        let me = detail.active_participant(user_id)?;
        let conversation = &detail.conversation;

        let participants = detail
            .participants
            .iter()
            .filter(|p| !p.is_deleted || &p.user_id == user_id)
            .map(|p| ParticipantSummary { user_id: p.user_id, role: p.role, joined_at: p.joined_at })
            .collect();

        Some(ConversationView {
            id: conversation.id,
            _type: conversation._type,
            participants,
            group: conversation.group_info(),
            related_to: conversation.related_to(),
            last_message: conversation.last_message(),
            messages_count: conversation.messages_count,
            status: conversation.status,
            unread_count: me.unread_count,
            last_read_at: me.last_read_at,
            last_read_message_id: me.last_read_message_id,
            is_archived: me.is_archived,
            is_muted: me.is_muted,
            muted_until: me.muted_until,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<ConversationView>,
    pub next_cursor: Option<chrono::DateTime<chrono::Utc>>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub message_id: Uuid,
}
