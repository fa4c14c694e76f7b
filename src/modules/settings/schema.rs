use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

use crate::modules::conversation::schema::ConversationType;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Type, Serialize, Deserialize)]
#[sqlx(type_name = "who_can_message", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WhoCanMessage {
    #[default]
    Everyone,
    Matches,
    Nobody,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Type, Serialize, Deserialize)]
#[sqlx(type_name = "media_auto_download", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaAutoDownload {
    Always,
    #[default]
    Wifi,
    Never,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingSettingsEntity {
    pub user_id: Uuid,
    pub read_receipts: bool,
    pub typing_indicators: bool,
    pub online_status: bool,
    pub notification_previews: bool,
    pub who_can_message: WhoCanMessage,
    pub media_auto_download: MediaAutoDownload,
    pub blocked_users: Vec<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl MessagingSettingsEntity {
    pub fn defaults_for(user_id: Uuid) -> Self {
        let now = chrono::Utc::now();
        MessagingSettingsEntity {
            user_id,
            read_receipts: true,
            typing_indicators: true,
            online_status: true,
            notification_previews: true,
            who_can_message: WhoCanMessage::default(),
            media_auto_download: MediaAutoDownload::default(),
            blocked_users: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_blocked(&self, user_id: &Uuid) -> bool {
        self.blocked_users.contains(user_id)
    }

    /// Whether the owner of these settings accepts a new message from
    /// `sender_id` in a conversation of the given type. Groups are never
    /// filtered here.
    pub fn accepts_message_from(&self, sender_id: &Uuid, conversation: ConversationType) -> bool {
        if conversation == ConversationType::Group {
            return true;
        }
        if self.has_blocked(sender_id) {
            return false;
        }
        match self.who_can_message {
            WhoCanMessage::Everyone => true,
            WhoCanMessage::Matches => conversation == ConversationType::DatingMatch,
            WhoCanMessage::Nobody => false,
        }
    }
}
