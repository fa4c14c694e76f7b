use serde::{Deserialize, Serialize};
use sqlx::{
    prelude::{FromRow, Type},
    types::Json,
};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Voice,
    File,
    System,
}

impl MessageType {
    /// Placeholder shown wherever a preview is needed; content is ciphertext
    /// and never leaves the envelope.
    pub fn preview(&self) -> &'static str {
        match self {
            MessageType::Text => "💬 Mesaj",
            MessageType::Image => "📷 Fotoğraf",
            MessageType::Video => "🎥 Video",
            MessageType::Voice => "🎤 Sesli mesaj",
            MessageType::File => "📎 Dosya",
            MessageType::System => "ℹ️ Sistem mesajı",
        }
    }

    pub fn requires_media(&self) -> bool {
        matches!(
            self,
            MessageType::Image | MessageType::Video | MessageType::Voice | MessageType::File
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "receipt_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedContent {
    #[validate(length(min = 1, max = 262144, message = "Ciphertext must not be empty"))]
    pub content: String,
    #[validate(length(min = 1, max = 256, message = "Nonce must not be empty"))]
    pub nonce: String,
    #[validate(length(min = 1, max = 64, message = "Algorithm must not be empty"))]
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[validate(url(message = "Media url must be a valid URL"))]
    pub url: String,
    #[validate(url(message = "Thumbnail must be a valid URL"))]
    pub thumbnail: Option<String>,
    pub mime_type: Option<String>,
    #[validate(range(min = 0))]
    pub size: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Seconds, for video and voice.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub user_id: Uuid,
    pub at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub sent: chrono::DateTime<chrono::Utc>,
    pub delivered: Vec<Receipt>,
    pub read: Vec<Receipt>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    GroupCreated,
    ParticipantJoined,
    ParticipantLeft,
    GroupRenamed,
    GroupUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub kind: SystemEventKind,
    pub actor_id: Uuid,
    #[serde(default)]
    pub target_ids: Vec<Uuid>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[sqlx(rename = "type")]
    pub _type: MessageType,
    pub encrypted_content: Option<String>,
    pub encrypted_nonce: Option<String>,
    pub encrypted_algorithm: Option<String>,
    pub media: Option<Json<MediaInfo>>,
    pub reply_to: Option<Uuid>,
    pub sender_public_key: Option<String>,
    pub system_event: Option<Json<SystemEvent>>,
    pub deleted_for: Vec<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReceiptRow {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub kind: ReceiptKind,
    pub at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntity {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(rename = "type")]
    pub _type: MessageType,
    pub encrypted: Option<EncryptedContent>,
    pub media: Option<MediaInfo>,
    pub reply_to: Option<Uuid>,
    pub sender_public_key: Option<String>,
    pub status: MessageStatus,
    #[serde(skip)]
    pub deleted_for: Vec<Uuid>,
    pub system_event: Option<SystemEvent>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MessageEntity {
    pub fn from_row(row: MessageRow, receipts: &[ReceiptRow]) -> Self {
        let encrypted = match (row.encrypted_content, row.encrypted_nonce, row.encrypted_algorithm)
        {
            (Some(content), Some(nonce), Some(algorithm)) => {
                Some(EncryptedContent { content, nonce, algorithm })
            }
            _ => None,
        };

        let mut delivered = Vec::new();
        let mut read = Vec::new();
        for receipt in receipts.iter().filter(|r| r.message_id == row.id) {
            let entry = Receipt { user_id: receipt.user_id, at: receipt.at };
            match receipt.kind {
                ReceiptKind::Delivered => delivered.push(entry),
                ReceiptKind::Read => read.push(entry),
            }
        }

        MessageEntity {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            _type: row._type,
            encrypted,
            media: row.media.map(|m| m.0),
            reply_to: row.reply_to,
            sender_public_key: row.sender_public_key,
            status: MessageStatus { sent: row.created_at, delivered, read },
            deleted_for: row.deleted_for,
            system_event: row.system_event.map(|e| e.0),
            created_at: row.created_at,
        }
    }

    pub fn is_hidden_for(&self, user_id: &Uuid) -> bool {
        self.deleted_for.contains(user_id)
    }
}
