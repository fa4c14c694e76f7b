use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::api::error;
use crate::modules::message::schema::{
    EncryptedContent, MediaInfo, MessageEntity, MessageType, SystemEvent,
};

pub const DEFAULT_MESSAGE_PAGE: i64 = 30;

/// Client-supplied message envelope, shared by `message:send` and
/// `POST /conversations/:id/messages`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(rename = "type")]
    pub _type: MessageType,
    #[validate(nested)]
    pub encrypted: Option<EncryptedContent>,
    #[validate(nested)]
    pub media: Option<MediaInfo>,
    pub reply_to: Option<Uuid>,
}

impl SendMessage {
    /// Field validation plus the rules that depend on the message type.
    pub fn check(&self) -> Result<(), error::SystemError> {
        self.validate()?;

        if self._type == MessageType::System {
            return Err(error::SystemError::bad_request("type: system messages cannot be sent"));
        }
        if self.encrypted.is_none() {
            return Err(error::SystemError::bad_request("encrypted: ciphertext is required"));
        }
        if self._type.requires_media() && self.media.is_none() {
            return Err(error::SystemError::bad_request(
                "media: a media descriptor is required for this message type",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub _type: MessageType,
    pub encrypted: Option<EncryptedContent>,
    pub media: Option<MediaInfo>,
    pub reply_to: Option<Uuid>,
    pub sender_public_key: Option<String>,
    pub system_event: Option<SystemEvent>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub cursor: Option<Uuid>,
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageQuery {
    #[serde(default)]
    pub for_everyone: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageEntity>,
    pub next_cursor: Option<Uuid>,
    pub has_more: bool,
}
