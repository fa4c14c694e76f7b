use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::modules::settings::schema::{MediaAutoDownload, WhoCanMessage};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    pub read_receipts: Option<bool>,
    pub typing_indicators: Option<bool>,
    pub online_status: Option<bool>,
    pub notification_previews: Option<bool>,
    pub who_can_message: Option<WhoCanMessage>,
    pub media_auto_download: Option<MediaAutoDownload>,
    /// Replaces the stored list wholesale.
    #[validate(length(max = 1000, message = "At most 1000 blocked users"))]
    pub blocked_users: Option<Vec<Uuid>>,
}

impl UpdateSettings {
    pub fn is_empty(&self) -> bool {
        self.read_receipts.is_none()
            && self.typing_indicators.is_none()
            && self.online_status.is_none()
            && self.notification_previews.is_none()
            && self.who_can_message.is_none()
            && self.media_auto_download.is_none()
            && self.blocked_users.is_none()
    }
}
