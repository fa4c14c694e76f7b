use uuid::Uuid;

use crate::api::error;
use crate::modules::settings::{model::UpdateSettings, schema::MessagingSettingsEntity};

#[async_trait::async_trait]
pub trait SettingsRepository {
    /// Returns the stored row, inserting the defaults first if there is none.
    async fn find_or_create(
        &self,
        user_id: &Uuid,
    ) -> Result<MessagingSettingsEntity, error::SystemError>;

    /// Upserts, applying only the fields present in `update`.
    async fn update(
        &self,
        user_id: &Uuid,
        update: &UpdateSettings,
    ) -> Result<MessagingSettingsEntity, error::SystemError>;
}
