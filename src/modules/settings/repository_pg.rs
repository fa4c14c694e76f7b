use uuid::Uuid;

use crate::api::error;
use crate::modules::settings::{
    model::UpdateSettings, repository::SettingsRepository, schema::MessagingSettingsEntity,
};

#[derive(Clone)]
pub struct SettingsRepositoryPg {
    pool: sqlx::PgPool,
}

impl SettingsRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SettingsRepository for SettingsRepositoryPg {
    async fn find_or_create(
        &self,
        user_id: &Uuid,
    ) -> Result<MessagingSettingsEntity, error::SystemError> {
        let settings = sqlx::query_as::<_, MessagingSettingsEntity>(
            r#"
            WITH inserted AS (
                INSERT INTO messaging_settings (user_id)
                VALUES ($1)
                ON CONFLICT (user_id) DO NOTHING
                RETURNING *
            )
            SELECT * FROM inserted
            UNION ALL
            SELECT * FROM messaging_settings WHERE user_id = $1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(settings)
    }

    async fn update(
        &self,
        user_id: &Uuid,
        update: &UpdateSettings,
    ) -> Result<MessagingSettingsEntity, error::SystemError> {
        let settings = sqlx::query_as::<_, MessagingSettingsEntity>(
            r#"
            INSERT INTO messaging_settings (
                user_id, read_receipts, typing_indicators, online_status,
                notification_previews, who_can_message, media_auto_download, blocked_users
            )
            VALUES (
                $1,
                COALESCE($2, TRUE),
                COALESCE($3, TRUE),
                COALESCE($4, TRUE),
                COALESCE($5, TRUE),
                COALESCE($6, 'everyone'::who_can_message),
                COALESCE($7, 'wifi'::media_auto_download),
                COALESCE($8, ARRAY[]::uuid[])
            )
            ON CONFLICT (user_id) DO UPDATE
            SET read_receipts = COALESCE($2, messaging_settings.read_receipts),
                typing_indicators = COALESCE($3, messaging_settings.typing_indicators),
                online_status = COALESCE($4, messaging_settings.online_status),
                notification_previews = COALESCE($5, messaging_settings.notification_previews),
                who_can_message = COALESCE($6, messaging_settings.who_can_message),
                media_auto_download = COALESCE($7, messaging_settings.media_auto_download),
                blocked_users = COALESCE($8, messaging_settings.blocked_users),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(update.read_receipts)
        .bind(update.typing_indicators)
        .bind(update.online_status)
        .bind(update.notification_previews)
        .bind(update.who_can_message)
        .bind(update.media_auto_download)
        .bind(&update.blocked_users)
        .fetch_one(&self.pool)
        .await?;

        Ok(settings)
    }
}
