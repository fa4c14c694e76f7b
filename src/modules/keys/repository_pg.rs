use uuid::Uuid;

use crate::api::error;
use crate::modules::keys::{repository::KeyRepository, schema::UserKeyEntity};

#[derive(Clone)]
pub struct KeyRepositoryPg {
    pool: sqlx::PgPool,
}

impl KeyRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KeyRepository for KeyRepositoryPg {
    async fn find_active_by_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<UserKeyEntity>, error::SystemError> {
        let keys = sqlx::query_as::<_, UserKeyEntity>(
            r#"
            SELECT user_id, key_id, public_key, algorithm, is_active, created_at
            FROM user_keys
            WHERE user_id = $1
            AND is_active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}
