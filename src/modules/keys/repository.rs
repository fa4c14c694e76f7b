use uuid::Uuid;

use crate::api::error;
use crate::modules::keys::schema::UserKeyEntity;

#[async_trait::async_trait]
pub trait KeyRepository {
    /// Active keys for `user_id`, newest first.
    async fn find_active_by_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<UserKeyEntity>, error::SystemError>;
}
