use uuid::Uuid;

use crate::{
    api::error,
    modules::conversation::{
        model::{GroupMetaUpdate, InsertConversation, ParticipantSettingsUpdate},
        schema::{ConversationType, ConversationWithParticipants},
    },
};

#[async_trait::async_trait]
pub trait ConversationRepository {
    async fn find_by_id(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError>;

    /// Looks up a direct thread by its sorted-pair key, whatever the
    /// participants' deletion state.
    async fn find_by_direct_key(
        &self,
        direct_key: &str,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError>;

    async fn find_by_related(
        &self,
        _type: ConversationType,
        related_type: &str,
        related_id: &str,
        user_id: &Uuid,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError>;

    /// Returns `None` when a direct thread for the same pair was inserted
    /// concurrently.
    async fn insert(
        &self,
        conversation: &InsertConversation,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError>;

    async fn restore_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), error::SystemError>;

    /// Newest `updated_at` first; `cursor` is an exclusive upper bound.
    async fn find_for_user(
        &self,
        user_id: &Uuid,
        cursor: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        include_archived: bool,
    ) -> Result<Vec<ConversationWithParticipants>, error::SystemError>;

    async fn update_participant_settings(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        settings: &ParticipantSettingsUpdate,
    ) -> Result<bool, error::SystemError>;

    async fn update_group_meta(
        &self,
        conversation_id: &Uuid,
        meta: &GroupMetaUpdate,
    ) -> Result<(), error::SystemError>;

    async fn soft_delete_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError>;

    async fn reset_unread(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        last_read_message_id: Option<Uuid>,
    ) -> Result<bool, error::SystemError>;

    async fn find_conversation_ids_by_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError>;

    /// Distinct users sharing at least one active conversation with `user_id`.
    async fn find_counterpart_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, error::SystemError>;
}
