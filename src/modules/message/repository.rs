use uuid::Uuid;

use crate::modules::message::model::{InsertMessage, SortOrder};
use crate::{api::error, modules::message::schema::MessageEntity};

#[async_trait::async_trait]
pub trait MessageRepository {
    /// Inserts the message and, in the same transaction, makes it the
    /// conversation's last message and bumps the other participants' unread
    /// counts.
    async fn create(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError>;

    async fn find_by_id(&self, message_id: &Uuid)
        -> Result<Option<MessageEntity>, error::SystemError>;

    /// Page of messages not hidden for `viewer_id`, fetched `limit` at a time
    /// from the exclusive id `cursor` in the given order.
    async fn find_page(
        &self,
        conversation_id: &Uuid,
        viewer_id: &Uuid,
        cursor: Option<Uuid>,
        limit: i64,
        order: SortOrder,
    ) -> Result<Vec<MessageEntity>, error::SystemError>;

    /// Appends the caller to `deleted_for` unless already present.
    async fn hide_for_user(&self, message_id: &Uuid, user_id: &Uuid)
        -> Result<bool, error::SystemError>;

    /// Hard delete, restricted to the sender.
    async fn delete_for_everyone(
        &self,
        message_id: &Uuid,
        sender_id: &Uuid,
    ) -> Result<bool, error::SystemError>;

    /// Inserts a delivered receipt unless one exists, the caller is the
    /// sender, or the caller already read the message. Returns the receipt
    /// time when a row was written.
    async fn add_delivered(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, error::SystemError>;

    /// Bulk read receipts for every other-authored, visible message with
    /// id <= `upto`; returns the ids that gained a receipt.
    async fn add_read_upto(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        upto: &Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Uuid>, error::SystemError>;
}
