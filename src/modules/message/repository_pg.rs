use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::{repository_pg::record_new_message, schema::LastMessage},
        message::{
            model::{InsertMessage, SortOrder},
            repository::MessageRepository,
            schema::{MessageEntity, MessageRow, ReceiptRow},
        },
    },
};

#[derive(Clone)]
pub struct MessageRepositoryPg {
    pool: sqlx::PgPool,
}

impl MessageRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn find_receipts(&self, message_ids: &[Uuid]) -> Result<Vec<ReceiptRow>, error::SystemError> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        let receipts = sqlx::query_as::<_, ReceiptRow>(
            "SELECT * FROM message_receipts WHERE message_id = ANY($1) ORDER BY at",
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(receipts)
    }
}

#[async_trait::async_trait]
impl MessageRepository for MessageRepositoryPg {
    async fn create(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError> {
        let encrypted = message.encrypted.as_ref();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, type, encrypted_content, encrypted_nonce,
                encrypted_algorithm, media, reply_to, sender_public_key, system_event
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message._type)
        .bind(encrypted.map(|e| e.content.as_str()))
        .bind(encrypted.map(|e| e.nonce.as_str()))
        .bind(encrypted.map(|e| e.algorithm.as_str()))
        .bind(message.media.clone().map(Json))
        .bind(message.reply_to)
        .bind(&message.sender_public_key)
        .bind(message.system_event.clone().map(Json))
        .fetch_one(tx.as_mut())
        .await?;

        let entity = MessageEntity::from_row(row, &[]);
        record_new_message(tx.as_mut(), &entity.conversation_id, &LastMessage::from(&entity)).await?;
        tx.commit().await?;

        Ok(entity)
    }

    async fn find_by_id(
        &self,
        message_id: &Uuid,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let receipts = self.find_receipts(&[row.id]).await?;
        Ok(Some(MessageEntity::from_row(row, &receipts)))
    }

    async fn find_page(
        &self,
        conversation_id: &Uuid,
        viewer_id: &Uuid,
        cursor: Option<Uuid>,
        limit: i64,
        order: SortOrder,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        // has index on (conversation_id, id DESC); v7 ids sort by creation time
        let sql = match order {
            SortOrder::Desc => {
                r#"
                SELECT *
                FROM messages
                WHERE conversation_id = $1
                AND NOT ($2 = ANY(deleted_for))
                AND ($3::uuid IS NULL OR id < $3)
                ORDER BY id DESC
                LIMIT $4
                "#
            }
            SortOrder::Asc => {
                r#"
                SELECT *
                FROM messages
                WHERE conversation_id = $1
                AND NOT ($2 = ANY(deleted_for))
                AND ($3::uuid IS NULL OR id > $3)
                ORDER BY id ASC
                LIMIT $4
                "#
            }
        };

        let rows = sqlx::query_as::<_, MessageRow>(sql)
            .bind(conversation_id)
            .bind(viewer_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let receipts = self.find_receipts(&ids).await?;

        Ok(rows.into_iter().map(|row| MessageEntity::from_row(row, &receipts)).collect())
    }

    async fn hide_for_user(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted_for = array_append(deleted_for, $2)
            WHERE id = $1
            AND NOT ($2 = ANY(deleted_for))
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_everyone(
        &self,
        message_id: &Uuid,
        sender_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1 AND sender_id = $2")
            .bind(message_id)
            .bind(sender_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_delivered(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, error::SystemError> {
        let at = sqlx::query_scalar::<_, chrono::DateTime<chrono::Utc>>(
            r#"
            INSERT INTO message_receipts (message_id, user_id, kind, at)
            SELECT m.id, $2, 'delivered', NOW()
            FROM messages m
            WHERE m.id = $1
            AND m.sender_id <> $2
            AND NOT EXISTS (
                SELECT 1
                FROM message_receipts r
                WHERE r.message_id = m.id
                AND r.user_id = $2
                AND r.kind = 'read'
            )
            ON CONFLICT (message_id, user_id, kind) DO NOTHING
            RETURNING at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(at)
    }

    async fn add_read_upto(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        upto: &Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO message_receipts (message_id, user_id, kind, at)
            SELECT m.id, $2, 'read', $4
            FROM messages m
            WHERE m.conversation_id = $1
            AND m.id <= $3
            AND m.sender_id <> $2
            AND NOT ($2 = ANY(m.deleted_for))
            ON CONFLICT (message_id, user_id, kind) DO NOTHING
            RETURNING message_id
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(upto)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::conversation::{
        model::{InsertConversation, NewParticipant},
        repository::ConversationRepository,
        repository_pg::ConversationPgRepository,
        schema::{direct_key, ConversationType, ParticipantRole},
    };
    use crate::modules::message::schema::MessageType;
    use crate::test::sample_insert;

    struct Thread {
        conversations: ConversationPgRepository,
        messages: MessageRepositoryPg,
        id: Uuid,
        a: Uuid,
        b: Uuid,
    }

    async fn thread(pool: sqlx::PgPool) -> Thread {
        let conversations = ConversationPgRepository::new(pool.clone());
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let id = conversations
            .insert(&InsertConversation {
                id: Uuid::now_v7(),
                _type: ConversationType::Direct,
                direct_key: Some(direct_key(&a, &b)),
                group: None,
                related_to: None,
                participants: vec![
                    NewParticipant { user_id: a, role: ParticipantRole::Member },
                    NewParticipant { user_id: b, role: ParticipantRole::Member },
                ],
            })
            .await
            .unwrap()
            .unwrap()
            .conversation
            .id;
        Thread { conversations, messages: MessageRepositoryPg::new(pool), id, a, b }
    }

    async fn post(t: &Thread, sender_id: Uuid) -> MessageEntity {
        t.messages.create(&sample_insert(t.id, sender_id, MessageType::Text)).await.unwrap()
    }

    async fn unread(t: &Thread, user_id: &Uuid) -> i32 {
        let detail = t.conversations.find_by_id(&t.id).await.unwrap().unwrap();
        detail.participant(user_id).map(|p| p.unread_count).unwrap_or_default()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_create_updates_conversation_in_same_transaction(pool: sqlx::PgPool) {
        let t = thread(pool).await;

        let first = post(&t, t.a).await;
        let second = post(&t, t.a).await;

        let detail = t.conversations.find_by_id(&t.id).await.unwrap().unwrap();
        assert_eq!(detail.conversation.messages_count, 2);
        assert_eq!(detail.conversation.last_message_id, Some(second.id));
        assert_ne!(first.id, second.id);
        assert_eq!(unread(&t, &t.b).await, 2);
        assert_eq!(unread(&t, &t.a).await, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_failed_insert_leaves_conversation_untouched(pool: sqlx::PgPool) {
        let t = thread(pool).await;
        let mut invalid = sample_insert(t.id, t.a, MessageType::Text);
        invalid.encrypted = None;

        assert!(t.messages.create(&invalid).await.is_err());

        let detail = t.conversations.find_by_id(&t.id).await.unwrap().unwrap();
        assert_eq!(detail.conversation.messages_count, 0);
        assert_eq!(unread(&t, &t.b).await, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_add_delivered_is_idempotent(pool: sqlx::PgPool) {
        let t = thread(pool).await;
        let message = post(&t, t.a).await;

        assert!(t.messages.add_delivered(&message.id, &t.b).await.unwrap().is_some());
        assert!(t.messages.add_delivered(&message.id, &t.b).await.unwrap().is_none());
        assert!(t.messages.add_delivered(&message.id, &t.a).await.unwrap().is_none());

        let stored = t.messages.find_by_id(&message.id).await.unwrap().unwrap();
        assert_eq!(stored.status.delivered.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_delivered_after_read_is_skipped(pool: sqlx::PgPool) {
        let t = thread(pool).await;
        let message = post(&t, t.a).await;

        t.messages.add_read_upto(&t.id, &t.b, &message.id, chrono::Utc::now()).await.unwrap();
        assert!(t.messages.add_delivered(&message.id, &t.b).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_read_upto_is_inclusive_and_skips_own_and_read(pool: sqlx::PgPool) {
        let t = thread(pool).await;
        let m1 = post(&t, t.a).await;
        let own = post(&t, t.b).await;
        let m2 = post(&t, t.a).await;
        let m3 = post(&t, t.a).await;

        let mut first = t.messages.add_read_upto(&t.id, &t.b, &m2.id, chrono::Utc::now()).await.unwrap();
        first.sort();
        assert_eq!(first, vec![m1.id, m2.id]);

        let second = t.messages.add_read_upto(&t.id, &t.b, &m3.id, chrono::Utc::now()).await.unwrap();
        assert_eq!(second, vec![m3.id]);

        let own_stored = t.messages.find_by_id(&own.id).await.unwrap().unwrap();
        assert!(own_stored.status.read.is_empty());
    }
}
