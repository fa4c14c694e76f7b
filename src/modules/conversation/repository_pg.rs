use std::collections::HashMap;

use uuid::Uuid;

use crate::modules::conversation::model::{
    GroupMetaUpdate, InsertConversation, ParticipantSettingsUpdate,
};
use crate::modules::conversation::repository::ConversationRepository;
use crate::modules::conversation::schema::{
    ConversationEntity, ConversationType, ConversationWithParticipants, LastMessage,
    ParticipantEntity,
};
use crate::api::error;

/// Sets the last-message preview, bumps the counters and every other
/// participant's unread count in a single statement. Runs on the caller's
/// connection so the message insert and this update commit together.
pub async fn record_new_message(
    conn: &mut sqlx::PgConnection,
    conversation_id: &Uuid,
    last_message: &LastMessage,
) -> Result<(), error::SystemError> {
    // A recipient who hid a direct thread gets it back; group members who
    // left stay out.
    sqlx::query(
        r#"
        WITH conv AS (
            UPDATE conversations
            SET last_message_id = $2,
                last_message_sender_id = $3,
                last_message_preview = $4,
                last_message_type = $5,
                last_message_sent_at = $6,
                messages_count = messages_count + 1,
                updated_at = GREATEST(updated_at, $6)
            WHERE id = $1
            RETURNING id, type
        )
        UPDATE participants p
        SET unread_count = p.unread_count + 1,
            is_deleted = CASE WHEN conv.type = 'direct' THEN FALSE ELSE p.is_deleted END,
            deleted_at = CASE WHEN conv.type = 'direct' THEN NULL ELSE p.deleted_at END
        FROM conv
        WHERE p.conversation_id = conv.id
        AND p.user_id <> $3
        AND (p.is_deleted = FALSE OR conv.type = 'direct')
        "#,
    )
    .bind(conversation_id)
    .bind(last_message.message_id)
    .bind(last_message.sender_id)
    .bind(&last_message.preview)
    .bind(last_message._type)
    .bind(last_message.sent_at)
    .execute(conn)
    .await?;

    Ok(())
}

#[derive(Clone)]
pub struct ConversationPgRepository {
    pool: sqlx::PgPool,
}

impl ConversationPgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn attach_participants(
        &self,
        conversations: Vec<ConversationEntity>,
    ) -> Result<Vec<ConversationWithParticipants>, error::SystemError> {
        if conversations.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();

        let participants = sqlx::query_as::<_, ParticipantEntity>(
            r#"
            SELECT *
            FROM participants
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, position
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_conversation = participants.into_iter().fold(
            HashMap::<Uuid, Vec<ParticipantEntity>>::new(),
            |mut acc, participant| {
                acc.entry(participant.conversation_id).or_default().push(participant);
                acc
            },
        );

        Ok(conversations
            .into_iter()
            .map(|conversation| ConversationWithParticipants {
                participants: by_conversation.remove(&conversation.id).unwrap_or_default(),
                conversation,
            })
            .collect())
    }

    async fn attach_one(
        &self,
        conversation: Option<ConversationEntity>,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        match conversation {
            Some(c) => Ok(self.attach_participants(vec![c]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for ConversationPgRepository {
    async fn find_by_id(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let conversation =
            sqlx::query_as::<_, ConversationEntity>("SELECT * FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;

        self.attach_one(conversation).await
    }

    async fn find_by_direct_key(
        &self,
        direct_key: &str,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            "SELECT * FROM conversations WHERE direct_key = $1",
        )
        .bind(direct_key)
        .fetch_optional(&self.pool)
        .await?;

        self.attach_one(conversation).await
    }

    async fn find_by_related(
        &self,
        _type: ConversationType,
        related_type: &str,
        related_id: &str,
        user_id: &Uuid,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let conversation = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT c.*
            FROM conversations c
            WHERE c.type = $1
            AND c.related_type = $2
            AND c.related_id = $3
            AND c.status = 'active'
            AND EXISTS (
                SELECT 1
                FROM participants p
                WHERE p.conversation_id = c.id
                AND p.user_id = $4
            )
            ORDER BY c.created_at
            LIMIT 1
            "#,
        )
        .bind(_type)
        .bind(related_type)
        .bind(related_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        self.attach_one(conversation).await
    }

    async fn insert(
        &self,
        conversation: &InsertConversation,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        let group = conversation.group.as_ref();
        let related = conversation.related_to.as_ref();

        let inserted = sqlx::query_as::<_, ConversationEntity>(
            r#"
            INSERT INTO conversations (
                id, type, direct_key, group_name, group_avatar, group_description,
                related_type, related_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (direct_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(conversation.id)
        .bind(conversation._type)
        .bind(&conversation.direct_key)
        .bind(group.map(|g| g.name.as_str()))
        .bind(group.and_then(|g| g.avatar.as_deref()))
        .bind(group.and_then(|g| g.description.as_deref()))
        .bind(related.map(|r| r.kind.as_str()))
        .bind(related.map(|r| r.id.as_str()))
        .fetch_optional(tx.as_mut())
        .await?;

        let Some(inserted) = inserted else {
            // Lost the race for this direct pair; the caller re-reads the winner.
            tx.rollback().await?;
            return Ok(None);
        };

        let mut participants = Vec::with_capacity(conversation.participants.len());
        for (position, participant) in conversation.participants.iter().enumerate() {
            let entity = sqlx::query_as::<_, ParticipantEntity>(
                r#"
                INSERT INTO participants (conversation_id, user_id, position, role, joined_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(inserted.id)
            .bind(participant.user_id)
            .bind(position as i32)
            .bind(participant.role)
            .bind(inserted.created_at)
            .fetch_one(tx.as_mut())
            .await?;
            participants.push(entity);
        }

        tx.commit().await?;

        Ok(Some(ConversationWithParticipants { conversation: inserted, participants }))
    }

    async fn restore_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), error::SystemError> {
        sqlx::query(
            r#"
            UPDATE participants
            SET is_deleted = FALSE,
                deleted_at = NULL
            WHERE conversation_id = $1
            AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_for_user(
        &self,
        user_id: &Uuid,
        cursor: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        include_archived: bool,
    ) -> Result<Vec<ConversationWithParticipants>, error::SystemError> {
        let conversations = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT c.*
            FROM conversations c
            JOIN participants p
                ON p.conversation_id = c.id
            AND p.user_id = $1
            AND p.is_deleted = FALSE
            WHERE c.status = 'active'
            AND ($2::timestamptz IS NULL OR c.updated_at < $2)
            AND ($3 OR p.is_archived = FALSE)
            ORDER BY c.updated_at DESC, c.id DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(cursor)
        .bind(include_archived)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.attach_participants(conversations).await
    }

    async fn update_participant_settings(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        settings: &ParticipantSettingsUpdate,
    ) -> Result<bool, error::SystemError> {
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET is_archived = COALESCE($3, is_archived),
                is_muted = COALESCE($4, is_muted),
                muted_until = CASE
                    WHEN $5 THEN $6
                    WHEN $4 = FALSE THEN NULL
                    ELSE muted_until
                END
            WHERE conversation_id = $1
            AND user_id = $2
            AND is_deleted = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(settings.is_archived)
        .bind(settings.is_muted)
        .bind(settings.muted_until.is_some())
        .bind(settings.muted_until.flatten())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_group_meta(
        &self,
        conversation_id: &Uuid,
        meta: &GroupMetaUpdate,
    ) -> Result<(), error::SystemError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET group_name = COALESCE($2, group_name),
                group_avatar = CASE WHEN $3 THEN $4 ELSE group_avatar END,
                group_description = CASE WHEN $5 THEN $6 ELSE group_description END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(&meta.name)
        .bind(meta.avatar.is_some())
        .bind(meta.avatar.clone().flatten())
        .bind(meta.description.is_some())
        .bind(meta.description.clone().flatten())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn soft_delete_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET is_deleted = TRUE,
                deleted_at = NOW(),
                unread_count = 0
            WHERE conversation_id = $1
            AND user_id = $2
            AND is_deleted = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_unread(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        last_read_message_id: Option<Uuid>,
    ) -> Result<bool, error::SystemError> {
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET unread_count = 0,
                last_read_at = NOW(),
                last_read_message_id = COALESCE($3, last_read_message_id)
            WHERE conversation_id = $1
            AND user_id = $2
            AND is_deleted = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(last_read_message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_conversation_ids_by_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT p.conversation_id
            FROM participants p
            JOIN conversations c ON c.id = p.conversation_id
            WHERE p.user_id = $1
            AND p.is_deleted = FALSE
            AND c.status = 'active'
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn find_counterpart_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, error::SystemError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT other.user_id
            FROM participants me
            JOIN conversations c
                ON c.id = me.conversation_id
            AND c.status = 'active'
            JOIN participants other
                ON other.conversation_id = me.conversation_id
            AND other.user_id <> me.user_id
            AND other.is_deleted = FALSE
            WHERE me.user_id = $1
            AND me.is_deleted = FALSE
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
