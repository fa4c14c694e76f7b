use log::info;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::{
            model::{
                ConversationPage, ConversationQuery, ConversationView, InsertConversation,
                NewConversation, NewParticipant, UpdateConversation, DEFAULT_PAGE_SIZE,
            },
            repository::ConversationRepository,
            schema::{
                direct_key, ConversationStatus, ConversationType, ConversationWithParticipants,
                GroupInfo, ParticipantRole,
            },
        },
        message::{
            model::InsertMessage,
            repository::MessageRepository,
            schema::{MessageEntity, MessageType, SystemEvent, SystemEventKind},
        },
        websocket::{
            events::Broadcast,
            fanout::Broadcaster,
            message::{NewMessageEvent, ServerMessage},
        },
    },
};

#[derive(Clone)]
pub struct ConversationService {
    conversation_repo: Arc<dyn ConversationRepository + Send + Sync>,
    message_repo: Arc<dyn MessageRepository + Send + Sync>,
    broadcaster: Arc<dyn Broadcaster + Send + Sync>,
}

impl ConversationService {
    pub fn with_dependencies(
        conversation_repo: Arc<dyn ConversationRepository + Send + Sync>,
        message_repo: Arc<dyn MessageRepository + Send + Sync>,
        broadcaster: Arc<dyn Broadcaster + Send + Sync>,
    ) -> Self {
        info!("ConversationService initialized with dependencies");
        ConversationService { conversation_repo, message_repo, broadcaster }
    }

    pub async fn create(
        &self,
        creator_id: Uuid,
        body: NewConversation,
    ) -> Result<ConversationView, error::SystemError> {
        let mut others: Vec<Uuid> = Vec::with_capacity(body.participant_ids.len());
        for id in body.participant_ids {
            if id != creator_id && !others.contains(&id) {
                others.push(id);
            }
        }

        if others.is_empty() {
            return Err(error::SystemError::bad_request(
                "At least one other participant is required",
            ));
        }

        let detail = match body._type {
            ConversationType::Direct => self.create_direct(creator_id, &others).await?,
            ConversationType::Group => {
                let group = body.group.ok_or_else(|| {
                    error::SystemError::bad_request("Group conversations require a name")
                })?;
                let insert = InsertConversation {
                    id: Uuid::now_v7(),
                    _type: ConversationType::Group,
                    direct_key: None,
                    group: Some(GroupInfo {
                        name: group.name,
                        avatar: group.avatar,
                        description: group.description,
                    }),
                    related_to: None,
                    participants: participants_for(creator_id, &others, ParticipantRole::Admin),
                };
                self.insert_new(&insert).await?
            }
            ConversationType::Listing | ConversationType::DatingMatch => {
                let related = body.related_to.ok_or_else(|| {
                    error::SystemError::bad_request(
                        "Listing and dating match conversations require relatedTo",
                    )
                })?;

                if let Some(existing) = self
                    .conversation_repo
                    .find_by_related(body._type, &related.kind, &related.id, &creator_id)
                    .await?
                {
                    return self.reuse_existing(existing, creator_id).await;
                }

                let insert = InsertConversation {
                    id: Uuid::now_v7(),
                    _type: body._type,
                    direct_key: None,
                    group: None,
                    related_to: Some(related),
                    participants: participants_for(creator_id, &others, ParticipantRole::Member),
                };
                self.insert_new(&insert).await?
            }
        };

        ConversationView::for_user(&detail, &creator_id)
            .ok_or_else(|| error::SystemError::forbidden("Not a participant of this conversation"))
    }

    async fn create_direct(
        &self,
        creator_id: Uuid,
        others: &[Uuid],
    ) -> Result<ConversationWithParticipants, error::SystemError> {
        let [other_id] = others else {
            return Err(error::SystemError::bad_request(
                "Direct conversations take exactly one other participant",
            ));
        };

        let key = direct_key(&creator_id, other_id);
        if let Some(existing) = self.conversation_repo.find_by_direct_key(&key).await? {
            return self.restore_for(existing, creator_id).await;
        }

        let insert = InsertConversation {
            id: Uuid::now_v7(),
            _type: ConversationType::Direct,
            direct_key: Some(key.clone()),
            group: None,
            related_to: None,
            participants: participants_for(creator_id, others, ParticipantRole::Member),
        };

        match self.conversation_repo.insert(&insert).await? {
            Some(created) => {
                self.announce_created(&created).await;
                Ok(created)
            }
            None => {
                // Another request created the pair first.
                let existing = self
                    .conversation_repo
                    .find_by_direct_key(&key)
                    .await?
                    .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;
                self.restore_for(existing, creator_id).await
            }
        }
    }

    async fn restore_for(
        &self,
        existing: ConversationWithParticipants,
        user_id: Uuid,
    ) -> Result<ConversationWithParticipants, error::SystemError> {
        let hidden = existing.participant(&user_id).is_some_and(|p| p.is_deleted);
        if !hidden {
            return Ok(existing);
        }

        let conversation_id = existing.conversation.id;
        self.conversation_repo.restore_participant(&conversation_id, &user_id).await?;
        info!("User {} restored conversation {}", user_id, conversation_id);

        self.broadcaster
            .broadcast(Broadcast::JoinRoom { user_ids: vec![user_id], conversation_id })
            .await;

        self.conversation_repo
            .find_by_id(&conversation_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))
    }

    async fn reuse_existing(
        &self,
        existing: ConversationWithParticipants,
        user_id: Uuid,
    ) -> Result<ConversationView, error::SystemError> {
        let detail = self.restore_for(existing, user_id).await?;
        ConversationView::for_user(&detail, &user_id)
            .ok_or_else(|| error::SystemError::forbidden("Not a participant of this conversation"))
    }

    async fn insert_new(
        &self,
        insert: &InsertConversation,
    ) -> Result<ConversationWithParticipants, error::SystemError> {
        let created = self
            .conversation_repo
            .insert(insert)
            .await?
            .ok_or_else(|| error::SystemError::Conflict(None))?;

        self.announce_created(&created).await;

        if created.conversation._type == ConversationType::Group {
            let creator_id = insert.participants[0].user_id;
            let others = created.other_active_ids(&creator_id);
            self.append_system_message(
                created.conversation.id,
                creator_id,
                SystemEventKind::GroupCreated,
                others,
                created.conversation.group_name.clone(),
            )
            .await?;

            // Re-read so the returned view carries the system message preview.
            return self
                .conversation_repo
                .find_by_id(&created.conversation.id)
                .await?
                .ok_or_else(|| error::SystemError::not_found("Conversation not found"));
        }

        Ok(created)
    }

    /// Joins every participant's live connections, on any instance, to the
    /// new conversation's room.
    async fn announce_created(&self, created: &ConversationWithParticipants) {
        let user_ids = created.participants.iter().map(|p| p.user_id).collect();
        info!(
            "Conversation {} ({:?}) created",
            created.conversation.id, created.conversation._type
        );
        self.broadcaster
            .broadcast(Broadcast::JoinRoom { user_ids, conversation_id: created.conversation.id })
            .await;
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        query: ConversationQuery,
    ) -> Result<ConversationPage, error::SystemError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);

        let mut rows = self
            .conversation_repo
            .find_for_user(&user_id, query.cursor, limit + 1, query.include_archived.unwrap_or(false))
            .await?;

        let has_more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);

        let next_cursor = if has_more { rows.last().map(|c| c.conversation.updated_at) } else { None };

        let conversations =
            rows.iter().filter_map(|detail| ConversationView::for_user(detail, &user_id)).collect();

        Ok(ConversationPage { conversations, next_cursor, has_more })
    }

    pub async fn get_for_user(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<ConversationView, error::SystemError> {
        let detail = self.validate_participant(&conversation_id, &user_id).await?;
        ConversationView::for_user(&detail, &user_id)
            .ok_or_else(|| error::SystemError::forbidden("Not a participant of this conversation"))
    }

    pub async fn update(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        body: UpdateConversation,
    ) -> Result<ConversationView, error::SystemError> {
        let settings = body.participant_settings();
        let meta = body.group_meta();
        if settings.is_none() && meta.is_none() {
            return Err(error::SystemError::bad_request("No fields to update"));
        }

        let detail = self.validate_participant(&conversation_id, &user_id).await?;

        if let Some(meta) = meta {
            if detail.conversation._type != ConversationType::Group {
                return Err(error::SystemError::forbidden(
                    "Only group conversations have editable details",
                ));
            }
            let is_admin =
                detail.active_participant(&user_id).is_some_and(|p| p.role == ParticipantRole::Admin);
            if !is_admin {
                return Err(error::SystemError::forbidden("Only group admins can edit details"));
            }

            let current = &detail.conversation;
            let renamed = meta.name.as_ref().filter(|name| current.group_name.as_ref() != Some(*name));
            let touched = meta.avatar.as_ref().is_some_and(|a| a != &current.group_avatar)
                || meta.description.as_ref().is_some_and(|d| d != &current.group_description);

            if renamed.is_some() || touched {
                self.conversation_repo.update_group_meta(&conversation_id, &meta).await?;

                let (kind, value) = match renamed {
                    Some(name) => (SystemEventKind::GroupRenamed, Some(name.clone())),
                    None => (SystemEventKind::GroupUpdated, None),
                };
                self.append_system_message(conversation_id, user_id, kind, vec![], value).await?;

                self.broadcaster
                    .broadcast(Broadcast::room(
                        conversation_id,
                        ServerMessage::ConversationUpdated { conversation_id },
                    ))
                    .await;
            }
        }

        if let Some(settings) = settings {
            self.conversation_repo
                .update_participant_settings(&conversation_id, &user_id, &settings)
                .await?;
        }

        self.get_for_user(conversation_id, user_id).await
    }

    pub async fn delete_for_user(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), error::SystemError> {
        self.validate_participant(&conversation_id, &user_id).await?;

        let deleted = self.conversation_repo.soft_delete_participant(&conversation_id, &user_id).await?;
        if !deleted {
            return Err(error::SystemError::not_found("Conversation not found"));
        }

        info!("User {} deleted conversation {} for themselves", user_id, conversation_id);
        Ok(())
    }

    pub async fn reset_unread(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        last_read_message_id: Option<Uuid>,
    ) -> Result<(), error::SystemError> {
        self.conversation_repo.reset_unread(conversation_id, user_id, last_read_message_id).await?;
        Ok(())
    }

    /// Not-found for a missing or deleted conversation, forbidden when the
    /// caller has no active participant record.
    pub async fn validate_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<ConversationWithParticipants, error::SystemError> {
        let detail = self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .filter(|d| d.conversation.status == ConversationStatus::Active)
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        if detail.active_participant(user_id).is_none() {
            return Err(error::SystemError::forbidden("Not a participant of this conversation"));
        }

        Ok(detail)
    }

    pub async fn conversation_ids_for_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        self.conversation_repo.find_conversation_ids_by_user(user_id).await
    }

    pub async fn counterpart_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, error::SystemError> {
        self.conversation_repo.find_counterpart_ids(user_id).await
    }

    async fn append_system_message(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        kind: SystemEventKind,
        target_ids: Vec<Uuid>,
        value: Option<String>,
    ) -> Result<MessageEntity, error::SystemError> {
        let message = self
            .message_repo
            .create(&InsertMessage {
                id: Uuid::now_v7(),
                conversation_id,
                sender_id: actor_id,
                _type: MessageType::System,
                encrypted: None,
                media: None,
                reply_to: None,
                sender_public_key: None,
                system_event: Some(SystemEvent { kind, actor_id, target_ids, value }),
            })
            .await?;

        self.broadcaster
            .broadcast(Broadcast::room(
                conversation_id,
                ServerMessage::MessageNew(NewMessageEvent::from(&message)),
            ))
            .await;

        Ok(message)
    }
}

fn participants_for(creator_id: Uuid, others: &[Uuid], creator_role: ParticipantRole) -> Vec<NewParticipant> {
    std::iter::once(NewParticipant { user_id: creator_id, role: creator_role })
        .chain(others.iter().map(|id| NewParticipant { user_id: *id, role: ParticipantRole::Member }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::conversation::model::GroupMetaInput;
    use crate::modules::conversation::schema::RelatedEntity;
    use crate::test::{
        MemoryConversationRepository, MemoryMessageRepository, RecordingBroadcaster,
    };

    struct Fixture {
        svc: ConversationService,
        messages: Arc<MemoryMessageRepository>,
        broadcaster: Arc<RecordingBroadcaster>,
    }

    fn fixture() -> Fixture {
        let conversations = Arc::new(MemoryConversationRepository::default());
        let messages = Arc::new(MemoryMessageRepository::linked(conversations.clone()));
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let svc = ConversationService::with_dependencies(
            conversations,
            messages.clone(),
            broadcaster.clone(),
        );
        Fixture { svc, messages, broadcaster }
    }

    fn direct_with(other: Uuid) -> NewConversation {
        NewConversation {
            _type: ConversationType::Direct,
            participant_ids: vec![other],
            group: None,
            related_to: None,
        }
    }

    #[tokio::test]
    async fn test_direct_creation_is_idempotent_per_pair() {
        let f = fixture();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());

        let first = f.svc.create(a, direct_with(b)).await.unwrap();
        let second = f.svc.create(a, direct_with(b)).await.unwrap();
        let reverse = f.svc.create(b, direct_with(a)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, reverse.id);
        assert_eq!(f.svc.list_for_user(a, query()).await.unwrap().conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_creation_restores_soft_deleted_thread() {
        let f = fixture();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());

        let created = f.svc.create(a, direct_with(b)).await.unwrap();
        f.svc.delete_for_user(created.id, a).await.unwrap();
        assert!(f.svc.list_for_user(a, query()).await.unwrap().conversations.is_empty());

        let restored = f.svc.create(a, direct_with(b)).await.unwrap();
        assert_eq!(restored.id, created.id);
        assert_eq!(f.svc.list_for_user(a, query()).await.unwrap().conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_direct_requires_exactly_one_other() {
        let f = fixture();
        let a = Uuid::now_v7();

        let with_self = f.svc.create(a, direct_with(a)).await;
        assert!(matches!(with_self, Err(error::SystemError::BadRequest(_))));

        let mut body = direct_with(Uuid::now_v7());
        body.participant_ids.push(Uuid::now_v7());
        assert!(f.svc.create(a, body).await.is_err());
    }

    #[tokio::test]
    async fn test_group_creation_appends_system_message_and_joins_rooms() {
        let f = fixture();
        let (admin, member) = (Uuid::now_v7(), Uuid::now_v7());

        let view = f
            .svc
            .create(
                admin,
                NewConversation {
                    _type: ConversationType::Group,
                    participant_ids: vec![member],
                    group: Some(GroupMetaInput {
                        name: "Weekend".into(),
                        avatar: None,
                        description: None,
                    }),
                    related_to: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(view.group.as_ref().map(|g| g.name.as_str()), Some("Weekend"));
        assert_eq!(view.last_message.as_ref().map(|m| m._type), Some(MessageType::System));

        let system = f.messages.all();
        assert_eq!(system.len(), 1);
        assert_eq!(
            system[0].system_event.as_ref().map(|e| e.kind),
            Some(SystemEventKind::GroupCreated)
        );

        let joined = f.broadcaster.recorded().into_iter().any(|b| {
            matches!(b, Broadcast::JoinRoom { user_ids, conversation_id }
                if conversation_id == view.id && user_ids.contains(&member))
        });
        assert!(joined);

        let member_view = f.svc.get_for_user(view.id, member).await.unwrap();
        assert_eq!(member_view.unread_count, 1);
    }

    #[tokio::test]
    async fn test_group_requires_name() {
        let f = fixture();
        let body = NewConversation {
            _type: ConversationType::Group,
            participant_ids: vec![Uuid::now_v7()],
            group: None,
            related_to: None,
        };
        assert!(f.svc.create(Uuid::now_v7(), body).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_conversation_is_reused_for_same_entity() {
        let f = fixture();
        let (buyer, seller) = (Uuid::now_v7(), Uuid::now_v7());
        let body = || NewConversation {
            _type: ConversationType::Listing,
            participant_ids: vec![seller],
            group: None,
            related_to: Some(RelatedEntity { kind: "listing".into(), id: "lst_42".into() }),
        };

        let first = f.svc.create(buyer, body()).await.unwrap();
        let second = f.svc.create(buyer, body()).await.unwrap();
        assert_eq!(first.id, second.id);

        let missing = NewConversation { related_to: None, ..body() };
        assert!(f.svc.create(buyer, missing).await.is_err());
    }

    #[tokio::test]
    async fn test_only_group_admins_edit_details() {
        let f = fixture();
        let (admin, member) = (Uuid::now_v7(), Uuid::now_v7());
        let group = f
            .svc
            .create(
                admin,
                NewConversation {
                    _type: ConversationType::Group,
                    participant_ids: vec![member],
                    group: Some(GroupMetaInput { name: "Old".into(), avatar: None, description: None }),
                    related_to: None,
                },
            )
            .await
            .unwrap();

        let rename = || UpdateConversation { name: Some("New".into()), ..Default::default() };

        let denied = f.svc.update(group.id, member, rename()).await;
        assert!(matches!(denied, Err(error::SystemError::Forbidden(_))));

        let renamed = f.svc.update(group.id, admin, rename()).await.unwrap();
        assert_eq!(renamed.group.map(|g| g.name), Some("New".to_string()));

        let updated = f.broadcaster.recorded().into_iter().any(|b| {
            matches!(b, Broadcast::Room { message: ServerMessage::ConversationUpdated { .. }, .. })
        });
        assert!(updated);
    }

    #[tokio::test]
    async fn test_unchanged_group_name_appends_nothing() {
        let f = fixture();
        let (admin, member) = (Uuid::now_v7(), Uuid::now_v7());
        let group = f
            .svc
            .create(
                admin,
                NewConversation {
                    _type: ConversationType::Group,
                    participant_ids: vec![member],
                    group: Some(GroupMetaInput { name: "Same".into(), avatar: None, description: None }),
                    related_to: None,
                },
            )
            .await
            .unwrap();

        let same = UpdateConversation { name: Some("Same".into()), ..Default::default() };
        f.svc.update(group.id, admin, same).await.unwrap();
        assert_eq!(f.messages.all().len(), 1);

        let with_avatar = UpdateConversation {
            name: Some("Same".into()),
            avatar: Some(Some("https://cdn.example.com/a.png".into())),
            ..Default::default()
        };
        f.svc.update(group.id, admin, with_avatar).await.unwrap();

        let kinds: Vec<SystemEventKind> =
            f.messages.all().iter().filter_map(|m| m.system_event.as_ref().map(|e| e.kind)).collect();
        assert_eq!(kinds, vec![SystemEventKind::GroupCreated, SystemEventKind::GroupUpdated]);
    }

    #[tokio::test]
    async fn test_group_meta_on_direct_is_forbidden() {
        let f = fixture();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let direct = f.svc.create(a, direct_with(b)).await.unwrap();

        let body = UpdateConversation { name: Some("x".into()), ..Default::default() };
        let result = f.svc.update(direct.id, a, body).await;
        assert!(matches!(result, Err(error::SystemError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_archive_and_mute_are_per_participant() {
        let f = fixture();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let direct = f.svc.create(a, direct_with(b)).await.unwrap();

        let body = UpdateConversation {
            is_archived: Some(true),
            is_muted: Some(true),
            ..Default::default()
        };
        let mine = f.svc.update(direct.id, a, body).await.unwrap();
        assert!(mine.is_archived && mine.is_muted);

        let theirs = f.svc.get_for_user(direct.id, b).await.unwrap();
        assert!(!theirs.is_archived && !theirs.is_muted);

        assert!(f.svc.list_for_user(a, query()).await.unwrap().conversations.is_empty());
        let with_archived = ConversationQuery { include_archived: Some(true), ..query() };
        assert_eq!(f.svc.list_for_user(a, with_archived).await.unwrap().conversations.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_participant_distinguishes_missing_and_foreign() {
        let f = fixture();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let direct = f.svc.create(a, direct_with(b)).await.unwrap();

        let missing = f.svc.validate_participant(&Uuid::now_v7(), &a).await;
        assert!(matches!(missing, Err(error::SystemError::NotFound(_))));

        let stranger = f.svc.validate_participant(&direct.id, &Uuid::now_v7()).await;
        assert!(matches!(stranger, Err(error::SystemError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_list_paginates_by_updated_at() {
        let f = fixture();
        let me = Uuid::now_v7();
        for _ in 0..3 {
            f.svc.create(me, direct_with(Uuid::now_v7())).await.unwrap();
        }

        let first = f
            .svc
            .list_for_user(me, ConversationQuery { limit: Some(2), ..query() })
            .await
            .unwrap();
        assert_eq!(first.conversations.len(), 2);
        assert!(first.has_more);

        let rest = f
            .svc
            .list_for_user(
                me,
                ConversationQuery { cursor: first.next_cursor, limit: Some(2), ..query() },
            )
            .await
            .unwrap();
        assert_eq!(rest.conversations.len(), 1);
        assert!(!rest.has_more);
    }

    fn query() -> ConversationQuery {
        ConversationQuery { cursor: None, limit: None, include_archived: None }
    }
}
