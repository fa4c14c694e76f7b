//! In-memory stand-ins for Postgres, Redis and the fanout, shared by the
//! unit tests.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::api::error;
use crate::configs::{EventPublisher, KeyValueStore, RealtimeConfig};
use crate::modules::conversation::model::{
    GroupMetaUpdate, InsertConversation, ParticipantSettingsUpdate,
};
use crate::modules::conversation::repository::ConversationRepository;
use crate::modules::conversation::schema::{
    ConversationEntity, ConversationStatus, ConversationType, ConversationWithParticipants,
    LastMessage, ParticipantEntity,
};
use crate::modules::conversation::service::ConversationService;
use crate::modules::delivery::service::DeliveryService;
use crate::modules::keys::repository::KeyRepository;
use crate::modules::keys::schema::UserKeyEntity;
use crate::modules::message::model::{InsertMessage, SortOrder};
use crate::modules::message::repository::MessageRepository;
use crate::modules::message::schema::{
    EncryptedContent, MediaInfo, MessageEntity, MessageRow, MessageType, ReceiptKind, ReceiptRow,
};
use crate::modules::message::service::MessageService;
use crate::modules::settings::model::UpdateSettings;
use crate::modules::settings::repository::SettingsRepository;
use crate::modules::settings::schema::MessagingSettingsEntity;
use crate::modules::settings::service::SettingsService;
use crate::modules::websocket::events::Broadcast;
use crate::modules::websocket::fanout::Broadcaster;
use crate::modules::websocket::gateway::GatewayService;
use crate::modules::websocket::notifier::OfflineNotifier;
use crate::modules::websocket::presence::PresenceTracker;
use crate::modules::websocket::typing::TypingTracker;
use crate::utils::{Claims, TypeClaims};

// ---------------------------------------------------------------------------
// Key-value store and publisher

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// TTL-aware store on tokio's clock, so paused-time tests can expire keys.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    fn live(&self, key: &str) -> Option<StoredValue> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_live() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: StoredValue, ttl: Option<u64>) {
        let expires_at = ttl.map(|secs| Instant::now() + Duration::from_secs(secs));
        self.entries.lock().unwrap().insert(key.to_string(), StoredEntry { value, expires_at });
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), error::SystemError> {
        self.put(key, StoredValue::Str(value.to_string()), None);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), error::SystemError> {
        self.put(key, StoredValue::Str(value.to_string()), Some(ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, error::SystemError> {
        Ok(match self.live(key) {
            Some(StoredValue::Str(value)) => Some(value),
            _ => None,
        })
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, error::SystemError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn exists(&self, key: &str) -> Result<bool, error::SystemError> {
        Ok(self.live(key).is_some())
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, error::SystemError> {
        Ok(keys.iter().map(|key| self.live(key).is_some()).collect())
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, error::SystemError> {
        let Some(value) = self.live(key) else {
            return Ok(false);
        };
        self.put(key, value, Some(ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), error::SystemError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn set_hash_ex(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: u64,
    ) -> Result<(), error::SystemError> {
        let hash = fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        self.put(key, StoredValue::Hash(hash), Some(ttl));
        Ok(())
    }

    async fn delete_hash_if_field_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> Result<bool, error::SystemError> {
        let matches = match self.live(key) {
            Some(StoredValue::Hash(hash)) => hash.get(field).map(String::as_str) == Some(expected),
            _ => false,
        };
        if matches {
            self.entries.lock().unwrap().remove(key);
        }
        Ok(matches)
    }
}

#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryPublisher {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), error::SystemError> {
        self.published.lock().unwrap().push((channel.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    recorded: Mutex<Vec<Broadcast>>,
}

impl RecordingBroadcaster {
    pub fn recorded(&self) -> Vec<Broadcast> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast(&self, broadcast: Broadcast) {
        self.recorded.lock().unwrap().push(broadcast);
    }
}

// ---------------------------------------------------------------------------
// Repositories

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<Uuid, ConversationWithParticipants>,
    direct_keys: HashMap<String, Uuid>,
    last_tick: Option<chrono::DateTime<chrono::Utc>>,
}

impl ConversationState {
    /// Strictly increasing timestamps so `updated_at` cursors never tie.
    fn tick(&mut self) -> chrono::DateTime<chrono::Utc> {
        let now = chrono::Utc::now();
        let next = match self.last_tick {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_tick = Some(next);
        next
    }
}

#[derive(Default)]
pub struct MemoryConversationRepository {
    state: Mutex<ConversationState>,
}

impl MemoryConversationRepository {
    /// Mirrors the bookkeeping the Postgres message insert does in its
    /// transaction.
    pub fn record_new_message(
        &self,
        conversation_id: &Uuid,
        last_message: &LastMessage,
    ) {
        let mut state = self.state.lock().unwrap();
        let Some(detail) = state.conversations.get_mut(conversation_id) else {
            return;
        };

        let c = &mut detail.conversation;
        c.last_message_id = Some(last_message.message_id);
        c.last_message_sender_id = Some(last_message.sender_id);
        c.last_message_preview = Some(last_message.preview.clone());
        c.last_message_type = Some(last_message._type);
        c.last_message_sent_at = Some(last_message.sent_at);
        c.messages_count += 1;
        c.updated_at = c.updated_at.max(last_message.sent_at);

        let direct = c._type == ConversationType::Direct;
        for p in detail.participants.iter_mut() {
            if p.user_id == last_message.sender_id || (p.is_deleted && !direct) {
                continue;
            }
            p.unread_count += 1;
            if direct {
                p.is_deleted = false;
                p.deleted_at = None;
            }
        }
    }
}

fn is_active_member(detail: &ConversationWithParticipants, user_id: &Uuid) -> bool {
    detail.conversation.status == ConversationStatus::Active
        && detail.active_participant(user_id).is_some()
}

#[async_trait::async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn find_by_id(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        Ok(self.state.lock().unwrap().conversations.get(conversation_id).cloned())
    }

    async fn find_by_direct_key(
        &self,
        direct_key: &str,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let state = self.state.lock().unwrap();
        Ok(state.direct_keys.get(direct_key).and_then(|id| state.conversations.get(id)).cloned())
    }

    async fn find_by_related(
        &self,
        _type: ConversationType,
        related_type: &str,
        related_id: &str,
        user_id: &Uuid,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .conversations
            .values()
            .find(|c| {
                c.conversation._type == _type
                    && c.conversation.status == ConversationStatus::Active
                    && c.conversation.related_type.as_deref() == Some(related_type)
                    && c.conversation.related_id.as_deref() == Some(related_id)
                    && c.participant(user_id).is_some()
            })
            .cloned())
    }

    async fn insert(
        &self,
        conversation: &InsertConversation,
    ) -> Result<Option<ConversationWithParticipants>, error::SystemError> {
        let mut state = self.state.lock().unwrap();

        if let Some(key) = &conversation.direct_key {
            if state.direct_keys.contains_key(key) {
                return Ok(None);
            }
            state.direct_keys.insert(key.clone(), conversation.id);
        }

        let now = state.tick();
        let group = conversation.group.as_ref();
        let related = conversation.related_to.as_ref();
        let entity = ConversationEntity {
            id: conversation.id,
            _type: conversation._type,
            group_name: group.map(|g| g.name.clone()),
            group_avatar: group.and_then(|g| g.avatar.clone()),
            group_description: group.and_then(|g| g.description.clone()),
            related_type: related.map(|r| r.kind.clone()),
            related_id: related.map(|r| r.id.clone()),
            last_message_id: None,
            last_message_sender_id: None,
            last_message_preview: None,
            last_message_type: None,
            last_message_sent_at: None,
            messages_count: 0,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let participants = conversation
            .participants
            .iter()
            .enumerate()
            .map(|(position, p)| ParticipantEntity {
                conversation_id: conversation.id,
                user_id: p.user_id,
                position: position as i32,
                role: p.role,
                joined_at: now,
                last_read_at: None,
                last_read_message_id: None,
                unread_count: 0,
                is_archived: false,
                is_muted: false,
                muted_until: None,
                is_deleted: false,
                deleted_at: None,
            })
            .collect();

        let detail = ConversationWithParticipants { conversation: entity, participants };
        state.conversations.insert(conversation.id, detail.clone());
        Ok(Some(detail))
    }

    async fn restore_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), error::SystemError> {
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = state.conversations.get_mut(conversation_id) {
            for p in detail.participants.iter_mut().filter(|p| &p.user_id == user_id) {
                p.is_deleted = false;
                p.deleted_at = None;
            }
        }
        Ok(())
    }

    async fn find_for_user(
        &self,
        user_id: &Uuid,
        cursor: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        include_archived: bool,
    ) -> Result<Vec<ConversationWithParticipants>, error::SystemError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<ConversationWithParticipants> = state
            .conversations
            .values()
            .filter(|c| is_active_member(c, user_id))
            .filter(|c| {
                include_archived || c.participant(user_id).is_some_and(|p| !p.is_archived)
            })
            .filter(|c| cursor.is_none_or(|cursor| c.conversation.updated_at < cursor))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            b.conversation
                .updated_at
                .cmp(&a.conversation.updated_at)
                .then(b.conversation.id.cmp(&a.conversation.id))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn update_participant_settings(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        settings: &ParticipantSettingsUpdate,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state
            .conversations
            .get_mut(conversation_id)
            .and_then(|c| c.participants.iter_mut().find(|p| &p.user_id == user_id && !p.is_deleted))
        else {
            return Ok(false);
        };

        if let Some(archived) = settings.is_archived {
            p.is_archived = archived;
        }
        if let Some(muted) = settings.is_muted {
            p.is_muted = muted;
        }
        match settings.muted_until {
            Some(until) => p.muted_until = until,
            None if settings.is_muted == Some(false) => p.muted_until = None,
            None => {}
        }
        Ok(true)
    }

    async fn update_group_meta(
        &self,
        conversation_id: &Uuid,
        meta: &GroupMetaUpdate,
    ) -> Result<(), error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let now = state.tick();
        if let Some(detail) = state.conversations.get_mut(conversation_id) {
            let c = &mut detail.conversation;
            if let Some(name) = &meta.name {
                c.group_name = Some(name.clone());
            }
            if let Some(avatar) = &meta.avatar {
                c.group_avatar = avatar.clone();
            }
            if let Some(description) = &meta.description {
                c.group_description = description.clone();
            }
            c.updated_at = now;
        }
        Ok(())
    }

    async fn soft_delete_participant(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state
            .conversations
            .get_mut(conversation_id)
            .and_then(|c| c.participants.iter_mut().find(|p| &p.user_id == user_id && !p.is_deleted))
        else {
            return Ok(false);
        };
        p.is_deleted = true;
        p.deleted_at = Some(chrono::Utc::now());
        p.unread_count = 0;
        Ok(true)
    }

    async fn reset_unread(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        last_read_message_id: Option<Uuid>,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let Some(p) = state
            .conversations
            .get_mut(conversation_id)
            .and_then(|c| c.participants.iter_mut().find(|p| &p.user_id == user_id && !p.is_deleted))
        else {
            return Ok(false);
        };
        p.unread_count = 0;
        p.last_read_at = Some(chrono::Utc::now());
        if last_read_message_id.is_some() {
            p.last_read_message_id = last_read_message_id;
        }
        Ok(true)
    }

    async fn find_conversation_ids_by_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .conversations
            .values()
            .filter(|c| is_active_member(c, user_id))
            .map(|c| c.conversation.id)
            .collect())
    }

    async fn find_counterpart_ids(&self, user_id: &Uuid) -> Result<Vec<Uuid>, error::SystemError> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<Uuid> = state
            .conversations
            .values()
            .filter(|c| is_active_member(c, user_id))
            .flat_map(|c| c.other_active_ids(user_id))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[derive(Default)]
struct MessageState {
    rows: Vec<MessageRow>,
    receipts: Vec<ReceiptRow>,
}

impl MessageState {
    fn entity(&self, row: &MessageRow) -> MessageEntity {
        MessageEntity::from_row(row.clone(), &self.receipts)
    }

    fn has_receipt(&self, message_id: &Uuid, user_id: &Uuid, kind: ReceiptKind) -> bool {
        self.receipts
            .iter()
            .any(|r| &r.message_id == message_id && &r.user_id == user_id && r.kind == kind)
    }
}

pub struct MemoryMessageRepository {
    state: Mutex<MessageState>,
    conversations: Arc<MemoryConversationRepository>,
}

impl MemoryMessageRepository {
    /// Inserts also update `conversations`, like the Postgres transaction.
    pub fn linked(conversations: Arc<MemoryConversationRepository>) -> Self {
        Self { state: Mutex::default(), conversations }
    }

    pub fn all(&self) -> Vec<MessageEntity> {
        let state = self.state.lock().unwrap();
        state.rows.iter().map(|row| state.entity(row)).collect()
    }
}

#[async_trait::async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError> {
        let encrypted = message.encrypted.clone();
        let row = MessageRow {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            _type: message._type,
            encrypted_content: encrypted.as_ref().map(|e| e.content.clone()),
            encrypted_nonce: encrypted.as_ref().map(|e| e.nonce.clone()),
            encrypted_algorithm: encrypted.as_ref().map(|e| e.algorithm.clone()),
            media: message.media.clone().map(sqlx::types::Json),
            reply_to: message.reply_to,
            sender_public_key: message.sender_public_key.clone(),
            system_event: message.system_event.clone().map(sqlx::types::Json),
            deleted_for: vec![],
            created_at: chrono::Utc::now(),
        };

        self.state.lock().unwrap().rows.push(row.clone());
        let entity = MessageEntity::from_row(row, &[]);
        self.conversations.record_new_message(&entity.conversation_id, &LastMessage::from(&entity));
        Ok(entity)
    }

    async fn find_by_id(
        &self,
        message_id: &Uuid,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let state = self.state.lock().unwrap();
        Ok(state.rows.iter().find(|r| &r.id == message_id).map(|row| state.entity(row)))
    }

    async fn find_page(
        &self,
        conversation_id: &Uuid,
        viewer_id: &Uuid,
        cursor: Option<Uuid>,
        limit: i64,
        order: SortOrder,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<&MessageRow> = state
            .rows
            .iter()
            .filter(|r| &r.conversation_id == conversation_id && !r.deleted_for.contains(viewer_id))
            .filter(|r| match (cursor, order) {
                (None, _) => true,
                (Some(cursor), SortOrder::Desc) => r.id < cursor,
                (Some(cursor), SortOrder::Asc) => r.id > cursor,
            })
            .collect();

        rows.sort_by_key(|r| r.id);
        if order == SortOrder::Desc {
            rows.reverse();
        }
        rows.truncate(limit as usize);
        Ok(rows.into_iter().map(|row| state.entity(row)).collect())
    }

    async fn hide_for_user(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let Some(row) = state.rows.iter_mut().find(|r| &r.id == message_id) else {
            return Ok(false);
        };
        if row.deleted_for.contains(user_id) {
            return Ok(false);
        }
        row.deleted_for.push(*user_id);
        Ok(true)
    }

    async fn delete_for_everyone(
        &self,
        message_id: &Uuid,
        sender_id: &Uuid,
    ) -> Result<bool, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|r| !(&r.id == message_id && &r.sender_id == sender_id));
        let deleted = state.rows.len() < before;
        if deleted {
            state.receipts.retain(|r| &r.message_id != message_id);
        }
        Ok(deleted)
    }

    async fn add_delivered(
        &self,
        message_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let eligible = state.rows.iter().any(|r| &r.id == message_id && &r.sender_id != user_id)
            && !state.has_receipt(message_id, user_id, ReceiptKind::Read)
            && !state.has_receipt(message_id, user_id, ReceiptKind::Delivered);
        if !eligible {
            return Ok(None);
        }

        let at = chrono::Utc::now();
        state.receipts.push(ReceiptRow {
            message_id: *message_id,
            user_id: *user_id,
            kind: ReceiptKind::Delivered,
            at,
        });
        Ok(Some(at))
    }

    async fn add_read_upto(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        upto: &Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Uuid>, error::SystemError> {
        let mut state = self.state.lock().unwrap();
        let mut candidates: Vec<Uuid> = state
            .rows
            .iter()
            .filter(|r| {
                &r.conversation_id == conversation_id
                    && &r.id <= upto
                    && &r.sender_id != user_id
                    && !r.deleted_for.contains(user_id)
            })
            .map(|r| r.id)
            .collect();
        candidates.sort();
        candidates.retain(|id| !state.has_receipt(id, user_id, ReceiptKind::Read));

        for id in &candidates {
            state.receipts.push(ReceiptRow {
                message_id: *id,
                user_id: *user_id,
                kind: ReceiptKind::Read,
                at,
            });
        }
        Ok(candidates)
    }
}

#[derive(Default)]
pub struct MemorySettingsRepository {
    rows: Mutex<HashMap<Uuid, MessagingSettingsEntity>>,
}

impl MemorySettingsRepository {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn find_or_create(
        &self,
        user_id: &Uuid,
    ) -> Result<MessagingSettingsEntity, error::SystemError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows
            .entry(*user_id)
            .or_insert_with(|| MessagingSettingsEntity::defaults_for(*user_id))
            .clone())
    }

    async fn update(
        &self,
        user_id: &Uuid,
        update: &UpdateSettings,
    ) -> Result<MessagingSettingsEntity, error::SystemError> {
        let mut rows = self.rows.lock().unwrap();
        let settings =
            rows.entry(*user_id).or_insert_with(|| MessagingSettingsEntity::defaults_for(*user_id));

        if let Some(v) = update.read_receipts {
            settings.read_receipts = v;
        }
        if let Some(v) = update.typing_indicators {
            settings.typing_indicators = v;
        }
        if let Some(v) = update.online_status {
            settings.online_status = v;
        }
        if let Some(v) = update.notification_previews {
            settings.notification_previews = v;
        }
        if let Some(v) = update.who_can_message {
            settings.who_can_message = v;
        }
        if let Some(v) = update.media_auto_download {
            settings.media_auto_download = v;
        }
        if let Some(v) = &update.blocked_users {
            settings.blocked_users = v.clone();
        }
        settings.updated_at = chrono::Utc::now();
        Ok(settings.clone())
    }
}

#[derive(Default)]
pub struct MemoryKeyRepository {
    keys: Mutex<Vec<UserKeyEntity>>,
}

impl MemoryKeyRepository {
    pub fn insert(&self, key: UserKeyEntity) {
        self.keys.lock().unwrap().push(key);
    }
}

#[async_trait::async_trait]
impl KeyRepository for MemoryKeyRepository {
    async fn find_active_by_user(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<UserKeyEntity>, error::SystemError> {
        let mut keys: Vec<UserKeyEntity> = self
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| &k.user_id == user_id && k.is_active)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Fixtures

pub fn sample_insert(conversation_id: Uuid, sender_id: Uuid, _type: MessageType) -> InsertMessage {
    let media = _type.requires_media().then(|| MediaInfo {
        url: "https://cdn.example.com/m/1".into(),
        thumbnail: None,
        mime_type: None,
        size: Some(1024),
        width: None,
        height: None,
        duration: None,
    });

    InsertMessage {
        id: Uuid::now_v7(),
        conversation_id,
        sender_id,
        _type,
        encrypted: Some(EncryptedContent {
            content: "Y2lwaGVydGV4dA==".into(),
            nonce: "bm9uY2U=".into(),
            algorithm: "x25519-xsalsa20-poly1305".into(),
        }),
        media,
        reply_to: None,
        sender_public_key: None,
        system_event: None,
    }
}

pub fn sample_message(conversation_id: Uuid, sender_id: Uuid, _type: MessageType) -> MessageEntity {
    let insert = sample_insert(conversation_id, sender_id, _type);
    let now = chrono::Utc::now();
    MessageEntity {
        id: insert.id,
        conversation_id,
        sender_id,
        _type,
        encrypted: insert.encrypted,
        media: insert.media,
        reply_to: None,
        sender_public_key: None,
        status: crate::modules::message::schema::MessageStatus {
            sent: now,
            delivered: vec![],
            read: vec![],
        },
        deleted_for: vec![],
        system_event: None,
        created_at: now,
    }
}

/// Every service wired over the in-memory fakes.
pub struct TestApp {
    pub jwt_secret: String,
    pub gateway: GatewayService,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub settings: SettingsService,
    pub presence: PresenceTracker,
    pub typing: TypingTracker,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

impl TestApp {
    pub fn new() -> Self {
        let jwt_secret = "test-secret".to_string();
        let config = RealtimeConfig::default();
        let store = Arc::new(MemoryStore::default());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let conversation_repo = Arc::new(MemoryConversationRepository::default());
        let message_repo = Arc::new(MemoryMessageRepository::linked(conversation_repo.clone()));
        let key_repo = Arc::new(MemoryKeyRepository::default());

        let presence = PresenceTracker::new(store.clone(), &config);
        let typing = TypingTracker::new(store.clone(), config.typing_ttl);

        let conversations = ConversationService::with_dependencies(
            conversation_repo,
            message_repo.clone(),
            broadcaster.clone(),
        );
        let settings = SettingsService::with_dependencies(
            Arc::new(MemorySettingsRepository::default()),
            store.clone(),
        );
        let messages = MessageService::with_dependencies(
            message_repo.clone(),
            conversations.clone(),
            settings.clone(),
            key_repo.clone(),
            broadcaster.clone(),
            OfflineNotifier::new(presence.clone(), Arc::new(MemoryPublisher::default()), &config),
        );
        let delivery = DeliveryService::with_dependencies(
            message_repo,
            conversations.clone(),
            settings.clone(),
            broadcaster.clone(),
        );
        let gateway = GatewayService::with_dependencies(
            jwt_secret.clone(),
            conversations.clone(),
            messages.clone(),
            delivery,
            settings.clone(),
            key_repo,
            presence.clone(),
            typing.clone(),
            broadcaster.clone(),
            config,
        );

        TestApp {
            jwt_secret,
            gateway,
            conversations,
            messages,
            settings,
            presence,
            typing,
            broadcaster,
        }
    }

    pub fn token_for(&self, user_id: &Uuid) -> String {
        Claims::new(user_id, 3600)
            .with_type(TypeClaims::AccessToken)
            .encode(self.jwt_secret.as_bytes())
            .unwrap()
    }
}
