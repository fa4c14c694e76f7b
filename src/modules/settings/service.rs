use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::configs::KeyValueStore;
use crate::modules::settings::{
    model::UpdateSettings, repository::SettingsRepository, schema::MessagingSettingsEntity,
};

const CACHE_TTL: u64 = 300;

fn cache_key(user_id: &Uuid) -> String {
    format!("messaging_settings:{user_id}")
}

#[derive(Clone)]
pub struct SettingsService {
    repo: Arc<dyn SettingsRepository + Send + Sync>,
    cache: Arc<dyn KeyValueStore + Send + Sync>,
}

impl SettingsService {
    pub fn with_dependencies(
        repo: Arc<dyn SettingsRepository + Send + Sync>,
        cache: Arc<dyn KeyValueStore + Send + Sync>,
    ) -> Self {
        info!("SettingsService initialized with dependencies");
        SettingsService { repo, cache }
    }

    /// Cached read; the row is created with defaults on first access.
    pub async fn get(&self, user_id: &Uuid) -> Result<MessagingSettingsEntity, error::SystemError> {
        let key = cache_key(user_id);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<MessagingSettingsEntity>(&raw) {
                Ok(settings) => return Ok(settings),
                Err(e) => warn!("Discarding unreadable cached settings for {}: {}", user_id, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Settings cache read failed for {}: {}", user_id, e),
        }

        let settings = self.repo.find_or_create(user_id).await?;
        self.store_cached(&settings).await;
        Ok(settings)
    }

    pub async fn update(
        &self,
        user_id: &Uuid,
        update: UpdateSettings,
    ) -> Result<MessagingSettingsEntity, error::SystemError> {
        if update.is_empty() {
            return Err(error::SystemError::bad_request("No fields to update"));
        }

        let mut update = update;
        if let Some(blocked) = update.blocked_users.as_mut() {
            if blocked.contains(user_id) {
                return Err(error::SystemError::bad_request("You cannot block yourself"));
            }
            blocked.sort();
            blocked.dedup();
        }

        let settings = self.repo.update(user_id, &update).await?;
        self.store_cached(&settings).await;
        info!("Messaging settings updated for user {}", user_id);
        Ok(settings)
    }

    /// Settings lookup for enforcement paths: a failure falls back to the
    /// defaults rather than failing the caller's event.
    pub async fn get_or_default(&self, user_id: &Uuid) -> MessagingSettingsEntity {
        match self.get(user_id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Falling back to default settings for {}: {}", user_id, e);
                MessagingSettingsEntity::defaults_for(*user_id)
            }
        }
    }

    async fn store_cached(&self, settings: &MessagingSettingsEntity) {
        let key = cache_key(&settings.user_id);
        let raw = match serde_json::to_string(settings) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Could not serialize settings for cache: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.set_ex(&key, &raw, CACHE_TTL).await {
            warn!("Settings cache write failed for {}: {}", settings.user_id, e);
        }
    }
}
