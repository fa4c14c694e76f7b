//! Typing flags: `typing:{conversation_id}:{user_id}` -> "1" with a TTL of a
//! few seconds. Failures are logged and swallowed.
use std::sync::Arc;
use uuid::Uuid;

use crate::configs::KeyValueStore;

fn typing_key(conversation_id: &Uuid, user_id: &Uuid) -> String {
    format!("typing:{conversation_id}:{user_id}")
}

#[derive(Clone)]
pub struct TypingTracker {
    store: Arc<dyn KeyValueStore + Send + Sync>,
    ttl: u64,
}

impl TypingTracker {
    pub fn new(store: Arc<dyn KeyValueStore + Send + Sync>, ttl: u64) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    pub async fn start(&self, conversation_id: &Uuid, user_id: &Uuid) {
        if let Err(e) = self.store.set_ex(&typing_key(conversation_id, user_id), "1", self.ttl).await
        {
            tracing::warn!("Failed to set typing flag for {} in {}: {}", user_id, conversation_id, e);
        }
    }

    pub async fn stop(&self, conversation_id: &Uuid, user_id: &Uuid) {
        if let Err(e) = self.store.delete(&typing_key(conversation_id, user_id)).await {
            tracing::warn!(
                "Failed to clear typing flag for {} in {}: {}",
                user_id,
                conversation_id,
                e
            );
        }
    }

    pub async fn is_typing(&self, conversation_id: &Uuid, user_id: &Uuid) -> bool {
        match self.store.exists(&typing_key(conversation_id, user_id)).await {
            Ok(typing) => typing,
            Err(e) => {
                tracing::warn!("Typing lookup failed: {}", e);
                false
            }
        }
    }
}
