//! Presence tracking in the shared key-value store.
//!
//! Redis key schema:
//! - `presence:{user_id}` -> hash {connectionId, instanceId, connectedAt}, TTL
//!   refreshed by heartbeats; its existence is what "online" means
//! - `presence:conn:{connection_id}` -> user_id, longer TTL
//! - `last_seen:{user_id}` -> RFC 3339 timestamp, no TTL
//!
//! Every failure is logged and degrades to "appears offline"; presence never
//! fails the caller.
use std::sync::Arc;
use uuid::Uuid;

use crate::configs::{KeyValueStore, RealtimeConfig};

const PRESENCE_PREFIX: &str = "presence:";
const CONNECTION_PREFIX: &str = "presence:conn:";
const LAST_SEEN_PREFIX: &str = "last_seen:";

fn presence_key(user_id: &Uuid) -> String {
    format!("{PRESENCE_PREFIX}{user_id}")
}

fn connection_key(connection_id: &Uuid) -> String {
    format!("{CONNECTION_PREFIX}{connection_id}")
}

fn last_seen_key(user_id: &Uuid) -> String {
    format!("{LAST_SEEN_PREFIX}{user_id}")
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn KeyValueStore + Send + Sync>,
    instance_id: Uuid,
    presence_ttl: u64,
    connection_ttl: u64,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn KeyValueStore + Send + Sync>, config: &RealtimeConfig) -> Self {
        Self {
            store,
            instance_id: config.instance_id,
            presence_ttl: config.presence_ttl,
            connection_ttl: config.connection_ttl,
        }
    }

    /// Makes `connection_id` the user's current connection.
    pub async fn set_online(&self, user_id: &Uuid, connection_id: &Uuid) {
        let fields = [
            ("connectionId", connection_id.to_string()),
            ("instanceId", self.instance_id.to_string()),
            ("connectedAt", chrono::Utc::now().to_rfc3339()),
        ];

        if let Err(e) =
            self.store.set_hash_ex(&presence_key(user_id), &fields, self.presence_ttl).await
        {
            tracing::error!("Failed to set presence for {}: {}", user_id, e);
            return;
        }

        if let Err(e) = self
            .store
            .set_ex(&connection_key(connection_id), &user_id.to_string(), self.connection_ttl)
            .await
        {
            tracing::error!("Failed to map connection {}: {}", connection_id, e);
        }
    }

    /// Heartbeat. A record that already expired, or was removed when a
    /// superseded connection closed, is re-created for this connection as
    /// long as the connection itself is still mapped to the user. Returns
    /// true when the record was re-created.
    pub async fn refresh(&self, user_id: &Uuid, connection_id: &Uuid) -> bool {
        match self.store.expire(&presence_key(user_id), self.presence_ttl).await {
            Ok(true) => {
                if let Err(e) =
                    self.store.expire(&connection_key(connection_id), self.connection_ttl).await
                {
                    tracing::warn!("Failed to refresh connection {}: {}", connection_id, e);
                }
                false
            }
            Ok(false) => {
                // set_offline drops the mapping first, so a heartbeat racing a
                // close finds it gone.
                if self.connection_owner(connection_id).await != Some(*user_id) {
                    tracing::debug!("Connection {} already closed, not refreshing", connection_id);
                    return false;
                }
                tracing::debug!("Presence for {} lapsed, re-establishing", user_id);
                self.set_online(user_id, connection_id).await;
                true
            }
            Err(e) => {
                tracing::error!("Failed to refresh presence for {}: {}", user_id, e);
                false
            }
        }
    }

    /// Removes the record only if it still names `connection_id`. Returns the
    /// recorded last-seen time when it did.
    pub async fn set_offline(
        &self,
        user_id: &Uuid,
        connection_id: &Uuid,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        if let Err(e) = self.store.delete(&connection_key(connection_id)).await {
            tracing::warn!("Failed to drop connection mapping {}: {}", connection_id, e);
        }

        let removed = match self
            .store
            .delete_hash_if_field_eq(
                &presence_key(user_id),
                "connectionId",
                &connection_id.to_string(),
            )
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Failed to clear presence for {}: {}", user_id, e);
                return None;
            }
        };

        if !removed {
            tracing::debug!(
                "Presence for {} belongs to another connection, keeping it",
                user_id
            );
            return None;
        }

        let now = chrono::Utc::now();
        if let Err(e) = self.store.set(&last_seen_key(user_id), &now.to_rfc3339()).await {
            tracing::warn!("Failed to record last seen for {}: {}", user_id, e);
        }
        Some(now)
    }

    async fn connection_owner(&self, connection_id: &Uuid) -> Option<Uuid> {
        match self.store.get(&connection_key(connection_id)).await {
            Ok(value) => value.and_then(|v| Uuid::parse_str(&v).ok()),
            Err(e) => {
                tracing::warn!("Failed to resolve connection {}: {}", connection_id, e);
                None
            }
        }
    }

    pub async fn is_online(&self, user_id: &Uuid) -> bool {
        match self.store.exists(&presence_key(user_id)).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!("Presence lookup failed for {}: {}", user_id, e);
                false
            }
        }
    }

    /// Pipelined liveness check; offline users also carry their last-seen.
    pub async fn batch_is_online(&self, user_ids: &[Uuid]) -> Vec<PresenceInfo> {
        if user_ids.is_empty() {
            return vec![];
        }

        let keys: Vec<String> = user_ids.iter().map(presence_key).collect();
        let flags = match self.store.exists_many(&keys).await {
            Ok(flags) => flags,
            Err(e) => {
                tracing::warn!("Batch presence lookup failed: {}", e);
                vec![false; user_ids.len()]
            }
        };

        let offline: Vec<Uuid> = user_ids
            .iter()
            .zip(&flags)
            .filter(|(_, online)| !**online)
            .map(|(user_id, _)| *user_id)
            .collect();

        let last_seen_keys: Vec<String> = offline.iter().map(last_seen_key).collect();
        let mut last_seens = match self.store.get_many(&last_seen_keys).await {
            Ok(values) => values.into_iter(),
            Err(e) => {
                tracing::warn!("Batch last seen lookup failed: {}", e);
                Vec::new().into_iter()
            }
        };

        user_ids
            .iter()
            .zip(flags)
            .map(|(user_id, is_online)| {
                let last_seen = if is_online {
                    None
                } else {
                    last_seens.next().flatten().as_deref().and_then(parse_timestamp)
                };
                PresenceInfo { user_id: *user_id, is_online, last_seen }
            })
            .collect()
    }
}

fn parse_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&chrono::Utc))
}
