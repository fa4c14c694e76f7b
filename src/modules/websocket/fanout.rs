//! Cross-instance fanout over Redis pub/sub.
//!
//! Each broadcast is handed to the local server actor and published as an
//! envelope on the fanout channel. Every instance subscribes to the same
//! channel, drops its own envelopes and delivers the rest locally.
use actix::Recipient;
use deadpool_redis::redis;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::error;
use crate::configs::{EventPublisher, RealtimeConfig};

use super::events::Broadcast;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[async_trait::async_trait]
pub trait Broadcaster {
    async fn broadcast(&self, broadcast: Broadcast);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutEnvelope {
    pub origin: Uuid,
    pub broadcast: Broadcast,
}

#[derive(Clone)]
pub struct Fanout {
    local: Recipient<Broadcast>,
    publisher: Arc<dyn EventPublisher + Send + Sync>,
    instance_id: Uuid,
    channel: String,
}

impl Fanout {
    pub fn new(
        local: Recipient<Broadcast>,
        publisher: Arc<dyn EventPublisher + Send + Sync>,
        config: &RealtimeConfig,
    ) -> Self {
        Self {
            local,
            publisher,
            instance_id: config.instance_id,
            channel: config.fanout_channel.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Broadcaster for Fanout {
    async fn broadcast(&self, broadcast: Broadcast) {
        self.local.do_send(broadcast.clone());

        let envelope = FanoutEnvelope { origin: self.instance_id, broadcast };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode fanout envelope: {}", e);
                return;
            }
        };

        if let Err(e) = self.publisher.publish(&self.channel, payload).await {
            tracing::error!("Failed to publish fanout envelope: {}", e);
        }
    }
}

/// Decodes an envelope, returning the broadcast only if another instance
/// published it.
pub fn accept_envelope(payload: &str, instance_id: &Uuid) -> Option<Broadcast> {
    match serde_json::from_str::<FanoutEnvelope>(payload) {
        Ok(envelope) if &envelope.origin == instance_id => None,
        Ok(envelope) => Some(envelope.broadcast),
        Err(e) => {
            tracing::warn!("Dropping malformed fanout envelope: {}", e);
            None
        }
    }
}

/// Runs the fanout subscription for the life of the process, reconnecting
/// with an exponential back-off whenever the pub/sub connection drops.
pub async fn run_subscriber(
    redis_url: String,
    channel: String,
    instance_id: Uuid,
    local: Recipient<Broadcast>,
) {
    let mut backoff = Duration::from_millis(500);

    loop {
        match subscribe_once(&redis_url, &channel, &instance_id, &local).await {
            Ok(()) => {
                tracing::warn!("Fanout subscription on {} ended, reconnecting", channel);
                backoff = Duration::from_millis(500);
            }
            Err(e) => {
                tracing::error!(
                    "Fanout subscription on {} failed: {}; retrying in {:?}",
                    channel,
                    e,
                    backoff
                );
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn subscribe_once(
    redis_url: &str,
    channel: &str,
    instance_id: &Uuid,
    local: &Recipient<Broadcast>,
) -> Result<(), error::SystemError> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    tracing::info!("Subscribed to fanout channel {}", channel);

    let mut stream = std::pin::pin!(pubsub.on_message());
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Unreadable fanout payload: {}", e);
                continue;
            }
        };

        if let Some(broadcast) = accept_envelope(&payload, instance_id) {
            local.do_send(broadcast);
        }
    }

    Ok(())
}
