use deadpool_redis::{
    redis::{self, AsyncCommands},
    Runtime,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{api::error, constants::Env};

pub async fn connect_database(env: &Env) -> Result<PgPool, error::SystemError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_slow_threshold(std::time::Duration::from_secs(3))
        .connect(&env.database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| error::SystemError::InternalError(Box::new(e)))?;

    Ok(pool)
}

/// Tunables for the realtime layer, handed to services explicitly so that
/// nothing below `main` reads process globals.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub instance_id: Uuid,
    pub presence_ttl: u64,
    pub connection_ttl: u64,
    pub typing_ttl: u64,
    pub heartbeat_interval: u64,
    pub fanout_channel: String,
    pub offline_channel: String,
}

impl RealtimeConfig {
    pub fn from_env(env: &Env) -> Self {
        Self {
            instance_id: env.instance_id,
            presence_ttl: env.presence_ttl,
            connection_ttl: env.presence_ttl * 5,
            typing_ttl: env.typing_ttl,
            heartbeat_interval: env.heartbeat_interval,
            ..Default::default()
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            instance_id: Uuid::now_v7(),
            presence_ttl: 60,
            connection_ttl: 300,
            typing_ttl: 5,
            heartbeat_interval: 15,
            fanout_channel: "messaging:fanout".to_string(),
            offline_channel: "messaging:offline".to_string(),
        }
    }
}

/// Shared, TTL-capable key-value store. Every method maps onto a single
/// atomic command (or MULTI pipeline / script) on the backing store.
#[async_trait::async_trait]
pub trait KeyValueStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), error::SystemError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), error::SystemError>;

    async fn get(&self, key: &str) -> Result<Option<String>, error::SystemError>;

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, error::SystemError>;

    async fn exists(&self, key: &str) -> Result<bool, error::SystemError>;

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, error::SystemError>;

    /// Returns false when the key no longer exists.
    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, error::SystemError>;

    async fn delete(&self, key: &str) -> Result<(), error::SystemError>;

    /// Replaces the whole hash and sets its TTL in one transaction.
    async fn set_hash_ex(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: u64,
    ) -> Result<(), error::SystemError>;

    /// Deletes `key` only if hash field `field` still equals `expected`.
    async fn delete_hash_if_field_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> Result<bool, error::SystemError>;
}

#[async_trait::async_trait]
pub trait EventPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), error::SystemError>;
}

const DELETE_IF_FIELD_EQ: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisCache {
    pool: deadpool_redis::Pool,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> Result<Self, error::SystemError> {
        let mut cfg = deadpool_redis::Config::from_url(redis_url);
        cfg.pool = Some(deadpool_redis::PoolConfig { max_size: 32, ..Default::default() });
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisCache {
    async fn set(&self, key: &str, value: &str) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: u64) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, error::SystemError> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, error::SystemError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut *conn).await?;
        Ok(values)
    }

    async fn exists(&self, key: &str) -> Result<bool, error::SystemError> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn exists_many(&self, keys: &[String]) -> Result<Vec<bool>, error::SystemError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.exists(key);
        }
        let flags: Vec<bool> = pipe.query_async(&mut *conn).await?;
        Ok(flags)
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, error::SystemError> {
        let mut conn = self.pool.get().await?;
        let applied: bool = conn.expire(key, ttl as i64).await?;
        Ok(applied)
    }

    async fn delete(&self, key: &str) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn set_hash_ex(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: u64,
    ) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        redis::pipe()
            .atomic()
            .del(key)
            .hset_multiple(key, fields)
            .expire(key, ttl as i64)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete_hash_if_field_eq(
        &self,
        key: &str,
        field: &str,
        expected: &str,
    ) -> Result<bool, error::SystemError> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = redis::cmd("EVAL")
            .arg(DELETE_IF_FIELD_EQ)
            .arg(1)
            .arg(key)
            .arg(field)
            .arg(expected)
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait::async_trait]
impl EventPublisher for RedisCache {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}
