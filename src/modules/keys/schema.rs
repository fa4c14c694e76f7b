use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// A public key published by the identity service for end-to-end encryption.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKeyEntity {
    pub user_id: Uuid,
    pub key_id: String,
    pub public_key: String,
    pub algorithm: String,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
