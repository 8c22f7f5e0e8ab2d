use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContactTag {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub tag: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}
