use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Conversation;

/// A CRM pipeline column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CrmStage {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub color: String,
    pub position: i32,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageColumn {
    pub stage: CrmStage,
    pub conversations: Vec<Conversation>,
}
