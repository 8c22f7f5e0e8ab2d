//! Row-change events pushed to connected dashboards.
//!
//! Every mutation publishes a [`ChangeEvent`] on a shared Redis channel so
//! each server instance can fan it out to its own WebSocket clients.
//! Publishing is best effort: a failed publish is logged and never fails
//! the write that triggered it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::redis::RedisClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Conversations,
    Messages,
    Connections,
    Profiles,
    CrmStages,
    ContactTags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

impl ChangeEvent {
    pub fn new<T: Serialize>(
        table: Table,
        kind: ChangeKind,
        record: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            table,
            kind,
            record: serde_json::to_value(record)?,
        })
    }

    /// Delete events only carry the primary key.
    pub fn deleted(table: Table, id: Uuid) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            record: serde_json::json!({ "id": id }),
        }
    }

    pub fn record_id(&self) -> Option<Uuid> {
        self.record
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// A toast addressed to a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct Realtime {
    redis: RedisClient,
}

impl Realtime {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn publish(&self, event: ChangeEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Failed to encode change event: {}", e);
                return;
            }
        };
        if let Err(e) = self.redis.publish_change(&payload).await {
            tracing::warn!(table = ?event.table, kind = ?event.kind, "Failed to publish change: {}", e);
        }
    }

    pub async fn publish_record<T: Serialize>(&self, table: Table, kind: ChangeKind, record: &T) {
        match ChangeEvent::new(table, kind, record) {
            Ok(event) => self.publish(event).await,
            Err(e) => tracing::warn!("Failed to encode {:?} record: {}", table, e),
        }
    }

    pub async fn notify(&self, user_id: Uuid, notification: Notification) {
        let payload = match serde_json::to_string(&notification) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Failed to encode notification: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .redis
            .publish_notification(&user_id.to_string(), &payload)
            .await
        {
            tracing::warn!(%user_id, "Failed to publish notification: {}", e);
        }
    }
}
