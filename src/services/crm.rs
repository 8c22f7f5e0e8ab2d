use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Conversation, ConversationFilter, CrmStage, StageColumn},
    realtime::{ChangeEvent, ChangeKind, Realtime, Table},
    services::conversations::ConversationService,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewStage {
    pub name: String,
    pub key: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
}

const DEFAULT_COLOR: &str = "#64748b";

fn stage_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Check that `order` names every stage exactly once.
pub fn validate_reorder(existing: &[CrmStage], order: &[Uuid]) -> AppResult<()> {
    let known: HashSet<Uuid> = existing.iter().map(|s| s.id).collect();
    let requested: HashSet<Uuid> = order.iter().copied().collect();

    if requested.len() != order.len() {
        return Err(AppError::Validation("Stage order has duplicates".to_string()));
    }
    if requested != known {
        return Err(AppError::Validation(
            "Stage order must list every stage exactly once".to_string(),
        ));
    }
    Ok(())
}

/// Group conversations into stage columns.
///
/// Columns follow stage position; conversations whose stage no longer
/// exists land in the default column. Within a column the most recent
/// activity comes first.
pub fn build_board(
    mut stages: Vec<CrmStage>,
    conversations: Vec<Conversation>,
    filter: &ConversationFilter,
) -> Vec<StageColumn> {
    stages.sort_by_key(|s| s.position);

    let fallback = stages
        .iter()
        .find(|s| s.is_default)
        .or_else(|| stages.first())
        .map(|s| s.key.clone());

    let mut buckets: HashMap<String, Vec<Conversation>> = HashMap::new();
    for conversation in conversations.into_iter().filter(|c| filter.matches(c)) {
        let key = if stages.iter().any(|s| s.key == conversation.crm_stage) {
            conversation.crm_stage.clone()
        } else {
            match &fallback {
                Some(key) => key.clone(),
                None => continue,
            }
        };
        buckets.entry(key).or_default().push(conversation);
    }

    stages
        .into_iter()
        .map(|stage| {
            let mut conversations = buckets.remove(&stage.key).unwrap_or_default();
            conversations.sort_by_key(|c| std::cmp::Reverse(c.activity_at()));
            StageColumn {
                stage,
                conversations,
            }
        })
        .collect()
}

pub struct CrmService {
    db: PgPool,
    realtime: Realtime,
}

impl CrmService {
    pub fn new(db: PgPool, realtime: Realtime) -> Self {
        Self { db, realtime }
    }

    pub async fn list_stages(&self) -> AppResult<Vec<CrmStage>> {
        let stages: Vec<CrmStage> =
            sqlx::query_as("SELECT * FROM crm_stages ORDER BY position, created_at")
                .fetch_all(&self.db)
                .await?;
        Ok(stages)
    }

    /// New stages are appended after the last column.
    pub async fn create_stage(&self, new: NewStage) -> AppResult<CrmStage> {
        if new.name.trim().is_empty() {
            return Err(AppError::Validation("Stage name is required".to_string()));
        }
        let key = stage_key(new.key.as_deref().unwrap_or(&new.name));
        if key.is_empty() {
            return Err(AppError::Validation("Invalid stage key".to_string()));
        }

        let stage: CrmStage = sqlx::query_as(
            r#"
            INSERT INTO crm_stages (id, key, name, color, position, is_default)
            VALUES ($1, $2, $3, $4,
                (SELECT COALESCE(MAX(position) + 1, 0) FROM crm_stages), false)
            ON CONFLICT (key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&key)
        .bind(new.name.trim())
        .bind(new.color.as_deref().unwrap_or(DEFAULT_COLOR))
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::StageAlreadyExists)?;

        self.realtime
            .publish_record(Table::CrmStages, ChangeKind::Insert, &stage)
            .await;

        Ok(stage)
    }

    pub async fn update_stage(&self, stage_id: Uuid, update: StageUpdate) -> AppResult<CrmStage> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::Validation("Stage name is required".to_string()));
        }

        let stage: CrmStage = sqlx::query_as(
            r#"
            UPDATE crm_stages
            SET name = COALESCE($2, name), color = COALESCE($3, color)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(stage_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.color)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::StageNotFound)?;

        self.realtime
            .publish_record(Table::CrmStages, ChangeKind::Update, &stage)
            .await;

        Ok(stage)
    }

    pub async fn reorder_stages(&self, order: &[Uuid]) -> AppResult<Vec<CrmStage>> {
        let existing = self.list_stages().await?;
        validate_reorder(&existing, order)?;

        let mut tx = self.db.begin().await?;
        for (position, stage_id) in order.iter().enumerate() {
            sqlx::query("UPDATE crm_stages SET position = $2 WHERE id = $1")
                .bind(stage_id)
                .bind(position as i32)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let stages = self.list_stages().await?;
        for stage in &stages {
            self.realtime
                .publish_record(Table::CrmStages, ChangeKind::Update, stage)
                .await;
        }

        Ok(stages)
    }

    /// Delete a custom stage, moving its conversations to the default stage
    /// in the same transaction. Returns how many conversations moved.
    pub async fn delete_stage(&self, stage_id: Uuid) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;

        let stage: CrmStage = sqlx::query_as("SELECT * FROM crm_stages WHERE id = $1 FOR UPDATE")
            .bind(stage_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::StageNotFound)?;

        if stage.is_default {
            return Err(AppError::DefaultStageLocked);
        }

        let default_key: String = sqlx::query_scalar(
            "SELECT key FROM crm_stages WHERE is_default ORDER BY position LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::BadRequest("No default stage configured".to_string()))?;

        let moved: Vec<Conversation> = sqlx::query_as(
            "UPDATE conversations SET crm_stage = $2, updated_at = NOW() WHERE crm_stage = $1 RETURNING *",
        )
        .bind(&stage.key)
        .bind(&default_key)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM crm_stages WHERE id = $1")
            .bind(stage_id)
            .execute(&mut *tx)
            .await?;

        // Close the gap left in the ordering.
        sqlx::query("UPDATE crm_stages SET position = position - 1 WHERE position > $1")
            .bind(stage.position)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(stage = %stage.key, moved = moved.len(), to = %default_key, "Stage deleted");

        for conversation in &moved {
            self.realtime
                .publish_record(Table::Conversations, ChangeKind::Update, conversation)
                .await;
        }
        self.realtime
            .publish(ChangeEvent::deleted(Table::CrmStages, stage_id))
            .await;

        Ok(moved.len() as u64)
    }

    /// Drag a card to another column.
    pub async fn move_conversation(
        &self,
        conversation_id: Uuid,
        stage_key: &str,
    ) -> AppResult<Conversation> {
        ConversationService::new(self.db.clone(), self.realtime.clone())
            .set_stage(conversation_id, stage_key)
            .await
    }

    pub async fn board(&self, filter: &ConversationFilter) -> AppResult<Vec<StageColumn>> {
        let stages = self.list_stages().await?;
        let conversations: Vec<Conversation> = sqlx::query_as(
            "SELECT * FROM conversations ORDER BY COALESCE(last_message_at, created_at) DESC",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(build_board(stages, conversations, filter))
    }
}
