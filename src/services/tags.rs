use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::ContactTag,
    realtime::{ChangeEvent, ChangeKind, Realtime, Table},
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewTag {
    pub tag: String,
    pub color: Option<String>,
}

/// Tags compare case-insensitively, so they are stored trimmed and lowercased.
pub fn normalize_tag(tag: &str) -> AppResult<String> {
    let tag = tag.trim().to_lowercase();
    if tag.is_empty() {
        return Err(AppError::Validation("Tag is required".to_string()));
    }
    if tag.chars().count() > 40 {
        return Err(AppError::Validation("Tag is too long".to_string()));
    }
    Ok(tag)
}

pub struct TagService {
    db: PgPool,
    realtime: Realtime,
}

impl TagService {
    pub fn new(db: PgPool, realtime: Realtime) -> Self {
        Self { db, realtime }
    }

    pub async fn list(&self, conversation_id: Uuid) -> AppResult<Vec<ContactTag>> {
        let tags: Vec<ContactTag> = sqlx::query_as(
            "SELECT * FROM contact_tags WHERE conversation_id = $1 ORDER BY created_at",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(tags)
    }

    pub async fn add(&self, conversation_id: Uuid, new: NewTag) -> AppResult<ContactTag> {
        let tag = normalize_tag(&new.tag)?;

        let conversation: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.db)
                .await?;
        if conversation.is_none() {
            return Err(AppError::ConversationNotFound);
        }

        let inserted: Option<ContactTag> = sqlx::query_as(
            r#"
            INSERT INTO contact_tags (id, conversation_id, tag, color)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, tag) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(&tag)
        .bind(new.color)
        .fetch_optional(&self.db)
        .await?;

        let tag = inserted.ok_or(AppError::TagAlreadyExists)?;

        self.realtime
            .publish_record(Table::ContactTags, ChangeKind::Insert, &tag)
            .await;

        Ok(tag)
    }

    pub async fn remove(&self, conversation_id: Uuid, tag_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM contact_tags WHERE id = $1 AND conversation_id = $2")
            .bind(tag_id)
            .bind(conversation_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::TagNotFound);
        }

        self.realtime
            .publish(ChangeEvent::deleted(Table::ContactTags, tag_id))
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_lowercased() {
        assert_eq!(normalize_tag("  VIP ").unwrap(), "vip");
        assert!(normalize_tag(" ").is_err());
        assert!(normalize_tag(&"a".repeat(41)).is_err());
    }
}
