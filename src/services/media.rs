use bytes::Bytes;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ConversationAttachment, MediaFile},
    storage::minio::{object_key, MinioClient},
};

pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// A file read out of a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Upload {
    pub fn validate(&self) -> AppResult<()> {
        if self.file_name.trim().is_empty() {
            return Err(AppError::Validation("File name is required".to_string()));
        }
        if self.data.is_empty() {
            return Err(AppError::Validation("File is empty".to_string()));
        }
        if self.data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation(format!(
                "File exceeds {} MB",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }
        Ok(())
    }
}

pub struct MediaService {
    db: PgPool,
    minio: MinioClient,
}

impl MediaService {
    pub fn new(db: PgPool, minio: MinioClient) -> Self {
        Self { db, minio }
    }

    pub async fn upload(&self, uploaded_by: Uuid, upload: Upload) -> AppResult<MediaFile> {
        upload.validate()?;

        let key = object_key(&uploaded_by.to_string(), &upload.file_name);
        let size = upload.data.len() as i64;
        let url = self
            .minio
            .upload_file(self.minio.media_bucket(), &key, upload.data, &upload.content_type)
            .await?;

        let file: MediaFile = sqlx::query_as(
            r#"
            INSERT INTO media_files (id, file_name, file_type, file_size, storage_key, url, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&upload.file_name)
        .bind(&upload.content_type)
        .bind(size)
        .bind(&key)
        .bind(&url)
        .bind(uploaded_by)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(file_id = %file.id, size, "Media uploaded");
        Ok(file)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> AppResult<Vec<MediaFile>> {
        let files: Vec<MediaFile> = sqlx::query_as(
            "SELECT * FROM media_files ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        Ok(files)
    }

    /// Removes the stored object first; the row goes only once storage agrees.
    pub async fn delete(&self, file_id: Uuid) -> AppResult<()> {
        let file: MediaFile = sqlx::query_as("SELECT * FROM media_files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::FileNotFound)?;

        self.minio
            .delete_file(self.minio.media_bucket(), &file.storage_key)
            .await?;

        sqlx::query("DELETE FROM media_files WHERE id = $1")
            .bind(file_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    pub async fn attach(
        &self,
        conversation_id: Uuid,
        message_id: Option<Uuid>,
        uploaded_by: Uuid,
        upload: Upload,
    ) -> AppResult<ConversationAttachment> {
        upload.validate()?;

        let conversation: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.db)
                .await?;
        if conversation.is_none() {
            return Err(AppError::ConversationNotFound);
        }

        if let Some(message_id) = message_id {
            let message: Option<(Uuid,)> = sqlx::query_as(
                "SELECT id FROM messages WHERE id = $1 AND conversation_id = $2",
            )
            .bind(message_id)
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await?;
            if message.is_none() {
                return Err(AppError::MessageNotFound);
            }
        }

        let key = object_key(&conversation_id.to_string(), &upload.file_name);
        let size = upload.data.len() as i64;
        let url = self
            .minio
            .upload_file(
                self.minio.attachments_bucket(),
                &key,
                upload.data,
                &upload.content_type,
            )
            .await?;

        let attachment: ConversationAttachment = sqlx::query_as(
            r#"
            INSERT INTO conversation_attachments
                (id, conversation_id, message_id, file_name, file_type, file_size,
                 storage_key, url, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(message_id)
        .bind(&upload.file_name)
        .bind(&upload.content_type)
        .bind(size)
        .bind(&key)
        .bind(&url)
        .bind(uploaded_by)
        .fetch_one(&self.db)
        .await?;

        Ok(attachment)
    }

    pub async fn attachments(&self, conversation_id: Uuid) -> AppResult<Vec<ConversationAttachment>> {
        let attachments: Vec<ConversationAttachment> = sqlx::query_as(
            "SELECT * FROM conversation_attachments WHERE conversation_id = $1 ORDER BY created_at DESC",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(size: usize) -> Upload {
        Upload {
            file_name: "contrato.pdf".into(),
            content_type: "application/pdf".into(),
            data: Bytes::from(vec![0u8; size]),
        }
    }

    #[test]
    fn rejects_empty_and_oversized_files() {
        assert!(upload(10).validate().is_ok());
        assert!(upload(0).validate().is_err());
        assert!(upload(MAX_UPLOAD_BYTES + 1).validate().is_err());

        let unnamed = Upload {
            file_name: " ".into(),
            ..upload(10)
        };
        assert!(unnamed.validate().is_err());
    }
}
