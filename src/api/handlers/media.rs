use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ConversationAttachment, MediaFile, Profile},
    services::media::{MediaService, Upload},
    AppState,
};

struct UploadForm {
    upload: Upload,
    message_id: Option<Uuid>,
}

/// Reads the `file` part plus an optional `message_id` part.
async fn read_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut upload = None;
    let mut message_id = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    data,
                });
            }
            "message_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read field: {}", e)))?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| AppError::BadRequest("Invalid message_id".to_string()))?;
                message_id = Some(id);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest("File required".to_string()))?;
    Ok(UploadForm { upload, message_id })
}

pub async fn upload_media(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<MediaFile>)> {
    let form = read_form(multipart).await?;

    let media_service = MediaService::new(state.db, state.minio);
    let file = media_service.upload(profile.id, form.upload).await?;

    Ok((StatusCode::CREATED, Json(file)))
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_media(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> AppResult<Json<Vec<MediaFile>>> {
    let media_service = MediaService::new(state.db, state.minio);
    let files = media_service
        .list(query.limit.clamp(1, 200), query.offset.max(0))
        .await?;

    Ok(Json(files))
}

pub async fn delete_media(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let media_service = MediaService::new(state.db, state.minio);
    media_service.delete(file_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn attach(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(conversation_id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ConversationAttachment>)> {
    let form = read_form(multipart).await?;

    let media_service = MediaService::new(state.db, state.minio);
    let attachment = media_service
        .attach(conversation_id, form.message_id, profile.id, form.upload)
        .await?;

    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn list_attachments(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<ConversationAttachment>>> {
    let media_service = MediaService::new(state.db, state.minio);
    let attachments = media_service.attachments(conversation_id).await?;

    Ok(Json(attachments))
}
