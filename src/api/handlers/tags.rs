use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::ContactTag,
    services::tags::{NewTag, TagService},
    AppState,
};

pub async fn list_tags(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<ContactTag>>> {
    let tag_service = TagService::new(state.db, state.realtime);
    let tags = tag_service.list(conversation_id).await?;

    Ok(Json(tags))
}

pub async fn add_tag(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<NewTag>,
) -> AppResult<(StatusCode, Json<ContactTag>)> {
    let tag_service = TagService::new(state.db, state.realtime);
    let tag = tag_service.add(conversation_id, req).await?;

    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn remove_tag(
    State(state): State<AppState>,
    Path((conversation_id, tag_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let tag_service = TagService::new(state.db, state.realtime);
    tag_service.remove(conversation_id, tag_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
