use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Channel, Conversation, ConversationFilter, ConversationStatus, CrmStage, StageColumn},
    services::crm::{CrmService, NewStage, StageUpdate},
    AppState,
};

pub async fn list_stages(State(state): State<AppState>) -> AppResult<Json<Vec<CrmStage>>> {
    let crm_service = CrmService::new(state.db, state.realtime);
    let stages = crm_service.list_stages().await?;

    Ok(Json(stages))
}

pub async fn create_stage(
    State(state): State<AppState>,
    Json(req): Json<NewStage>,
) -> AppResult<(StatusCode, Json<CrmStage>)> {
    let crm_service = CrmService::new(state.db, state.realtime);
    let stage = crm_service.create_stage(req).await?;

    Ok((StatusCode::CREATED, Json(stage)))
}

pub async fn update_stage(
    State(state): State<AppState>,
    Path(stage_id): Path<Uuid>,
    Json(req): Json<StageUpdate>,
) -> AppResult<Json<CrmStage>> {
    let crm_service = CrmService::new(state.db, state.realtime);
    let stage = crm_service.update_stage(stage_id, req).await?;

    Ok(Json(stage))
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub stage_ids: Vec<Uuid>,
}

pub async fn reorder_stages(
    State(state): State<AppState>,
    Json(req): Json<ReorderRequest>,
) -> AppResult<Json<Vec<CrmStage>>> {
    let crm_service = CrmService::new(state.db, state.realtime);
    let stages = crm_service.reorder_stages(&req.stage_ids).await?;

    Ok(Json(stages))
}

#[derive(Debug, Serialize)]
pub struct DeleteStageResponse {
    pub moved_conversations: u64,
}

pub async fn delete_stage(
    State(state): State<AppState>,
    Path(stage_id): Path<Uuid>,
) -> AppResult<Json<DeleteStageResponse>> {
    let crm_service = CrmService::new(state.db, state.realtime);
    let moved_conversations = crm_service.delete_stage(stage_id).await?;

    Ok(Json(DeleteStageResponse {
        moved_conversations,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    pub status: Option<ConversationStatus>,
    pub channel: Option<Channel>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
}

pub async fn board(
    State(state): State<AppState>,
    Query(query): Query<BoardQuery>,
) -> AppResult<Json<Vec<StageColumn>>> {
    let filter = ConversationFilter {
        status: query.status,
        channel: query.channel,
        assigned_to: query.assigned_to,
        crm_stage: None,
        search: query.search,
    };

    let crm_service = CrmService::new(state.db, state.realtime);
    let columns = crm_service.board(&filter).await?;

    Ok(Json(columns))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub stage: String,
}

pub async fn move_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MoveRequest>,
) -> AppResult<Json<Conversation>> {
    let crm_service = CrmService::new(state.db, state.realtime);
    let conversation = crm_service
        .move_conversation(conversation_id, &req.stage)
        .await?;

    Ok(Json(conversation))
}
