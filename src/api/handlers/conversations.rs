use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        Channel, Conversation, ConversationFilter, ConversationStatus, FileRef, Message, Profile,
    },
    services::conversations::{ConversationService, NewConversation},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<ConversationStatus>,
    pub channel: Option<Channel>,
    pub assigned_to: Option<Uuid>,
    pub crm_stage: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl ListQuery {
    fn filter(&self) -> ConversationFilter {
        ConversationFilter {
            status: self.status,
            channel: self.channel,
            assigned_to: self.assigned_to,
            crm_stage: self.crm_stage.clone(),
            search: self.search.clone(),
        }
    }
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Conversation>>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversations = conversation_service
        .get_optimized_conversations(&query.filter(), query.limit.clamp(1, 200), query.offset.max(0))
        .await?;

    Ok(Json(conversations))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<NewConversation>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation = conversation_service.create_conversation(req).await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation = conversation_service.get_conversation(conversation_id).await?;

    Ok(Json(conversation))
}

#[derive(Debug, Serialize)]
pub struct NumberResponse {
    pub id: Uuid,
    pub number: i64,
}

pub async fn get_conversation_number(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<NumberResponse>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let number = conversation_service
        .get_conversation_number(conversation_id)
        .await?;

    Ok(Json(NumberResponse {
        id: conversation_id,
        number,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ConversationStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation = conversation_service
        .update_status(conversation_id, req.status)
        .await?;

    Ok(Json(conversation))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation = conversation_service.mark_read(conversation_id).await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub agent_id: Option<Uuid>,
}

pub async fn assign(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation = conversation_service
        .assign(conversation_id, req.agent_id)
        .await?;

    Ok(Json(conversation))
}

#[derive(Debug, Deserialize)]
pub struct StageRequest {
    pub stage: String,
}

pub async fn set_stage(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<StageRequest>,
) -> AppResult<Json<Conversation>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation = conversation_service
        .set_stage(conversation_id, &req.stage)
        .await?;

    Ok(Json(conversation))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    conversation_service
        .delete_conversation(conversation_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default = "default_page")]
    pub limit: i64,
    pub before: Option<i64>,
}

fn default_page() -> i64 {
    100
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let messages = conversation_service
        .get_messages(conversation_id, query.limit.clamp(1, 500), query.before)
        .await?;

    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub body: String,
    #[serde(flatten)]
    pub file: FileRef,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let conversation_service = ConversationService::new(state.db, state.realtime);
    let message = conversation_service
        .send_message(&state.gateway, conversation_id, profile.id, &req.body, &req.file)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
