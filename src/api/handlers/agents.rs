use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::Agent,
    services::agents::{AgentService, AgentUpdate, NewAgent},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active: bool,
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Agent>>> {
    let agent_service = AgentService::new(state.db);
    let agents = agent_service.list(query.active).await?;

    Ok(Json(agents))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> AppResult<Json<Agent>> {
    let agent_service = AgentService::new(state.db);
    let agent = agent_service.get(agent_id).await?;

    Ok(Json(agent))
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<NewAgent>,
) -> AppResult<(StatusCode, Json<Agent>)> {
    let agent_service = AgentService::new(state.db);
    let agent = agent_service.create(req).await?;

    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(req): Json<AgentUpdate>,
) -> AppResult<Json<Agent>> {
    let agent_service = AgentService::new(state.db);
    let agent = agent_service.update(agent_id, req).await?;

    Ok(Json(agent))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let agent_service = AgentService::new(state.db);
    agent_service.delete(agent_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
