use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Profile, ProfileStatus, Role},
    services::profiles::ProfileService,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<ProfileStatus>,
}

pub async fn list_profiles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Profile>>> {
    let profile_service = ProfileService::new(state.db, state.redis, state.realtime);
    let profiles = profile_service.list(query.status).await?;

    Ok(Json(profiles))
}

async fn set_status(
    state: AppState,
    acting: &Profile,
    target_id: Uuid,
    status: ProfileStatus,
) -> AppResult<Json<Profile>> {
    let profile_service = ProfileService::new(state.db, state.redis, state.realtime);
    let profile = profile_service.set_status(acting, target_id, status).await?;

    Ok(Json(profile))
}

pub async fn approve_profile(
    State(state): State<AppState>,
    Extension(acting): Extension<Profile>,
    Path(target_id): Path<Uuid>,
) -> AppResult<Json<Profile>> {
    set_status(state, &acting, target_id, ProfileStatus::Active).await
}

pub async fn deactivate_profile(
    State(state): State<AppState>,
    Extension(acting): Extension<Profile>,
    Path(target_id): Path<Uuid>,
) -> AppResult<Json<Profile>> {
    set_status(state, &acting, target_id, ProfileStatus::Inactive).await
}

pub async fn reactivate_profile(
    State(state): State<AppState>,
    Extension(acting): Extension<Profile>,
    Path(target_id): Path<Uuid>,
) -> AppResult<Json<Profile>> {
    set_status(state, &acting, target_id, ProfileStatus::Active).await
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

pub async fn change_role(
    State(state): State<AppState>,
    Extension(acting): Extension<Profile>,
    Path(target_id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> AppResult<Json<Profile>> {
    let profile_service = ProfileService::new(state.db, state.redis, state.realtime);
    let profile = profile_service.set_role(&acting, target_id, req.role).await?;

    Ok(Json(profile))
}
