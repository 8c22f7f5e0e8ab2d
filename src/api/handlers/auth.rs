use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Profile, TokenPair},
    services::{
        auth::{AuthService, Claims},
        profiles::ProfileService,
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub profile: Profile,
    pub message: String,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let auth_service = AuthService::new(state.db, state.redis, (*state.config).clone());
    let profile = auth_service
        .signup(&req.email, &req.password, &req.full_name)
        .await?;

    let message = if profile.is_admin() {
        "Account created".to_string()
    } else {
        "Account created, awaiting administrator approval".to_string()
    };

    Ok((StatusCode::CREATED, Json(SignupResponse { profile, message })))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub profile: Profile,
    pub tokens: TokenPair,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let auth_service = AuthService::new(state.db, state.redis, (*state.config).clone());
    let (profile, tokens) = auth_service.login(&req.email, &req.password).await?;

    Ok(Json(AuthResponse { profile, tokens }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    let auth_service = AuthService::new(state.db, state.redis, (*state.config).clone());
    let tokens = auth_service.refresh_token(&req.refresh_token).await?;

    Ok(Json(tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<StatusCode> {
    let session_id = Uuid::parse_str(&claims.sid).map_err(|_| AppError::InvalidToken)?;

    let auth_service = AuthService::new(state.db, state.redis, (*state.config).clone());
    auth_service.logout(session_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
) -> AppResult<StatusCode> {
    let auth_service = AuthService::new(state.db, state.redis, (*state.config).clone());
    auth_service.logout_all(profile.id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(Extension(profile): Extension<Profile>) -> Json<Profile> {
    Json(profile)
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub full_name: String,
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Json(req): Json<UpdateMeRequest>,
) -> AppResult<Json<Profile>> {
    let profile_service = ProfileService::new(state.db, state.redis, state.realtime);
    let updated = profile_service.update_own(profile.id, &req.full_name).await?;

    Ok(Json(updated))
}
