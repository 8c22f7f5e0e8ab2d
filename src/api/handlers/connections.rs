use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::PollingConfig,
    error::AppResult,
    models::{Connection, ConnectionWithFavorite, Profile},
    services::{
        connections::ConnectionService,
        gateway::QrCode,
        poller::PollSettings,
    },
    AppState,
};

pub(crate) fn connection_service(state: &AppState) -> ConnectionService {
    ConnectionService::new(
        state.db.clone(),
        state.redis.clone(),
        state.realtime.clone(),
        state.gateway.clone(),
        state.pollers.clone(),
    )
}

/// The dashboard keeps polling until the QR is scanned or the user leaves.
pub(crate) fn dashboard_polling(config: &PollingConfig) -> PollSettings {
    PollSettings {
        interval: config.interval,
        max_attempts: None,
    }
}

pub(crate) fn relay_polling(config: &PollingConfig) -> PollSettings {
    PollSettings {
        interval: config.relay_interval,
        max_attempts: Some(config.relay_max_attempts),
    }
}

pub async fn list_connections(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
) -> AppResult<Json<Vec<ConnectionWithFavorite>>> {
    let connections = connection_service(&state).list(&profile).await?;
    Ok(Json(connections))
}

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
}

pub async fn create_instance(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Json(req): Json<CreateInstanceRequest>,
) -> AppResult<(StatusCode, Json<Connection>)> {
    let connection = connection_service(&state)
        .create_instance(&profile, &req.name)
        .await?;

    Ok((StatusCode::CREATED, Json(connection)))
}

pub async fn get_connection(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<Json<Connection>> {
    let connection = connection_service(&state)
        .get(&profile, connection_id)
        .await?;

    Ok(Json(connection))
}

pub async fn connect(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<Json<QrCode>> {
    let settings = dashboard_polling(&state.config.polling);
    let qr = connection_service(&state)
        .connect(&profile, connection_id, settings)
        .await?;

    Ok(Json(qr))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<Json<Connection>> {
    let connection = connection_service(&state)
        .status(&profile, connection_id)
        .await?;

    Ok(Json(connection))
}

pub async fn disconnect(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<Json<Connection>> {
    let connection = connection_service(&state)
        .disconnect(&profile, connection_id)
        .await?;

    Ok(Json(connection))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    connection_service(&state)
        .delete_instance(&profile, connection_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn favorites(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
) -> AppResult<Json<Vec<Uuid>>> {
    let favorites = connection_service(&state).favorites(&profile).await?;
    Ok(Json(favorites))
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub is_favorite: bool,
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Path(connection_id): Path<Uuid>,
) -> AppResult<Json<FavoriteResponse>> {
    let is_favorite = connection_service(&state)
        .toggle_favorite(&profile, connection_id)
        .await?;

    Ok(Json(FavoriteResponse { is_favorite }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn relay_polling_is_capped_and_dashboard_is_not() {
        let config = PollingConfig {
            interval: Duration::from_secs(3),
            relay_interval: Duration::from_secs(5),
            relay_max_attempts: 60,
        };

        let dashboard = dashboard_polling(&config);
        assert_eq!(dashboard.interval, Duration::from_secs(3));
        assert_eq!(dashboard.max_attempts, None);

        let relay = relay_polling(&config);
        assert_eq!(relay.interval, Duration::from_secs(5));
        assert_eq!(relay.max_attempts, Some(60));
    }
}
