use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::AppResult,
    services::dashboard::{DashboardMetrics, DashboardService},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Json<DashboardMetrics>> {
    let dashboard_service = DashboardService::new(state.db);
    let metrics = dashboard_service.metrics(query.days).await?;

    Ok(Json(metrics))
}
