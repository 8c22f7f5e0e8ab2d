use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod inbox;
pub mod models;
pub mod realtime;
pub mod services;
pub mod storage;

use config::Config;
use realtime::Realtime;
use services::{gateway::SessionGateway, poller::PollerRegistry};
use storage::{minio::MinioClient, redis::RedisClient};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub redis: RedisClient,
    pub minio: MinioClient,
    pub config: Arc<Config>,
    pub ws_hub: Arc<api::websocket::WsHub>,
    pub gateway: SessionGateway,
    pub pollers: Arc<PollerRegistry>,
    pub realtime: Realtime,
}
