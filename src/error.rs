use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // Auth errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Account is awaiting approval")]
    AccountPending,
    #[error("Account is deactivated")]
    AccountInactive,
    #[error("Admin role required")]
    AdminRequired,

    // Profile errors
    #[error("Profile not found")]
    ProfileNotFound,
    #[error("Profile already exists")]
    ProfileAlreadyExists,

    // Agent errors
    #[error("Agent not found")]
    AgentNotFound,

    // Conversation errors
    #[error("Conversation not found")]
    ConversationNotFound,
    #[error("Message not found")]
    MessageNotFound,
    #[error("Tag already exists")]
    TagAlreadyExists,
    #[error("Stage already exists")]
    StageAlreadyExists,
    #[error("Tag not found")]
    TagNotFound,

    // Connection errors
    #[error("Connection not found")]
    ConnectionNotFound,

    // CRM errors
    #[error("Stage not found")]
    StageNotFound,
    #[error("Default stage cannot be deleted")]
    DefaultStageLocked,

    // Media errors
    #[error("File not found")]
    FileNotFound,

    // Webhook errors
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Upstream service error: {0}")]
    Upstream(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Outbound HTTP errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::DefaultStageLocked => (StatusCode::BAD_REQUEST, self.to_string()),

            // 401 Unauthorized
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),

            // 403 Forbidden
            AppError::AccountPending => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::AccountInactive => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::AdminRequired => (StatusCode::FORBIDDEN, self.to_string()),

            // 404 Not Found
            AppError::ProfileNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::AgentNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ConversationNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::MessageNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::TagNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::ConnectionNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::StageNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::FileNotFound => (StatusCode::NOT_FOUND, self.to_string()),

            // 409 Conflict
            AppError::ProfileAlreadyExists => (StatusCode::CONFLICT, self.to_string()),
            AppError::TagAlreadyExists => (StatusCode::CONFLICT, self.to_string()),
            AppError::StageAlreadyExists => (StatusCode::CONFLICT, self.to_string()),

            // 502 Bad Gateway
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::Http(e) => {
                tracing::warn!("HTTP client error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Upstream service unavailable".to_string(),
                )
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
