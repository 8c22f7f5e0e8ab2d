use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::connections::{connection_service, relay_polling};
use crate::{
    error::{AppError, AppResult},
    models::{Direction, FileRef, Profile},
    services::{conversations::ConversationService, gateway::QrCode, signature},
    AppState,
};

/// Message pushed by the channel integrations.
#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(alias = "conversa_id")]
    pub conversation_id: Uuid,
    #[serde(alias = "mensagem", default)]
    pub body: String,
    #[serde(alias = "direcao", default)]
    pub direction: Direction,
    #[serde(flatten)]
    pub file: FileRef,
}

#[derive(Debug, Serialize)]
pub struct InboundResponse {
    pub message_id: Uuid,
    pub number: i64,
    pub conversation_number: i64,
}

pub async fn inbound(
    State(state): State<AppState>,
    Json(req): Json<InboundMessage>,
) -> AppResult<(StatusCode, Json<InboundResponse>)> {
    if req.body.trim().is_empty() && req.file.file_url.is_none() {
        return Err(AppError::Validation("Message is empty".to_string()));
    }

    let conversation_service = ConversationService::new(state.db, state.realtime);
    let conversation_number = conversation_service
        .get_conversation_number(req.conversation_id)
        .await?;

    let (message, conversation) = conversation_service
        .insert_message(req.conversation_id, &req.body, req.direction, &req.file)
        .await?;

    tracing::info!(
        conversation_id = %conversation.id,
        message_id = %message.id,
        direction = ?message.direction,
        "Inbound message stored"
    );

    if message.direction == Direction::Received {
        state
            .gateway
            .notify_n8n(&json!({
                "conversa_id": conversation.id,
                "numero": conversation_number,
                "mensagem": message.body,
                "telefone": conversation.contact_phone,
                "canal": conversation.channel,
                "message_id": message.id,
                "file_url": message.file_url,
            }))
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(InboundResponse {
            message_id: message.id,
            number: message.number,
            conversation_number,
        }),
    ))
}

/// Verify the signature, then pass the body through to the message relay
/// and echo whatever it answered.
pub async fn relay(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let secret = state.config.webhooks.relay_secret.as_deref().ok_or_else(|| {
        tracing::warn!("Relay webhook called but no relay secret is configured");
        AppError::InvalidSignature
    })?;

    let header = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());
    signature::verify(&body, header, secret)?;

    let (status, upstream) = state.gateway.forward_raw(body).await?;
    tracing::debug!(%status, "Relay forwarded");

    Ok((status, [(CONTENT_TYPE, "application/json")], upstream).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub connection_id: Uuid,
}

/// Same as the dashboard connect, but the pairing poll is bounded.
pub async fn whatsapp_connect(
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
    Json(req): Json<ConnectRequest>,
) -> AppResult<Json<QrCode>> {
    let settings = relay_polling(&state.config.polling);
    let qr = connection_service(&state)
        .connect(&profile, req.connection_id, settings)
        .await?;

    Ok(Json(qr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_accepts_portuguese_keys() {
        let id = Uuid::new_v4();
        let msg: InboundMessage = serde_json::from_value(json!({
            "conversa_id": id,
            "mensagem": "Olá!",
            "direcao": "sent",
            "file_name": "foto.jpg",
        }))
        .unwrap();

        assert_eq!(msg.conversation_id, id);
        assert_eq!(msg.body, "Olá!");
        assert_eq!(msg.direction, Direction::Sent);
        assert_eq!(msg.file.file_name.as_deref(), Some("foto.jpg"));
    }

    #[test]
    fn inbound_direction_defaults_to_received() {
        let msg: InboundMessage = serde_json::from_value(json!({
            "conversation_id": Uuid::new_v4(),
            "body": "oi",
        }))
        .unwrap();

        assert_eq!(msg.direction, Direction::Received);
        assert!(msg.file.file_url.is_none());
    }
}
