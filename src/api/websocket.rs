use std::{collections::HashMap, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    models::Profile,
    realtime::{ChangeEvent, Notification},
    storage::redis::RedisClient,
    AppState,
};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsOutgoingMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
}

impl WsOutgoingMessage {
    fn new<T: Serialize>(msg_type: &str, payload: &T) -> Option<Self> {
        match serde_json::to_value(payload) {
            Ok(payload) => Some(Self {
                msg_type: msg_type.to_string(),
                payload,
            }),
            Err(e) => {
                tracing::warn!("Failed to encode {} frame: {}", msg_type, e);
                None
            }
        }
    }
}

struct Client {
    user_id: Uuid,
    sender: mpsc::Sender<WsOutgoingMessage>,
}

/// Sockets connected to this instance.
pub struct WsHub {
    clients: RwLock<HashMap<Uuid, Client>>,
    redis: RedisClient,
}

impl WsHub {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            redis,
        }
    }

    /// Relay the shared change channel to every local socket. Runs for the
    /// life of the process and resubscribes if Redis drops the connection.
    pub async fn run(&self) {
        loop {
            match self.redis.subscribe_changes().await {
                Ok(mut pubsub) => {
                    tracing::info!("Subscribed to realtime changes");
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!("Unreadable change payload: {}", e);
                                continue;
                            }
                        };
                        match serde_json::from_str::<ChangeEvent>(&payload) {
                            Ok(event) => self.broadcast(&event).await,
                            Err(e) => tracing::warn!("Malformed change event: {}", e),
                        }
                    }
                    tracing::warn!("Realtime subscription ended");
                }
                Err(e) => tracing::error!("Failed to subscribe to realtime changes: {}", e),
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    pub async fn register(&self, client_id: Uuid, user_id: Uuid, sender: mpsc::Sender<WsOutgoingMessage>) {
        let mut clients = self.clients.write().await;
        clients.insert(client_id, Client { user_id, sender });
        tracing::info!(%client_id, %user_id, "Client registered");
    }

    pub async fn unregister(&self, client_id: Uuid) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.remove(&client_id) {
            tracing::info!(%client_id, user_id = %client.user_id, "Client unregistered");
        }
    }

    pub async fn broadcast(&self, event: &ChangeEvent) {
        let Some(frame) = WsOutgoingMessage::new("change", event) else {
            return;
        };
        let clients = self.clients.read().await;
        for client in clients.values() {
            // A full buffer means a stalled socket; drop the frame.
            let _ = client.sender.try_send(frame.clone());
        }
    }
}

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(profile): Extension<Profile>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, profile.id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let client_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<WsOutgoingMessage>(256);
    state.ws_hub.register(client_id, user_id, tx.clone()).await;

    // Toasts addressed to this user.
    let redis_client = state.redis.clone();
    let tx_notify = tx.clone();
    let notify_task = tokio::spawn(async move {
        let mut pubsub = match redis_client
            .subscribe_notifications(&user_id.to_string())
            .await
        {
            Ok(pubsub) => pubsub,
            Err(e) => {
                tracing::warn!(%user_id, "Notification subscription failed: {}", e);
                // Keep the socket open for change events.
                return std::future::pending::<()>().await;
            }
        };
        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let Ok(payload) = msg.get_payload::<String>() else {
                continue;
            };
            let frame = serde_json::from_str::<Notification>(&payload)
                .ok()
                .and_then(|n| WsOutgoingMessage::new("notification", &n));
            if let Some(frame) = frame {
                if tx_notify.send(frame).await.is_err() {
                    break;
                }
            }
        }
    });

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                    Ok(msg) => handle_incoming_message(&tx, user_id, msg).await,
                    Err(e) => tracing::debug!(%user_id, "Ignoring malformed frame: {}", e),
                },
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
        _ = notify_task => {},
    }

    state.ws_hub.unregister(client_id).await;
}

async fn handle_incoming_message(
    tx: &mpsc::Sender<WsOutgoingMessage>,
    user_id: Uuid,
    msg: WsIncomingMessage,
) {
    match msg.msg_type.as_str() {
        "ping" => {
            let pong = WsOutgoingMessage {
                msg_type: "pong".to_string(),
                payload: serde_json::json!({}),
            };
            let _ = tx.send(pong).await;
        }
        _ => {
            tracing::warn!(%user_id, "Unknown message type: {}", msg.msg_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::Table;

    #[test]
    fn change_frames_wrap_the_event() {
        let id = Uuid::new_v4();
        let frame =
            WsOutgoingMessage::new("change", &ChangeEvent::deleted(Table::Messages, id)).unwrap();

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "change");
        assert_eq!(json["payload"]["table"], "messages");
        assert_eq!(json["payload"]["kind"], "DELETE");
        assert_eq!(json["payload"]["record"]["id"], id.to_string());
    }

    #[test]
    fn incoming_frames_default_the_payload() {
        let msg: WsIncomingMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.msg_type, "ping");
        assert!(msg.payload.is_null());
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (tx, mut rx) = mpsc::channel(4);
        let ping = WsIncomingMessage {
            msg_type: "ping".into(),
            payload: serde_json::Value::Null,
        };

        handle_incoming_message(&tx, Uuid::new_v4(), ping).await;

        assert_eq!(rx.recv().await.unwrap().msg_type, "pong");
    }
}
