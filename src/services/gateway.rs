//! Client for the external services that own the WhatsApp sessions.
//!
//! Instance creation, QR pairing, status checks, disconnects and the
//! message relay all live outside this system; this module only speaks
//! their HTTP contracts.

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::WebhookConfig,
    error::{AppError, AppResult},
    models::ConnectionStatus,
};

/// Values the session service returns while a profile is still loading.
const PLACEHOLDERS: &[&str] = &[
    "null",
    "undefined",
    "unknown",
    "none",
    "n/a",
    "carregando...",
    "não disponível",
    "nao disponivel",
    "sem nome",
];

fn meaningful(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || PLACEHOLDERS.contains(&value.to_lowercase().as_str()) {
        return None;
    }
    Some(value.to_string())
}

/// Profile as reported by the "get profile" endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceProfile {
    #[serde(default, alias = "profileName", alias = "nome")]
    pub profile_name: Option<String>,
    #[serde(default, alias = "contato", alias = "number", alias = "wuid")]
    pub contact: Option<String>,
    #[serde(default, alias = "profilePictureUrl", alias = "profilePicUrl", alias = "foto")]
    pub profile_picture_url: Option<String>,
}

/// A profile with all three fields present; proof that pairing finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedProfile {
    pub profile_name: String,
    pub contact: String,
    pub profile_picture_url: String,
}

impl InstanceProfile {
    pub fn linked(&self) -> Option<LinkedProfile> {
        Some(LinkedProfile {
            profile_name: meaningful(self.profile_name.as_deref())?,
            contact: meaningful(self.contact.as_deref())?,
            profile_picture_url: meaningful(self.profile_picture_url.as_deref())?,
        })
    }

    /// n8n answers with either an object or a one-element array.
    pub fn from_response(value: Value) -> AppResult<Self> {
        let value = match value {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            Value::Array(_) => Value::Object(Default::default()),
            other => other,
        };
        serde_json::from_value(value).map_err(Into::into)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCode {
    pub qr_code: Option<String>,
    pub pairing_code: Option<String>,
}

impl QrCode {
    fn from_response(value: &Value) -> Self {
        let value = match value {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        };
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| value.get(k).and_then(Value::as_str))
                .map(str::to_string)
        };
        Self {
            qr_code: field(&["base64", "qrcode", "qr_code", "code"]),
            pairing_code: field(&["pairingCode", "pairing_code"]),
        }
    }
}

/// Maps the state strings used by the session service.
pub fn parse_status(value: &Value) -> ConnectionStatus {
    let value = match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    let state = value
        .get("status")
        .or_else(|| value.get("state"))
        .or_else(|| value.get("instance").and_then(|i| i.get("state")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    match state.as_str() {
        "open" | "connected" | "conectado" => ConnectionStatus::Connected,
        "connecting" | "qrcode" | "conectando" => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Disconnected,
    }
}

#[derive(Clone)]
pub struct SessionGateway {
    client: Client,
    config: WebhookConfig,
}

impl SessionGateway {
    pub fn new(config: &WebhookConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> AppResult<Value> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.header("apikey", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!("{} returned {}", url, status)));
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub async fn create_instance(&self, instance_name: &str) -> AppResult<Value> {
        self.post_json(
            &self.config.create_instance_url,
            &json!({ "instanceName": instance_name }),
        )
        .await
    }

    pub async fn connect(&self, instance_name: &str) -> AppResult<QrCode> {
        let value = self
            .post_json(&self.config.connect_url, &json!({ "instanceName": instance_name }))
            .await?;
        Ok(QrCode::from_response(&value))
    }

    /// Any failure reads as "disconnected".
    pub async fn status(&self, instance_name: &str) -> ConnectionStatus {
        match self
            .post_json(&self.config.status_url, &json!({ "instanceName": instance_name }))
            .await
        {
            Ok(value) => parse_status(&value),
            Err(e) => {
                tracing::warn!(instance_name, "Status check failed: {}", e);
                ConnectionStatus::Disconnected
            }
        }
    }

    pub async fn fetch_profile(&self, instance_name: &str) -> AppResult<InstanceProfile> {
        let value = self
            .post_json(&self.config.profile_url, &json!({ "instanceName": instance_name }))
            .await?;
        InstanceProfile::from_response(value)
    }

    pub async fn disconnect(&self, instance_name: &str) -> AppResult<()> {
        self.post_json(&self.config.disconnect_url, &json!({ "instanceName": instance_name }))
            .await?;
        Ok(())
    }

    pub async fn delete_instance(&self, instance_name: &str) -> AppResult<()> {
        self.post_json(
            &self.config.delete_instance_url,
            &json!({ "instanceName": instance_name }),
        )
        .await?;
        Ok(())
    }

    pub async fn relay_message(&self, payload: &Value) -> AppResult<()> {
        self.post_json(&self.config.message_relay_url, payload).await?;
        Ok(())
    }

    /// Forward a raw body to the message relay and hand back the upstream answer.
    pub async fn forward_raw(&self, body: Bytes) -> AppResult<(StatusCode, Bytes)> {
        let mut request = self
            .client
            .post(&self.config.message_relay_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(key) = &self.config.api_key {
            request = request.header("apikey", key);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        Ok((status, bytes))
    }

    /// Best effort; the inbound flow never fails because n8n is down.
    pub async fn notify_n8n(&self, payload: &Value) {
        let Some(url) = &self.config.n8n_inbound_url else {
            return;
        };
        if let Err(e) = self.post_json(url, payload).await {
            tracing::warn!("n8n inbound webhook failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn config(base: &str) -> WebhookConfig {
        WebhookConfig {
            create_instance_url: format!("{}/criar-instancia", base),
            connect_url: format!("{}/conectar", base),
            status_url: format!("{}/status", base),
            profile_url: format!("{}/perfil", base),
            disconnect_url: format!("{}/desconectar", base),
            delete_instance_url: format!("{}/deletar-instancia", base),
            message_relay_url: format!("{}/enviar-mensagem", base),
            n8n_inbound_url: None,
            api_key: Some("chave".into()),
            relay_secret: None,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn incomplete_profile_is_not_linked() {
        let profile = InstanceProfile {
            profile_name: Some("Loja".into()),
            contact: Some("5511999990000".into()),
            profile_picture_url: None,
        };
        assert!(profile.linked().is_none());

        let placeholder = InstanceProfile {
            profile_picture_url: Some("undefined".into()),
            ..profile.clone()
        };
        assert!(placeholder.linked().is_none());

        let complete = InstanceProfile {
            profile_picture_url: Some("https://pps.whatsapp.net/v/1.jpg".into()),
            ..profile
        };
        assert_eq!(complete.linked().unwrap().profile_name, "Loja");
    }

    #[test]
    fn profile_accepts_array_and_camel_case() {
        let profile = InstanceProfile::from_response(json!([{
            "profileName": "Loja",
            "wuid": "5511@s.whatsapp.net",
            "profilePicUrl": "https://x/y.jpg"
        }]))
        .unwrap();
        assert!(profile.linked().is_some());

        let empty = InstanceProfile::from_response(json!([])).unwrap();
        assert_eq!(empty, InstanceProfile::default());
    }

    #[test]
    fn status_strings_map_to_connection_status() {
        assert_eq!(parse_status(&json!({"status": "open"})), ConnectionStatus::Connected);
        assert_eq!(
            parse_status(&json!({"instance": {"state": "connecting"}})),
            ConnectionStatus::Connecting
        );
        assert_eq!(parse_status(&json!([{"state": "close"}])), ConnectionStatus::Disconnected);
        assert_eq!(parse_status(&Value::Null), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn connect_returns_qr_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conectar"))
            .and(header("apikey", "chave"))
            .and(body_json(json!({ "instanceName": "loja-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "base64": "data:image/png;base64,AAAA",
                "pairingCode": "WZYEH1YY"
            })))
            .mount(&server)
            .await;

        let gateway = SessionGateway::new(&config(&server.uri())).unwrap();
        let qr = gateway.connect("loja-1").await.unwrap();

        assert_eq!(qr.qr_code.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(qr.pairing_code.as_deref(), Some("WZYEH1YY"));
    }

    #[tokio::test]
    async fn status_failure_reads_as_disconnected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let gateway = SessionGateway::new(&config(&server.uri())).unwrap();
        assert_eq!(gateway.status("loja-1").await, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn upstream_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/desconectar"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = SessionGateway::new(&config(&server.uri())).unwrap();
        let err = gateway.disconnect("loja-1").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
