use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::view::InboxView;
use crate::{
    error::{AppError, AppResult},
    models::{Conversation, ConversationFilter, ConversationStatus, Message},
    realtime::ChangeEvent,
};

#[derive(Debug, Serialize)]
struct StatusBody {
    status: ConversationStatus,
}

#[derive(Debug, Deserialize)]
struct FavoriteReply {
    is_favorite: bool,
}

/// Thin client for the REST API, authenticated with an access token.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> AppResult<T> {
        let response = checked(request.bearer_auth(&self.access_token).send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn conversations(&self, filter: &ConversationFilter) -> AppResult<Vec<Conversation>> {
        self.send(self.http.get(self.url("/conversations")).query(filter))
            .await
    }

    pub async fn messages(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        self.send(
            self.http
                .get(self.url(&format!("/conversations/{}/messages", conversation_id))),
        )
        .await
    }

    pub async fn update_status(
        &self,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> AppResult<Conversation> {
        self.send(
            self.http
                .put(self.url(&format!("/conversations/{}/status", conversation_id)))
                .json(&StatusBody { status }),
        )
        .await
    }

    pub async fn mark_read(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        self.send(
            self.http
                .post(self.url(&format!("/conversations/{}/read", conversation_id))),
        )
        .await
    }

    pub async fn favorites(&self) -> AppResult<Vec<Uuid>> {
        self.send(self.http.get(self.url("/connections/favorites")))
            .await
    }

    pub async fn toggle_favorite(&self, connection_id: Uuid) -> AppResult<bool> {
        let reply: FavoriteReply = self
            .send(
                self.http
                    .post(self.url(&format!("/connections/{}/favorite", connection_id))),
            )
            .await?;
        Ok(reply.is_favorite)
    }
}

async fn checked(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::Upstream(format!("{}: {}", status, body)))
}

/// An [`InboxView`] kept in sync with the API.
///
/// Status changes are applied locally first and rolled back if the write
/// fails. Read marks stay applied even when the write fails.
pub struct InboxSession {
    api: ApiClient,
    view: InboxView,
}

impl InboxSession {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            view: InboxView::new(),
        }
    }

    pub fn view(&self) -> &InboxView {
        &self.view
    }

    pub async fn refresh(&mut self, filter: &ConversationFilter) -> AppResult<()> {
        let conversations = self.api.conversations(filter).await?;
        let favorites = self.api.favorites().await?;
        self.view.load_conversations(conversations);
        self.view.set_favorites(favorites);
        Ok(())
    }

    /// Load the thread and clear its unread badge.
    pub async fn open_conversation(&mut self, conversation_id: Uuid) -> AppResult<()> {
        let messages = self.api.messages(conversation_id).await?;
        self.view.load_messages(conversation_id, messages);
        self.mark_read(conversation_id).await;
        Ok(())
    }

    pub async fn change_status(
        &mut self,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> AppResult<()> {
        let revert = self
            .view
            .begin_status_change(conversation_id, status)
            .ok_or(AppError::ConversationNotFound)?;

        if let Err(e) = self.api.update_status(conversation_id, status).await {
            tracing::warn!(%conversation_id, "Status change failed, reverting: {}", e);
            self.view.revert_status(revert);
            return Err(e);
        }

        Ok(())
    }

    pub async fn mark_read(&mut self, conversation_id: Uuid) {
        if !self.view.mark_read(conversation_id) {
            return;
        }
        if let Err(e) = self.api.mark_read(conversation_id).await {
            tracing::warn!(%conversation_id, "Failed to mark conversation read: {}", e);
        }
    }

    /// Flip locally, then confirm with the server; a failed write flips back.
    pub async fn toggle_favorite(&mut self, connection_id: Uuid) -> AppResult<bool> {
        let local = self.view.toggle_favorite(connection_id);
        match self.api.toggle_favorite(connection_id).await {
            Ok(remote) if remote == local => Ok(local),
            Ok(remote) => {
                // Server state diverged; take its answer.
                self.view.toggle_favorite(connection_id);
                Ok(remote)
            }
            Err(e) => {
                self.view.toggle_favorite(connection_id);
                Err(e)
            }
        }
    }

    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        self.view.apply_event(event)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::models::conversation::fixtures::conversation;

    async fn session_with(server: &MockServer, conversations: Vec<Conversation>) -> InboxSession {
        Mock::given(method("GET"))
            .and(path("/api/v1/conversations"))
            .and(header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&conversations))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/connections/favorites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;

        let mut session = InboxSession::new(ApiClient::new(&server.uri(), "token-123"));
        session
            .refresh(&ConversationFilter::default())
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn failed_status_write_reverts() {
        let server = MockServer::start().await;
        let conv = conversation("Ana");
        let id = conv.id;
        let mut session = session_with(&server, vec![conv]).await;

        Mock::given(method("PUT"))
            .and(path(format!("/api/v1/conversations/{}/status", id)))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = session.change_status(id, ConversationStatus::Closed).await;

        assert!(result.is_err());
        assert_eq!(
            session.view().conversation(id).unwrap().status,
            ConversationStatus::Open
        );
    }

    #[tokio::test]
    async fn successful_status_write_sticks() {
        let server = MockServer::start().await;
        let conv = conversation("Ana");
        let id = conv.id;
        let mut closed = conv.clone();
        closed.status = ConversationStatus::Closed;
        let mut session = session_with(&server, vec![conv]).await;

        Mock::given(method("PUT"))
            .and(path(format!("/api/v1/conversations/{}/status", id)))
            .and(body_json(json!({ "status": "fechada" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&closed))
            .expect(1)
            .mount(&server)
            .await;

        session
            .change_status(id, ConversationStatus::Closed)
            .await
            .unwrap();

        assert_eq!(
            session.view().conversation(id).unwrap().status,
            ConversationStatus::Closed
        );
    }

    #[tokio::test]
    async fn failed_read_mark_is_not_reverted() {
        let server = MockServer::start().await;
        let mut conv = conversation("Bruno");
        conv.unread_count = 3;
        let id = conv.id;
        let mut session = session_with(&server, vec![conv]).await;

        Mock::given(method("POST"))
            .and(path(format!("/api/v1/conversations/{}/read", id)))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        session.mark_read(id).await;

        assert_eq!(session.view().conversation(id).unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn failed_favorite_toggle_flips_back() {
        let server = MockServer::start().await;
        let mut session = session_with(&server, vec![]).await;
        let connection_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path(format!("/api/v1/connections/{}/favorite", connection_id)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(session.toggle_favorite(connection_id).await.is_err());
        assert!(!session.view().is_favorite(connection_id));
    }
}
