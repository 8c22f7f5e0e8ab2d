use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        preview, Channel, Connection, Conversation, ConversationFilter, ConversationStatus,
        Direction, FileRef, Message,
    },
    realtime::{ChangeEvent, ChangeKind, Realtime, Table},
    services::gateway::SessionGateway,
};

pub const FALLBACK_STAGE: &str = "novo";

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub contact_avatar_url: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    pub connection_id: Option<Uuid>,
}

pub struct ConversationService {
    db: PgPool,
    realtime: Realtime,
}

impl ConversationService {
    pub fn new(db: PgPool, realtime: Realtime) -> Self {
        Self { db, realtime }
    }

    /// Inbox listing in one round trip, newest activity first.
    pub async fn get_optimized_conversations(
        &self,
        filter: &ConversationFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Conversation>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let conversations: Vec<Conversation> = sqlx::query_as(
            r#"
            SELECT * FROM conversations
            WHERE ($1::conversation_status IS NULL OR status = $1)
            AND ($2::channel IS NULL OR channel = $2)
            AND ($3::uuid IS NULL OR assigned_to = $3)
            AND ($4::text IS NULL OR crm_stage = $4)
            AND ($5::text IS NULL
                 OR contact_name ILIKE $5
                 OR contact_phone ILIKE $5
                 OR last_message ILIKE $5)
            ORDER BY COALESCE(last_message_at, created_at) DESC
            LIMIT $6 OFFSET $7
            "#,
        )
        .bind(filter.status)
        .bind(filter.channel)
        .bind(filter.assigned_to)
        .bind(filter.crm_stage.as_deref())
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(conversations)
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        sqlx::query_as("SELECT * FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::ConversationNotFound)
    }

    /// Map a conversation UUID to the numeric id the relays use.
    pub async fn get_conversation_number(&self, conversation_id: Uuid) -> AppResult<i64> {
        let number: Option<i64> =
            sqlx::query_scalar("SELECT number FROM conversations WHERE id = $1")
                .bind(conversation_id)
                .fetch_optional(&self.db)
                .await?;
        number.ok_or(AppError::ConversationNotFound)
    }

    pub async fn create_conversation(&self, new: NewConversation) -> AppResult<Conversation> {
        if new.contact_name.trim().is_empty() {
            return Err(AppError::Validation("Contact name is required".to_string()));
        }

        let conversation: Conversation = sqlx::query_as(
            r#"
            INSERT INTO conversations
                (id, contact_name, contact_phone, contact_avatar_url, channel, status,
                 unread_count, crm_stage, connection_id)
            VALUES ($1, $2, $3, $4, $5, $6, 0,
                COALESCE(
                    (SELECT key FROM crm_stages WHERE is_default ORDER BY position LIMIT 1),
                    $7),
                $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.contact_name.trim())
        .bind(new.contact_phone)
        .bind(new.contact_avatar_url)
        .bind(new.channel)
        .bind(ConversationStatus::Open)
        .bind(FALLBACK_STAGE)
        .bind(new.connection_id)
        .fetch_one(&self.db)
        .await?;

        self.realtime
            .publish_record(Table::Conversations, ChangeKind::Insert, &conversation)
            .await;

        Ok(conversation)
    }

    pub async fn update_status(
        &self,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> AppResult<Conversation> {
        let conversation: Option<Conversation> = sqlx::query_as(
            "UPDATE conversations SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(conversation_id)
        .bind(status)
        .fetch_optional(&self.db)
        .await?;

        tracing::info!(%conversation_id, ?status, "Conversation status changed");
        self.published(conversation).await
    }

    /// Explicit read-mark: the only way `unread_count` goes back to zero.
    pub async fn mark_read(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        let conversation: Option<Conversation> = sqlx::query_as(
            "UPDATE conversations SET unread_count = 0, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;

        self.published(conversation).await
    }

    pub async fn assign(
        &self,
        conversation_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> AppResult<Conversation> {
        if let Some(agent_id) = agent_id {
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM agents WHERE id = $1")
                .bind(agent_id)
                .fetch_optional(&self.db)
                .await?;
            if exists.is_none() {
                return Err(AppError::AgentNotFound);
            }
        }

        let conversation: Option<Conversation> = sqlx::query_as(
            "UPDATE conversations SET assigned_to = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(conversation_id)
        .bind(agent_id)
        .fetch_optional(&self.db)
        .await?;

        self.published(conversation).await
    }

    pub async fn set_stage(&self, conversation_id: Uuid, stage_key: &str) -> AppResult<Conversation> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM crm_stages WHERE key = $1")
            .bind(stage_key)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_none() {
            return Err(AppError::StageNotFound);
        }

        let conversation: Option<Conversation> = sqlx::query_as(
            "UPDATE conversations SET crm_stage = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(conversation_id)
        .bind(stage_key)
        .fetch_optional(&self.db)
        .await?;

        self.published(conversation).await
    }

    pub async fn delete_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::ConversationNotFound);
        }

        self.realtime
            .publish(ChangeEvent::deleted(Table::Conversations, conversation_id))
            .await;

        Ok(())
    }

    /// Messages in sequence order; `before` pages backwards by number.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<i64>,
    ) -> AppResult<Vec<Message>> {
        // 404 rather than an empty page for unknown conversations.
        self.get_conversation_number(conversation_id).await?;

        let mut messages: Vec<Message> = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1
            AND ($2::bigint IS NULL OR number < $2)
            ORDER BY number DESC
            LIMIT $3
            "#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    /// Append a message and update the conversation summary atomically.
    ///
    /// `unread_count` only grows for received messages.
    pub async fn insert_message(
        &self,
        conversation_id: Uuid,
        body: &str,
        direction: Direction,
        file: &FileRef,
    ) -> AppResult<(Message, Conversation)> {
        let mut tx = self.db.begin().await?;

        // Row lock serializes number assignment per conversation.
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(conversation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(AppError::ConversationNotFound);
        }

        let message: Message = sqlx::query_as(
            r#"
            INSERT INTO messages
                (id, number, conversation_id, body, direction, file_url, file_name, file_type, file_size)
            VALUES ($1,
                (SELECT COALESCE(MAX(number), 0) + 1 FROM messages WHERE conversation_id = $2),
                $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(body)
        .bind(direction)
        .bind(&file.file_url)
        .bind(&file.file_name)
        .bind(&file.file_type)
        .bind(file.file_size)
        .fetch_one(&mut *tx)
        .await?;

        let conversation: Conversation = sqlx::query_as(
            r#"
            UPDATE conversations
            SET last_message = $2,
                last_message_at = $3,
                unread_count = unread_count + $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(preview(body, file))
        .bind(message.created_at)
        .bind(direction.unread_increment())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        self.realtime
            .publish_record(Table::Messages, ChangeKind::Insert, &message)
            .await;
        self.realtime
            .publish_record(Table::Conversations, ChangeKind::Update, &conversation)
            .await;

        Ok((message, conversation))
    }

    /// Store an outgoing message and hand it to the message relay.
    ///
    /// The stored message stands even if the relay is unreachable.
    pub async fn send_message(
        &self,
        gateway: &SessionGateway,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
        file: &FileRef,
    ) -> AppResult<Message> {
        if body.trim().is_empty() && file.file_url.is_none() {
            return Err(AppError::Validation("Message is empty".to_string()));
        }

        let (message, conversation) = self
            .insert_message(conversation_id, body, Direction::Sent, file)
            .await?;

        let instance_name = match conversation.connection_id {
            Some(connection_id) => {
                let connection: Option<Connection> =
                    sqlx::query_as("SELECT * FROM connections WHERE id = $1")
                        .bind(connection_id)
                        .fetch_optional(&self.db)
                        .await?;
                connection.map(|c| c.instance_name)
            }
            None => None,
        };

        let payload = json!({
            "conversa_id": conversation.id,
            "numero": conversation.number,
            "mensagem": message.body,
            "telefone": conversation.contact_phone,
            "canal": conversation.channel,
            "instancia": instance_name,
            "remetente": sender_id,
            "file_url": message.file_url,
            "file_name": message.file_name,
            "file_type": message.file_type,
        });

        if let Err(e) = gateway.relay_message(&payload).await {
            tracing::warn!(%conversation_id, message_id = %message.id, "Message relay failed: {}", e);
        }

        Ok(message)
    }

    async fn published(&self, conversation: Option<Conversation>) -> AppResult<Conversation> {
        let conversation = conversation.ok_or(AppError::ConversationNotFound)?;
        self.realtime
            .publish_record(Table::Conversations, ChangeKind::Update, &conversation)
            .await;
        Ok(conversation)
    }
}
