use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    /// Internal numeric id used by the external message relays.
    pub number: i64,
    pub contact_name: String,
    pub contact_phone: Option<String>,
    pub contact_avatar_url: Option<String>,
    pub channel: Channel,
    pub status: ConversationStatus,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
    pub assigned_to: Option<Uuid>,
    pub crm_stage: String,
    pub connection_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Timestamp used to order the inbox.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }

    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.contact_name.to_lowercase().contains(&term)
            || self
                .contact_phone
                .as_deref()
                .is_some_and(|p| p.to_lowercase().contains(&term))
            || self
                .last_message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains(&term))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Instagram,
    Messenger,
}

impl Default for Channel {
    fn default() -> Self {
        Self::Whatsapp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "conversation_status")]
pub enum ConversationStatus {
    #[sqlx(rename = "aberta")]
    #[serde(rename = "aberta")]
    Open,
    #[sqlx(rename = "fechada")]
    #[serde(rename = "fechada")]
    Closed,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// Inbox filters shared by the conversation list and the CRM board.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub channel: Option<Channel>,
    pub assigned_to: Option<Uuid>,
    pub crm_stage: Option<String>,
    pub search: Option<String>,
}

impl ConversationFilter {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        self.status.map_or(true, |s| conversation.status == s)
            && self.channel.map_or(true, |c| conversation.channel == c)
            && self
                .assigned_to
                .map_or(true, |a| conversation.assigned_to == Some(a))
            && self
                .crm_stage
                .as_deref()
                .map_or(true, |s| conversation.crm_stage == s)
            && self
                .search
                .as_deref()
                .map_or(true, |t| conversation.matches_search(t))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn conversation(name: &str) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            number: 1,
            contact_name: name.to_string(),
            contact_phone: Some("+5511999990000".to_string()),
            contact_avatar_url: None,
            channel: Channel::Whatsapp,
            status: ConversationStatus::Open,
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            assigned_to: None,
            crm_stage: "novo".to_string(),
            connection_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
