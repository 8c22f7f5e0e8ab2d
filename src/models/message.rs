use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    /// Sequence number within the conversation.
    pub number: i64,
    pub conversation_id: Uuid,
    pub body: String,
    pub direction: Direction,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_direction", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Received
    }
}

impl Direction {
    /// Only inbound messages count towards a conversation's unread badge.
    pub fn unread_increment(self) -> i32 {
        match self {
            Direction::Received => 1,
            Direction::Sent => 0,
        }
    }
}

/// Optional file fields carried by a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileRef {
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
}

/// Preview shown in the inbox for a message.
pub fn preview(body: &str, file: &FileRef) -> String {
    if !body.trim().is_empty() {
        return body.to_string();
    }
    match file.file_name.as_deref() {
        Some(name) => format!("📎 {}", name),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_received_messages_count_as_unread() {
        assert_eq!(Direction::Received.unread_increment(), 1);
        assert_eq!(Direction::Sent.unread_increment(), 0);
    }

    #[test]
    fn preview_falls_back_to_file_name() {
        let file = FileRef {
            file_name: Some("nota.pdf".into()),
            ..Default::default()
        };
        assert_eq!(preview("", &file), "📎 nota.pdf");
        assert_eq!(preview("oi", &file), "oi");
        assert_eq!(preview(" ", &FileRef::default()), "");
    }
}
