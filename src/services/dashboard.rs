use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Agent, ConnectionStatus, Conversation, ConversationStatus, Direction},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentLoad {
    pub agent_id: Option<Uuid>,
    pub name: String,
    pub open: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyMessages {
    pub date: NaiveDate,
    pub sent: usize,
    pub received: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionCounts {
    pub connected: usize,
    pub connecting: usize,
    pub disconnected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardMetrics {
    pub total_conversations: usize,
    pub open_conversations: usize,
    pub closed_conversations: usize,
    pub total_unread: i64,
    pub by_channel: Vec<Bucket>,
    pub by_stage: Vec<Bucket>,
    pub by_agent: Vec<AgentLoad>,
    pub messages_per_day: Vec<DailyMessages>,
    pub connections: ConnectionCounts,
    pub pending_profiles: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageStat {
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::from("unknown"),
    }
}

fn buckets<I: IntoIterator<Item = String>>(keys: I) -> Vec<Bucket> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut result: Vec<Bucket> = counts
        .into_iter()
        .map(|(key, count)| Bucket { key, count })
        .collect();
    result.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    result
}

pub fn agent_loads(conversations: &[Conversation], agents: &[Agent]) -> Vec<AgentLoad> {
    let names: HashMap<Uuid, &str> = agents.iter().map(|a| (a.id, a.name.as_str())).collect();
    let mut loads: HashMap<Option<Uuid>, (usize, usize)> = HashMap::new();

    for conversation in conversations {
        let entry = loads.entry(conversation.assigned_to).or_default();
        entry.1 += 1;
        if conversation.status == ConversationStatus::Open {
            entry.0 += 1;
        }
    }

    let mut result: Vec<AgentLoad> = loads
        .into_iter()
        .map(|(agent_id, (open, total))| AgentLoad {
            agent_id,
            name: match agent_id {
                Some(id) => names.get(&id).copied().unwrap_or("Agente removido").to_string(),
                None => "Sem responsável".to_string(),
            },
            open,
            total,
        })
        .collect();
    result.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));
    result
}

/// One entry per day, oldest first, ending at `today`; days without
/// messages are reported as zeros.
pub fn messages_per_day(messages: &[MessageStat], today: NaiveDate, days: u32) -> Vec<DailyMessages> {
    let days = days.max(1) as i64;
    let start = today - Duration::days(days - 1);

    let mut series: Vec<DailyMessages> = (0..days)
        .map(|offset| DailyMessages {
            date: start + Duration::days(offset),
            sent: 0,
            received: 0,
        })
        .collect();

    for message in messages {
        let date = message.created_at.date_naive();
        if date < start || date > today {
            continue;
        }
        let slot = &mut series[(date - start).num_days() as usize];
        match message.direction {
            Direction::Sent => slot.sent += 1,
            Direction::Received => slot.received += 1,
        }
    }

    series
}

pub fn connection_counts(statuses: &[ConnectionStatus]) -> ConnectionCounts {
    statuses
        .iter()
        .fold(ConnectionCounts::default(), |mut counts, status| {
            match status {
                ConnectionStatus::Connected => counts.connected += 1,
                ConnectionStatus::Connecting => counts.connecting += 1,
                ConnectionStatus::Disconnected => counts.disconnected += 1,
            }
            counts
        })
}

pub fn aggregate(
    conversations: &[Conversation],
    agents: &[Agent],
    messages: &[MessageStat],
    connection_statuses: &[ConnectionStatus],
    pending_profiles: i64,
    today: NaiveDate,
    days: u32,
) -> DashboardMetrics {
    let open = conversations
        .iter()
        .filter(|c| c.status == ConversationStatus::Open)
        .count();

    DashboardMetrics {
        total_conversations: conversations.len(),
        open_conversations: open,
        closed_conversations: conversations.len() - open,
        total_unread: conversations.iter().map(|c| c.unread_count as i64).sum(),
        by_channel: buckets(conversations.iter().map(|c| label(&c.channel))),
        by_stage: buckets(conversations.iter().map(|c| c.crm_stage.clone())),
        by_agent: agent_loads(conversations, agents),
        messages_per_day: messages_per_day(messages, today, days),
        connections: connection_counts(connection_statuses),
        pending_profiles,
    }
}

pub struct DashboardService {
    db: PgPool,
}

impl DashboardService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn metrics(&self, days: u32) -> AppResult<DashboardMetrics> {
        let days = days.clamp(1, 90);
        let today = Utc::now().date_naive();
        let since = Utc::now() - Duration::days(days as i64);

        let conversations: Vec<Conversation> = sqlx::query_as("SELECT * FROM conversations")
            .fetch_all(&self.db)
            .await?;

        let agents: Vec<Agent> = sqlx::query_as("SELECT * FROM agents")
            .fetch_all(&self.db)
            .await?;

        let messages: Vec<MessageStat> =
            sqlx::query_as("SELECT direction, created_at FROM messages WHERE created_at >= $1")
                .bind(since)
                .fetch_all(&self.db)
                .await?;

        let connection_statuses: Vec<ConnectionStatus> =
            sqlx::query_scalar("SELECT status FROM connections")
                .fetch_all(&self.db)
                .await?;

        let (pending_profiles,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE status = 'pending'")
                .fetch_one(&self.db)
                .await?;

        Ok(aggregate(
            &conversations,
            &agents,
            &messages,
            &connection_statuses,
            pending_profiles,
            today,
            days,
        ))
    }
}
