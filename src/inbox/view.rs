use std::collections::{BTreeSet, HashMap};

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    models::{Conversation, ConversationFilter, ConversationStatus, Message},
    realtime::{ChangeEvent, ChangeKind, Table},
    services::connections::toggle_favorite,
};

/// Undo record for an optimistic status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRevert {
    pub conversation_id: Uuid,
    pub previous: ConversationStatus,
    pub applied: ConversationStatus,
}

/// Local copy of the inbox as a dashboard sees it.
///
/// Writes made here are optimistic; realtime events overwrite rows
/// wholesale, so the last applied write wins.
#[derive(Debug, Default)]
pub struct InboxView {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Vec<Message>>,
    favorites: BTreeSet<Uuid>,
}

fn decode<T: DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    match serde_json::from_value(event.record.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(table = ?event.table, kind = ?event.kind, "Ignoring malformed change event: {}", e);
            None
        }
    }
}

impl InboxView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the conversation list, keeping message lists of
    /// conversations that are still present.
    pub fn load_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations.into_iter().map(|c| (c.id, c)).collect();
        let conversations = &self.conversations;
        self.messages.retain(|id, _| conversations.contains_key(id));
    }

    pub fn conversation(&self, conversation_id: Uuid) -> Option<&Conversation> {
        self.conversations.get(&conversation_id)
    }

    /// Conversations matching `filter`, most recent activity first.
    pub fn conversations(&self, filter: &ConversationFilter) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self
            .conversations
            .values()
            .filter(|c| filter.matches(c))
            .collect();
        list.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()).then(b.number.cmp(&a.number)));
        list
    }

    pub fn total_unread(&self) -> i64 {
        self.conversations.values().map(|c| c.unread_count as i64).sum()
    }

    pub fn messages(&self, conversation_id: Uuid) -> &[Message] {
        self.messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Merge a fetched page into the local list.
    pub fn load_messages(&mut self, conversation_id: Uuid, page: Vec<Message>) {
        for message in page {
            self.upsert_message(conversation_id, message);
        }
    }

    /// Apply `status` locally. Returns `None` when the conversation is not
    /// loaded.
    pub fn begin_status_change(
        &mut self,
        conversation_id: Uuid,
        status: ConversationStatus,
    ) -> Option<StatusRevert> {
        let conversation = self.conversations.get_mut(&conversation_id)?;
        let previous = conversation.status;
        conversation.status = status;
        Some(StatusRevert {
            conversation_id,
            previous,
            applied: status,
        })
    }

    /// Undo an optimistic change. Skipped when something else (usually a
    /// realtime event) has already replaced the optimistic value.
    pub fn revert_status(&mut self, revert: StatusRevert) -> bool {
        match self.conversations.get_mut(&revert.conversation_id) {
            Some(conversation) if conversation.status == revert.applied => {
                conversation.status = revert.previous;
                true
            }
            _ => false,
        }
    }

    pub fn mark_read(&mut self, conversation_id: Uuid) -> bool {
        match self.conversations.get_mut(&conversation_id) {
            Some(conversation) => {
                conversation.unread_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn favorites(&self) -> &BTreeSet<Uuid> {
        &self.favorites
    }

    pub fn set_favorites<I: IntoIterator<Item = Uuid>>(&mut self, ids: I) {
        self.favorites = ids.into_iter().collect();
    }

    pub fn is_favorite(&self, connection_id: Uuid) -> bool {
        self.favorites.contains(&connection_id)
    }

    pub fn toggle_favorite(&mut self, connection_id: Uuid) -> bool {
        toggle_favorite(&mut self.favorites, connection_id)
    }

    /// Reconcile a realtime change. Returns whether local state changed.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        match (event.table, event.kind) {
            (Table::Conversations, ChangeKind::Delete) => match event.record_id() {
                Some(id) => {
                    self.messages.remove(&id);
                    self.conversations.remove(&id).is_some()
                }
                None => false,
            },
            (Table::Conversations, _) => match decode::<Conversation>(event) {
                Some(conversation) => {
                    self.conversations.insert(conversation.id, conversation);
                    true
                }
                None => false,
            },
            (Table::Messages, ChangeKind::Delete) => match event.record_id() {
                Some(id) => self.remove_message(id),
                None => false,
            },
            (Table::Messages, _) => match decode::<Message>(event) {
                Some(message) => self.upsert_message(message.conversation_id, message),
                None => false,
            },
            _ => false,
        }
    }

    /// Insert or replace by id, keeping the list in sequence order.
    fn upsert_message(&mut self, conversation_id: Uuid, message: Message) -> bool {
        let list = self.messages.entry(conversation_id).or_default();
        if let Some(existing) = list.iter_mut().find(|m| m.id == message.id) {
            if *existing == message {
                return false;
            }
            *existing = message;
            return true;
        }
        let at = list.partition_point(|m| m.number <= message.number);
        list.insert(at, message);
        true
    }

    fn remove_message(&mut self, message_id: Uuid) -> bool {
        for list in self.messages.values_mut() {
            if let Some(at) = list.iter().position(|m| m.id == message_id) {
                list.remove(at);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{conversation::fixtures::conversation, Direction};

    fn message(conversation_id: Uuid, number: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            number,
            conversation_id,
            body: format!("msg {}", number),
            direction: Direction::Received,
            file_url: None,
            file_name: None,
            file_type: None,
            file_size: None,
            created_at: Utc::now(),
        }
    }

    fn view_with(conversations: Vec<Conversation>) -> InboxView {
        let mut view = InboxView::new();
        view.load_conversations(conversations);
        view
    }

    #[test]
    fn status_change_reverts_to_previous_value() {
        let conv = conversation("Ana");
        let id = conv.id;
        let mut view = view_with(vec![conv]);

        let revert = view
            .begin_status_change(id, ConversationStatus::Closed)
            .unwrap();
        assert_eq!(view.conversation(id).unwrap().status, ConversationStatus::Closed);

        assert!(view.revert_status(revert));
        assert_eq!(view.conversation(id).unwrap().status, ConversationStatus::Open);
    }

    #[test]
    fn revert_yields_to_a_newer_realtime_value() {
        let conv = conversation("Ana");
        let id = conv.id;
        let mut view = view_with(vec![conv.clone()]);

        let revert = view
            .begin_status_change(id, ConversationStatus::Closed)
            .unwrap();

        // The server still reports it open; that row wins over the pending revert.
        let mut server = conv;
        server.status = ConversationStatus::Open;
        server.unread_count = 4;
        let event = ChangeEvent::new(Table::Conversations, ChangeKind::Update, &server).unwrap();
        assert!(view.apply_event(&event));

        assert!(!view.revert_status(revert));
        assert_eq!(view.conversation(id).unwrap().status, ConversationStatus::Open);
        assert_eq!(view.conversation(id).unwrap().unread_count, 4);
    }

    #[test]
    fn unknown_conversation_has_no_revert_token() {
        let mut view = InboxView::new();
        assert!(view
            .begin_status_change(Uuid::new_v4(), ConversationStatus::Closed)
            .is_none());
    }

    #[test]
    fn mark_read_clears_unread_count() {
        let mut conv = conversation("Bruno");
        conv.unread_count = 7;
        let id = conv.id;
        let mut view = view_with(vec![conv]);

        assert_eq!(view.total_unread(), 7);
        assert!(view.mark_read(id));
        assert_eq!(view.total_unread(), 0);
    }

    #[test]
    fn message_inserts_are_deduplicated_and_ordered() {
        let conv = conversation("Carla");
        let id = conv.id;
        let mut view = view_with(vec![conv]);

        let first = message(id, 1);
        let second = message(id, 2);
        let third = message(id, 3);

        view.load_messages(id, vec![first.clone(), third.clone()]);
        let insert = ChangeEvent::new(Table::Messages, ChangeKind::Insert, &second).unwrap();
        assert!(view.apply_event(&insert));
        assert!(!view.apply_event(&insert));

        let numbers: Vec<i64> = view.messages(id).iter().map(|m| m.number).collect();
        assert_eq!(numbers, [1, 2, 3]);

        // Message events never touch the conversation row.
        assert_eq!(view.conversation(id).unwrap().unread_count, 0);
    }

    #[test]
    fn deletes_remove_rows_and_their_messages() {
        let conv = conversation("Davi");
        let id = conv.id;
        let mut view = view_with(vec![conv]);
        let msg = message(id, 1);
        view.load_messages(id, vec![msg.clone()]);

        assert!(view.apply_event(&ChangeEvent::deleted(Table::Messages, msg.id)));
        assert!(view.messages(id).is_empty());

        assert!(view.apply_event(&ChangeEvent::deleted(Table::Conversations, id)));
        assert!(view.conversation(id).is_none());
        assert!(!view.apply_event(&ChangeEvent::deleted(Table::Conversations, id)));
    }

    #[test]
    fn listing_filters_and_orders_by_activity() {
        let now = Utc::now();
        let mut old = conversation("Old");
        old.last_message_at = Some(now - Duration::minutes(30));
        let mut recent = conversation("Recent");
        recent.last_message_at = Some(now);
        let mut closed = conversation("Closed");
        closed.status = ConversationStatus::Closed;

        let view = view_with(vec![old, closed, recent]);
        let filter = ConversationFilter {
            status: Some(ConversationStatus::Open),
            ..Default::default()
        };
        let names: Vec<&str> = view
            .conversations(&filter)
            .iter()
            .map(|c| c.contact_name.as_str())
            .collect();

        assert_eq!(names, ["Recent", "Old"]);
    }

    #[test]
    fn toggling_a_favorite_twice_restores_the_set() {
        let mut view = InboxView::new();
        let keep = Uuid::new_v4();
        view.set_favorites([keep]);
        let before = view.favorites().clone();

        let id = Uuid::new_v4();
        assert!(view.toggle_favorite(id));
        assert!(view.is_favorite(id));
        assert!(!view.toggle_favorite(id));
        assert_eq!(view.favorites(), &before);
    }

    #[test]
    fn unrelated_tables_are_ignored() {
        let mut view = InboxView::new();
        let event = ChangeEvent::deleted(Table::CrmStages, Uuid::new_v4());
        assert!(!view.apply_event(&event));
    }
}
