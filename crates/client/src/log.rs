//! Optimistic local message state.
//!
//! Locally authored messages are inserted under their client message id with
//! status `sending` and reconciled in place once the relay acknowledges them.

use std::collections::HashMap;

use chrono::Utc;
use courier_chats::{ChatId, MessageId, MessageRecord, MessageStatus, UserId};

/// Per-chat message lists plus unread counters.
#[derive(Debug, Default)]
pub struct MessageLog {
    chats: HashMap<ChatId, Vec<MessageRecord>>,
    /// client message id -> chat holding the optimistic entry
    pending: HashMap<String, ChatId>,
    unread: HashMap<ChatId, usize>,
    active_chat: Option<ChatId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a locally authored message with status `sending`.
    pub fn insert_local(
        &mut self,
        chat_id: &ChatId,
        sender: &UserId,
        content: &str,
        client_message_id: &str,
    ) -> MessageRecord {
        let record = MessageRecord {
            id: MessageId::new(client_message_id),
            chat_id: chat_id.clone(),
            sender: sender.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Sending,
        };
        self.chats
            .entry(chat_id.clone())
            .or_default()
            .push(record.clone());
        self.pending
            .insert(client_message_id.to_string(), chat_id.clone());
        record
    }

    /// Replace the optimistic entry with the server's record, keeping its
    /// position in the list. Returns the reconciled record.
    pub fn reconcile_sent(
        &mut self,
        client_message_id: &str,
        server: MessageRecord,
    ) -> MessageRecord {
        let chat_id = self
            .pending
            .remove(client_message_id)
            .unwrap_or_else(|| server.chat_id.clone());
        let messages = self.chats.entry(chat_id).or_default();

        // A status update may have raced ahead of the acknowledgement.
        if let Some(existing) = messages.iter_mut().find(|m| m.id == server.id) {
            if existing.status.can_advance_to(server.status) {
                existing.status = server.status;
            }
            let reconciled = existing.clone();
            messages.retain(|m| m.id.as_str() != client_message_id);
            return reconciled;
        }

        let local_id = MessageId::new(client_message_id);
        match messages.iter_mut().find(|m| m.id == local_id) {
            Some(local) => {
                let status = if local.status.can_advance_to(server.status)
                    || local.status == MessageStatus::Failed
                {
                    server.status
                } else {
                    local.status
                };
                *local = MessageRecord { status, ..server };
                local.clone()
            }
            None => {
                messages.push(server.clone());
                server
            }
        }
    }

    /// Insert a message received from the relay. Duplicates (by id) are
    /// suppressed and return `false`.
    pub fn insert_remote(&mut self, record: MessageRecord, own: Option<&UserId>) -> bool {
        let messages = self.chats.entry(record.chat_id.clone()).or_default();
        if messages.iter().any(|m| m.id == record.id) {
            return false;
        }

        let from_self = own.is_some_and(|me| *me == record.sender);
        if !from_self && self.active_chat.as_ref() != Some(&record.chat_id) {
            *self.unread.entry(record.chat_id.clone()).or_default() += 1;
        }
        messages.push(record);
        true
    }

    /// Advance a message's status. Only forward transitions apply.
    pub fn advance(&mut self, message_id: &MessageId, status: MessageStatus) -> bool {
        let Some(message) = self.find_mut(message_id) else {
            return false;
        };
        if !message.status.can_advance_to(status) {
            return false;
        }
        message.status = status;
        true
    }

    /// Mark an optimistic message as failed.
    pub fn mark_failed(&mut self, client_message_id: &str) -> bool {
        let Some(chat_id) = self.pending.remove(client_message_id) else {
            return false;
        };
        let local_id = MessageId::new(client_message_id);
        self.chats
            .get_mut(&chat_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == local_id))
            .map(|message| {
                let advanced = message.status.can_advance_to(MessageStatus::Failed);
                if advanced {
                    message.status = MessageStatus::Failed;
                }
                advanced
            })
            .unwrap_or(false)
    }

    /// Mark every unacknowledged message as failed, returning their client ids.
    pub fn fail_pending(&mut self) -> Vec<String> {
        let mut pending: Vec<String> = self.pending.keys().cloned().collect();
        pending.sort();
        pending
            .into_iter()
            .filter(|client_message_id| self.mark_failed(client_message_id))
            .collect()
    }

    /// Merge fetched history into a chat. Known ids are skipped and the list
    /// is re-ordered by creation time.
    pub fn merge_history(&mut self, chat_id: &ChatId, history: Vec<MessageRecord>) -> usize {
        let messages = self.chats.entry(chat_id.clone()).or_default();
        let mut added = 0;
        for record in history {
            if record.chat_id != *chat_id || messages.iter().any(|m| m.id == record.id) {
                continue;
            }
            messages.push(record);
            added += 1;
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        added
    }

    pub fn messages(&self, chat_id: &ChatId) -> Vec<MessageRecord> {
        self.chats.get(chat_id).cloned().unwrap_or_default()
    }

    pub fn status_of(&self, message_id: &MessageId) -> Option<MessageStatus> {
        self.chats
            .values()
            .flatten()
            .find(|m| m.id == *message_id)
            .map(|m| m.status)
    }

    pub fn unread_count(&self, chat_id: &ChatId) -> usize {
        self.unread.get(chat_id).copied().unwrap_or(0)
    }

    /// Make `chat_id` the chat in view and clear its unread counter.
    pub fn set_active(&mut self, chat_id: Option<ChatId>) {
        if let Some(chat_id) = &chat_id {
            self.unread.remove(chat_id);
        }
        self.active_chat = chat_id;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn find_mut(&mut self, message_id: &MessageId) -> Option<&mut MessageRecord> {
        self.chats
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.id == *message_id)
    }
}
