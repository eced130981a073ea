use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::store::MessageStore;
use crate::entities::{ChatId, ChatRoom, MessageId, MessageRecord, MessageStatus, UserId};
use crate::types::{ChatError, ChatResult};
use crate::utils::Validator;

#[derive(Default)]
struct MemoryState {
    chats: HashMap<ChatId, ChatRoom>,
    messages: HashMap<MessageId, MessageRecord>,
    order: Vec<MessageId>,
}

/// Process-local `MessageStore`.
///
/// Writes can be made to fail on demand with [`MemoryStore::fail_writes`],
/// which lets callers exercise the persistence-failure path.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_message` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a chat room with a caller-chosen id.
    pub async fn insert_chat(&self, room: ChatRoom) {
        let mut state = self.state.lock().await;
        state.chats.insert(room.id.clone(), room);
    }

    /// Messages of a chat in persistence order.
    pub async fn messages_in(&self, chat_id: &ChatId) -> Vec<MessageRecord> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|message| &message.chat_id == chat_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(
        &self,
        sender: &UserId,
        chat_id: &ChatId,
        content: &str,
    ) -> ChatResult<MessageRecord> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChatError::storage("write rejected"));
        }
        Validator::message_content(content)?;

        let mut state = self.state.lock().await;
        if !state.chats.contains_key(chat_id) {
            return Err(ChatError::chat_not_found(chat_id.as_str()));
        }

        let record = MessageRecord {
            id: MessageId::new(cuid2::create_id()),
            chat_id: chat_id.clone(),
            sender: sender.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Sending,
        };

        state.order.push(record.id.clone());
        state.messages.insert(record.id.clone(), record.clone());
        debug!(message_id = %record.id, chat_id = %chat_id, "stored message");
        Ok(record)
    }

    async fn participants_of(&self, chat_id: &ChatId) -> ChatResult<Vec<UserId>> {
        let state = self.state.lock().await;
        state
            .chats
            .get(chat_id)
            .map(|room| room.participants.clone())
            .ok_or_else(|| ChatError::chat_not_found(chat_id.as_str()))
    }

    async fn find_message(&self, message_id: &MessageId) -> ChatResult<Option<MessageRecord>> {
        let state = self.state.lock().await;
        Ok(state.messages.get(message_id).cloned())
    }

    async fn update_status(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
    ) -> ChatResult<()> {
        let mut state = self.state.lock().await;
        let record = state
            .messages
            .get_mut(message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id.as_str()))?;

        if record.status.can_advance_to(status) {
            record.status = status;
        }
        Ok(())
    }

    async fn create_chat(&self, participants: Vec<UserId>) -> ChatResult<ChatRoom> {
        Validator::participants(&participants)?;

        let mut participants = participants;
        participants.sort();
        participants.dedup();

        let room = ChatRoom {
            id: ChatId::new(cuid2::create_id()),
            participants,
        };

        let mut state = self.state.lock().await;
        state.chats.insert(room.id.clone(), room.clone());
        Ok(room)
    }
}
