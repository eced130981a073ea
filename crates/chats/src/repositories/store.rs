use async_trait::async_trait;

use crate::entities::{ChatId, ChatRoom, MessageId, MessageRecord, MessageStatus, UserId};
use crate::types::ChatResult;

/// Persistence collaborator consumed by the relay.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message authored by `sender`. The returned record
    /// carries the server id, creation timestamp and status `sending`.
    async fn create_message(
        &self,
        sender: &UserId,
        chat_id: &ChatId,
        content: &str,
    ) -> ChatResult<MessageRecord>;

    /// Resolve the participant identities of a chat.
    async fn participants_of(&self, chat_id: &ChatId) -> ChatResult<Vec<UserId>>;

    async fn find_message(&self, message_id: &MessageId) -> ChatResult<Option<MessageRecord>>;

    /// Write back a status change. Regressions are ignored.
    async fn update_status(&self, message_id: &MessageId, status: MessageStatus)
        -> ChatResult<()>;

    async fn create_chat(&self, participants: Vec<UserId>) -> ChatResult<ChatRoom>;
}
