//! Wire protocol for relay channels.
//!
//! Every frame is a JSON object tagged by `"type"`. Signal names are
//! kebab-case, fields are snake_case.

use serde::{Deserialize, Serialize};

use crate::entities::{ChatId, MessageId, MessageRecord, UserId};

/// Signals sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Bind the channel to the identity carried by `token`.
    Authenticate { token: String },
    /// Persist a message and fan it out to the chat's participants.
    SendMessage {
        chat_id: ChatId,
        content: String,
        client_message_id: String,
    },
    /// Start or stop the typing indicator for a chat.
    Typing { chat_id: ChatId, is_typing: bool },
    /// Mark a received message as read.
    MarkAsRead { message_id: MessageId },
    /// Request a presence snapshot.
    Sync,
    Ping,
}

/// Signals sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage {
        message: MessageRecord,
    },
    MessageDelivered {
        message_id: MessageId,
    },
    MessageRead {
        message_id: MessageId,
        reader: UserId,
    },
    UserStatus {
        user_id: UserId,
        status: PresenceStatus,
    },
    Typing {
        chat_id: ChatId,
        from: UserId,
        is_typing: bool,
    },
    Authenticated {
        user_id: UserId,
    },
    /// Acknowledges a `send-message` to the channel that submitted it.
    MessageSent {
        client_message_id: String,
        message: MessageRecord,
    },
    MessageFailed {
        client_message_id: String,
        reason: String,
    },
    PresenceSnapshot {
        online: Vec<UserId>,
    },
    Pong,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Machine-readable error codes carried by `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationFailed,
    NotAuthenticated,
    UnknownRecipient,
    InvalidMessage,
    PersistenceFailure,
    ChannelOwned,
    Malformed,
}
