//! Domain entities for the relay.
//!
//! These are plain data carriers shared by the relay, the persistence
//! collaborators and the client runtime.

pub mod chat;
pub mod ids;
pub mod message;

pub use chat::ChatRoom;
pub use ids::{ChannelId, ChatId, MessageId, UserId};
pub use message::{MessageRecord, MessageStatus};
