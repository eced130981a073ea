//! # Courier Chats Crate
//!
//! Domain vocabulary shared by every part of the relay: identifiers, the
//! message record and its status lattice, the JSON wire protocol, and the
//! persistence collaborator contract.
//!
//! ## Architecture
//!
//! - **Entities**: Identifiers, messages and chat rooms
//! - **Repositories**: The `MessageStore` contract plus an in-memory implementation
//! - **Types**: Wire events and error definitions
//! - **Utils**: Input validation
//!
//! ## Usage
//!
//! ```rust
//! use courier_chats::{MemoryStore, MessageStore, UserId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = MemoryStore::new();
//! let alice = UserId::from("alice");
//! let bob = UserId::from("bob");
//! let room = store.create_chat(vec![alice.clone(), bob]).await?;
//! let message = store.create_message(&alice, &room.id, "hi").await?;
//! assert_eq!(message.content, "hi");
//! # Ok::<(), courier_chats::ChatError>(())
//! # }).unwrap();
//! ```

pub mod entities;
pub mod repositories;
pub mod types;
pub mod utils;

pub use entities::{ChannelId, ChatId, ChatRoom, MessageId, MessageRecord, MessageStatus, UserId};
pub use repositories::{MemoryStore, MessageStore};
pub use types::{
    ChatError, ChatResult, ClientEvent, ErrorCode, PresenceStatus, ServerEvent,
};
