//! # Courier Client
//!
//! Client runtime for the Courier relay. A [`ChatClient`] owns one logical
//! channel: it authenticates, reconnects with a bounded number of attempts,
//! keeps an optimistic local message list and exposes pull-based
//! subscriptions for message, typing, presence, status and connection events.
//!
//! ```no_run
//! use courier_chats::{ChatId, UserId};
//! use courier_client::{ChatClient, ClientNotification, EventFilter, EventKind};
//! use courier_config::ClientConfig;
//!
//! # async fn run() -> courier_client::ClientResult<()> {
//! let client = ChatClient::connect(&ClientConfig::default(), UserId::from("alice"), "token");
//! let mut messages = client.subscribe(EventFilter::only([EventKind::Message])).await;
//!
//! client.send_message(&ChatId::from("room"), "hi").await?;
//! while let Some(ClientNotification::Message(message)) = messages.recv().await {
//!     println!("{}: {}", message.sender, message.content);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod listeners;
mod log;
mod presence;
mod runtime;
mod typing;

pub use client::ChatClient;
pub use error::{ClientError, ClientResult};
pub use listeners::{
    ClientNotification, ConnectionEvent, EventFilter, EventKind, Subscription, SubscriptionId,
};
pub use log::MessageLog;
pub use presence::PresenceView;
pub use runtime::ConnectionState;
pub use typing::{Keystroke, TypingDebouncer};
