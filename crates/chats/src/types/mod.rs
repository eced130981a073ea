//! Shared types for the relay protocol.
//!
//! This module contains the wire events exchanged over a channel and the
//! error definitions used by the persistence collaborators.

pub mod errors;
pub mod events;

pub use errors::{ChatError, ChatResult};
pub use events::{ClientEvent, ErrorCode, PresenceStatus, ServerEvent};
