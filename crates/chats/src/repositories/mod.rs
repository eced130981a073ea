//! Persistence contract for the relay.
//!
//! The relay never talks to a database directly; it consumes a
//! [`MessageStore`]. The in-memory implementation backs tests and the
//! development server.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::MessageStore;
