//! # Courier Gateway Crate
//!
//! The presence and message-delivery relay. It keeps one live channel per
//! connected client, tracks multi-device presence and typing with
//! debouncing, fans persisted messages out to participants' live channels,
//! and routes delivery and read acknowledgements back to senders.
//!
//! ## Architecture
//!
//! - **Registry**: identity to set of live channels
//! - **Presence**: debounced online/offline and per-chat typing state
//! - **Relay**: fan-out of persisted messages
//! - **Acks**: monotonic delivery/read status ledger
//! - **State**: the `RelayHub` that owns all of the above behind one lock
//! - **WebSocket / REST**: the axum surface (`GET /ws`, `GET /health`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier_auth::StaticVerifier;
//! use courier_chats::MemoryStore;
//! use courier_gateway::{create_router, RelayHub, RelaySettings};
//!
//! # async fn run() -> std::io::Result<()> {
//! let hub = RelayHub::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticVerifier::new()),
//!     RelaySettings::default(),
//! );
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:7070").await?;
//! axum::serve(listener, create_router(hub)).await
//! # }
//! ```

pub mod acks;
pub mod error;
mod handlers;
pub mod middleware;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{RelayError, RelayResult};
pub use state::{ChannelSession, Flow, HubCounts, RelayHub, RelaySettings};

use axum::{middleware as axum_middleware, routing::get, Router};

/// Create the relay router: `GET /ws`, `GET /health`.
pub fn create_router(hub: RelayHub) -> Router {
    Router::new()
        .merge(rest::create_rest_routes())
        .route("/ws", get(websocket::relay_websocket_handler))
        .with_state(hub)
        .layer(middleware::create_cors_layer())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
