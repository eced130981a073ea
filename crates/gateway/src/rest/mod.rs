//! HTTP endpoints for the relay

pub mod health;

use axum::{routing::get, Router};

use crate::state::RelayHub;

pub fn create_rest_routes() -> Router<RelayHub> {
    Router::new().route("/health", get(health::health_check))
}
