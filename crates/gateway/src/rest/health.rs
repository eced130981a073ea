use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::state::RelayHub;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub connected_identities: usize,
    pub open_channels: usize,
}

pub async fn health_check(State(hub): State<RelayHub>) -> Json<HealthResponse> {
    let counts = hub.counts().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        connected_identities: counts.identities,
        open_channels: counts.channels,
    })
}
