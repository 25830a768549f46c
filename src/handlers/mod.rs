pub mod payments;
pub mod webhook;

use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub processor_circuit: String,
    pub tracked_transactions: usize,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let processor_circuit = state.gateway.circuit_state();
    let status = if processor_circuit == "open" {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        processor_circuit,
        tracked_transactions: state.coordinator.cache().len().await,
    })
}
