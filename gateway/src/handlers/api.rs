use axum::{extract::State, response::Json};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::state::AppState;

/// Health check with the active hardware policy
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let profile = state.pipeline.profile();
    Json(json!({
        "status": "OK",
        "tier": profile.tier.as_str(),
        "workers": profile.worker_count,
        "sample_rate": state.pipeline.sample_rate(),
    }))
}
