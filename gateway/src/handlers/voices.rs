use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct VoicesResponse {
    pub status: &'static str,
    pub voices: Vec<String>,
    pub default_voice: String,
}

/// List the voices the pipeline accepts
pub async fn list_voices(State(state): State<Arc<AppState>>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        status: "ok",
        voices: state.pipeline.voices().to_vec(),
        default_voice: state.pipeline.default_voice().to_string(),
    })
}
