use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{speech, voices};
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router with protected routes
///
/// Note: Authentication middleware is applied by [`super::create_app`]
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/audio/speech", post(speech::create_speech))
        .route("/v1/audio/speech/stream", post(speech::stream_speech))
        .route("/v1/audio/voices", get(voices::list_voices))
        .route("/api/tts/stream", post(speech::stream_pcm))
        .layer(TraceLayer::new_for_http())
}
