use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::codec::{AudioCodec, RemoteCodec};
use crate::core::hardware::HardwareProfile;
use crate::core::inference::{InferenceClient, TokenSource};
use crate::core::pipeline::SpeechPipeline;
use crate::errors::{AppError, AppResult};

/// Application state shared by every handler
pub struct AppState {
    pub config: ServerConfig,
    pub pipeline: SpeechPipeline,
}

impl AppState {
    /// Build the state with HTTP clients for the inference and codec services.
    pub fn new(config: ServerConfig, profile: HardwareProfile) -> AppResult<Arc<Self>> {
        let token_source: Arc<dyn TokenSource> = Arc::new(
            InferenceClient::new(config.inference_config())
                .map_err(|e| AppError::Internal(e.to_string()))?,
        );
        let codec: Arc<dyn AudioCodec> = Arc::new(
            RemoteCodec::new(config.codec_config())
                .map_err(|e| AppError::Internal(e.to_string()))?,
        );

        info!(
            inference_url = %config.inference_url,
            codec_url = %config.codec_url,
            "Upstream clients configured"
        );

        let pipeline =
            SpeechPipeline::new(config.pipeline_config(), profile, token_source, codec);
        Ok(Self::with_pipeline(config, pipeline))
    }

    /// Build the state around an existing pipeline
    pub fn with_pipeline(config: ServerConfig, pipeline: SpeechPipeline) -> Arc<Self> {
        Arc::new(Self { config, pipeline })
    }
}
