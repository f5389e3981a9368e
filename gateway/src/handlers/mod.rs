//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `speech` - Buffered, streaming WAV and raw PCM speech synthesis
//! - `voices` - Voice listing endpoint

pub mod api;
pub mod speech;
pub mod voices;
