//! Gemini Live API provider.
//!
//! Implements [`LiveEngine`](crate::LiveEngine) over Google's WebSocket-based
//! Live API:
//!
//! - Input audio: 16kHz mono PCM, sent as base64 `realtimeInput.mediaChunks`
//! - Output audio: 24kHz mono PCM in `serverContent.modelTurn` inline data
//! - Session resumption and sliding-window context compression in `setup`
//!
//! # Example
//!
//! ```rust,ignore
//! use voxbridge_realtime::gemini::{GeminiLiveBackend, GeminiLiveEngine};
//! use voxbridge_realtime::{LiveConfig, LiveEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = GeminiLiveEngine::new(GeminiLiveBackend::from_env()?);
//!     let connection = engine.connect(&LiveConfig::default()).await?;
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```

mod model;
mod session;

pub use model::GeminiLiveEngine;
pub use session::{GeminiLiveConnection, ServerFrame, build_setup, translate_server_message};

use crate::error::{RealtimeError, Result};
use secrecy::SecretString;

/// Default Live API endpoint (scheme and host).
pub const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com";

/// Available prebuilt voices (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Environment variable holding the Studio API key.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// How to authenticate against the Live API.
#[derive(Debug)]
pub enum GeminiLiveBackend {
    /// Google AI Studio with an API key.
    Studio {
        /// API key, appended to the connection URL.
        api_key: SecretString,
    },
}

impl GeminiLiveBackend {
    /// Studio backend with the given key.
    pub fn studio(api_key: impl Into<String>) -> Self {
        Self::Studio { api_key: SecretString::from(api_key.into()) }
    }

    /// Studio backend with the key from `GOOGLE_API_KEY`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::studio(key.trim())),
            _ => Err(RealtimeError::config(format!("{API_KEY_ENV} is not set"))),
        }
    }
}

/// Live API WebSocket URL for `api_version` under `endpoint`.
pub fn live_url(endpoint: &str, api_version: &str) -> String {
    format!(
        "{}/ws/google.ai.generativelanguage.{api_version}.GenerativeService.BidiGenerateContent",
        endpoint.trim_end_matches('/')
    )
}
