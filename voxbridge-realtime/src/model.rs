//! Core LiveEngine trait definition.

use crate::audio::AudioFormat;
use crate::config::LiveConfig;
use crate::error::Result;
use crate::session::BoxedConnection;
use async_trait::async_trait;

/// A factory for live duplex connections to a conversation engine.
///
/// Each provider implements this trait with its specific connection logic.
/// The session manager calls [`connect`](Self::connect) once per attempt,
/// passing the config with the latest resumption handle filled in.
///
/// # Example
///
/// ```rust,ignore
/// use voxbridge_realtime::{LiveConfig, LiveEngine};
/// use voxbridge_realtime::gemini::{GeminiLiveBackend, GeminiLiveEngine};
///
/// let engine = GeminiLiveEngine::new(GeminiLiveBackend::from_env()?);
/// let connection = engine.connect(&LiveConfig::default()).await?;
/// ```
#[async_trait]
pub trait LiveEngine: Send + Sync {
    /// Provider name (e.g. "gemini").
    fn provider(&self) -> &str;

    /// Input audio format the engine expects.
    fn input_format(&self) -> AudioFormat {
        AudioFormat::pcm16_16khz()
    }

    /// Output audio format the engine produces.
    fn output_format(&self) -> AudioFormat {
        AudioFormat::pcm16_24khz()
    }

    /// Open a connection and complete the setup handshake.
    async fn connect(&self, config: &LiveConfig) -> Result<BoxedConnection>;
}

/// A shared engine type.
pub type BoxedEngine = std::sync::Arc<dyn LiveEngine>;
