//! Gemini Live engine implementation.

use crate::config::LiveConfig;
use crate::error::Result;
use crate::model::LiveEngine;
use crate::session::BoxedConnection;
use async_trait::async_trait;
use std::sync::Arc;

use super::session::GeminiLiveConnection;
use super::{GEMINI_LIVE_ENDPOINT, GeminiLiveBackend};

/// Gemini Live engine for opening live connections.
///
/// # Example
///
/// ```rust,ignore
/// use voxbridge_realtime::gemini::{GeminiLiveBackend, GeminiLiveEngine};
///
/// let engine = GeminiLiveEngine::new(GeminiLiveBackend::studio("key"));
/// let connection = engine.connect(&config).await?;
/// ```
#[derive(Debug)]
pub struct GeminiLiveEngine {
    backend: GeminiLiveBackend,
    endpoint: String,
}

impl GeminiLiveEngine {
    /// Create an engine against the public endpoint.
    pub fn new(backend: GeminiLiveBackend) -> Self {
        Self { backend, endpoint: GEMINI_LIVE_ENDPOINT.to_string() }
    }

    /// Use a different endpoint (scheme and host), e.g. a proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Get the backend configuration.
    pub fn backend(&self) -> &GeminiLiveBackend {
        &self.backend
    }

    /// Endpoint the engine connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LiveEngine for GeminiLiveEngine {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn connect(&self, config: &LiveConfig) -> Result<BoxedConnection> {
        let connection =
            GeminiLiveConnection::connect(&self.backend, &self.endpoint, config).await?;
        Ok(Arc::new(connection))
    }
}
