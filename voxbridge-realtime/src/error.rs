//! Error types for the realtime module.

use std::time::Duration;
use thiserror::Error;

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while talking to the live engine or moving audio.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// WebSocket connection error.
    #[error("WebSocket connection error: {0}")]
    ConnectionError(String),

    /// WebSocket message error.
    #[error("WebSocket message error: {0}")]
    MessageError(String),

    /// Connection not established.
    #[error("Session not connected")]
    NotConnected,

    /// Connection already closed.
    #[error("Session already closed")]
    SessionClosed,

    /// The engine closed its event stream without a go-away notice.
    #[error("Engine stream closed")]
    StreamClosed,

    /// The engine announced it will drop the connection.
    #[error("Engine go-away, time left: {time_left:?}")]
    GoAway {
        /// Time the engine says remains before it disconnects.
        time_left: Option<Duration>,
    },

    /// Reconnect policy gave up.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio format error.
    #[error("Audio format error: {0}")]
    AudioFormatError(String),

    /// Tool execution error.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Provider-specific error.
    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl RealtimeError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new provider error.
    pub fn provider<S: Into<String>>(msg: S) -> Self {
        Self::ProviderError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::MessageError(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormatError(msg.into())
    }

    /// Create a new tool error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolError(msg.into())
    }

    /// Whether the session manager should open a new connection after this error.
    ///
    /// Configuration and reconnect-exhaustion errors are final; everything
    /// else that ends a connection attempt is answered with a resume.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConfigError(_) | Self::ReconnectExhausted { .. })
    }
}
