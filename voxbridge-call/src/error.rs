//! Error types for call orchestration.

use thiserror::Error;
use voxbridge_realtime::RealtimeError;

/// Result type for call operations.
pub type Result<T> = std::result::Result<T, CallError>;

/// Errors raised while setting up, running or tearing down a call.
#[derive(Error, Debug)]
pub enum CallError {
    /// The media transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Offer/answer negotiation failed.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// A remote ICE candidate could not be parsed.
    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    /// The signaling relay could not be reached or sent garbage.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The operation does not fit the session's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Engine side failure.
    #[error("Engine error: {0}")]
    Engine(#[from] RealtimeError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CallError {
    /// Create a new transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new negotiation error.
    pub fn negotiation<S: Into<String>>(msg: S) -> Self {
        Self::Negotiation(msg.into())
    }

    /// Create a new invalid candidate error.
    pub fn candidate<S: Into<String>>(msg: S) -> Self {
        Self::InvalidCandidate(msg.into())
    }

    /// Create a new signaling error.
    pub fn signaling<S: Into<String>>(msg: S) -> Self {
        Self::Signaling(msg.into())
    }

    /// Create a new invalid state error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }
}
