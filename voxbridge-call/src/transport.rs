//! The media transport seam.
//!
//! A transport adapter wraps a peer-to-peer media stack. The call session
//! drives negotiation through [`MediaTransport`] and learns about candidates,
//! remote tracks and connection state from a typed [`TransportEvent`]
//! channel instead of callbacks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use voxbridge_realtime::{FrameSource, PlaybackTrack};

use crate::error::Result;
use crate::ice::IceCandidate;
use crate::signaling::{RtcIceMessage, SessionDescription};
use crate::video::VideoSource;

/// Peer connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Created, nothing negotiated yet.
    New,
    /// ICE/DTLS in progress.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Connectivity was lost.
    Disconnected,
    /// Connectivity checks failed.
    Failed,
    /// The connection was closed.
    Closed,
}

impl TransportState {
    /// Whether this state ends the call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }

    /// Lowercase name, as transports report it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media track received from the remote peer.
pub enum RemoteTrack {
    /// Microphone audio, fed to the engine.
    Audio(Box<dyn FrameSource>),
    /// Camera video, drained and discarded.
    Video(Box<dyn VideoSource>),
}

impl RemoteTrack {
    /// `"audio"` or `"video"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Audio(_) => "audio",
            Self::Video(_) => "video",
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteTrack").field(&self.kind()).finish()
    }
}

/// Something the transport wants the session to know.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local candidate to trickle to the remote peer.
    LocalCandidate(RtcIceMessage),
    /// The remote peer added a track.
    RemoteTrack(RemoteTrack),
    /// The peer connection changed state.
    ConnectionState(TransportState),
}

/// Negotiation and teardown of one peer connection.
///
/// The outbound audio track is handed over when the transport is opened
/// (see [`TransportConnector`]); every offer and answer includes it.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a local offer and apply it.
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer and return the local answer.
    async fn handle_remote_offer(&self, offer: &SessionDescription)
    -> Result<SessionDescription>;

    /// Apply the remote answer to our offer.
    async fn handle_remote_answer(&self, answer: &SessionDescription) -> Result<()>;

    /// Add a remote candidate.
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Close the peer connection. Closing twice is not an error.
    async fn close(&self) -> Result<()>;
}

/// A shared transport type.
pub type BoxedTransport = Arc<dyn MediaTransport>;

/// An opened transport and its event stream.
pub struct TransportHandle {
    /// Negotiation interface.
    pub transport: BoxedTransport,
    /// Candidates, tracks and state changes, in order.
    pub events: mpsc::Receiver<TransportEvent>,
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle").finish_non_exhaustive()
    }
}

/// Creates one peer connection per call.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a peer connection whose outbound audio track pulls from `outbound`.
    async fn open(&self, outbound: PlaybackTrack) -> Result<TransportHandle>;
}
