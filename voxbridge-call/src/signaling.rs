//! Signaling relay message schema.
//!
//! The relay forwards JSON frames of the form `{"event": ..., "data": {...}}`
//! between two registered clients. [`SignalingMessage`] is what this side
//! sends; [`SignalingEvent`] is what the relay delivers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{CallError, Result};

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// An offer.
    Offer,
    /// An answer.
    Answer,
}

/// An SDP offer or answer as carried in `rtcMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// SDP body.
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    /// Create an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// An ICE candidate as carried in `rtcMessage`.
///
/// Browsers send `sdpMid`/`sdpMLineIndex`; some clients use `id`/`label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcIceMessage {
    /// Raw candidate line, e.g. `candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host`.
    pub candidate: String,
    /// Media stream id.
    #[serde(rename = "sdpMid", alias = "id", default)]
    pub sdp_mid: Option<String>,
    /// Media line index.
    #[serde(rename = "sdpMLineIndex", alias = "label", default)]
    pub sdp_mline_index: Option<u16>,
}

impl RtcIceMessage {
    /// Create a candidate message.
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self { candidate: candidate.into(), sdp_mid, sdp_mline_index }
    }
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingMessage {
    /// Offer a call to `callee_id`.
    #[serde(rename = "call", rename_all = "camelCase")]
    Call { callee_id: String, rtc_message: SessionDescription },

    /// Answer a call from `caller_id`.
    #[serde(rename = "answerCall", rename_all = "camelCase")]
    AnswerCall { caller_id: String, rtc_message: SessionDescription },

    /// Trickle a local candidate to `callee_id`.
    #[serde(rename = "ICEcandidate", rename_all = "camelCase")]
    IceCandidate { callee_id: String, rtc_message: RtcIceMessage },

    /// End the call with `target_id`.
    #[serde(rename = "hangupCall", rename_all = "camelCase")]
    Hangup { target_id: String },
}

impl SignalingMessage {
    /// Relay event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::AnswerCall { .. } => "answerCall",
            Self::IceCandidate { .. } => "ICEcandidate",
            Self::Hangup { .. } => "hangupCall",
        }
    }

    /// Peer the message is addressed to.
    pub fn peer(&self) -> &str {
        match self {
            Self::Call { callee_id, .. } | Self::IceCandidate { callee_id, .. } => callee_id,
            Self::AnswerCall { caller_id, .. } => caller_id,
            Self::Hangup { target_id } => target_id,
        }
    }
}

/// Events delivered by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SignalingEvent {
    /// Incoming call with the caller's offer.
    #[serde(rename = "newCall", rename_all = "camelCase")]
    NewCall { caller_id: String, rtc_message: SessionDescription },

    /// The callee answered our offer.
    #[serde(rename = "callAnswered", rename_all = "camelCase")]
    CallAnswered { callee: String, rtc_message: SessionDescription },

    /// Remote candidate from `sender`.
    #[serde(rename = "ICEcandidate", rename_all = "camelCase")]
    IceCandidate { sender: String, rtc_message: RtcIceMessage },

    /// The remote party hung up.
    #[serde(rename = "callEnded", rename_all = "camelCase")]
    CallEnded { sender_id: String },
}

impl SignalingEvent {
    /// Peer the event came from.
    pub fn peer(&self) -> &str {
        match self {
            Self::NewCall { caller_id, .. } => caller_id,
            Self::CallAnswered { callee, .. } => callee,
            Self::IceCandidate { sender, .. } => sender,
            Self::CallEnded { sender_id } => sender_id,
        }
    }
}

/// Outbound half of the signaling channel.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    /// Deliver one message to the relay.
    async fn send(&self, message: SignalingMessage) -> Result<()>;
}

#[async_trait]
impl SignalingSink for mpsc::Sender<SignalingMessage> {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        mpsc::Sender::send(self, message)
            .await
            .map_err(|_| CallError::signaling("signaling channel closed"))
    }
}

#[async_trait]
impl SignalingSink for mpsc::UnboundedSender<SignalingMessage> {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        mpsc::UnboundedSender::send(self, message)
            .map_err(|_| CallError::signaling("signaling channel closed"))
    }
}
