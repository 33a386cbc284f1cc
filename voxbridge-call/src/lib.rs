//! # voxbridge-call
//!
//! The call side of voxbridge: one [`CallSession`] per call between a
//! peer-to-peer media transport and a live conversation engine.
//!
//! ## Overview
//!
//! - [`CallSession`]: per-call state machine. Owns an audio bridge, a
//!   conversation session manager and a media transport, and tears them all
//!   down exactly once.
//! - [`CallRegistry`]: routes signaling relay events to sessions by peer id
//!   and auto-answers incoming calls.
//! - [`MediaTransport`] / [`TransportConnector`]: the transport seam, with
//!   typed [`TransportEvent`]s instead of callbacks.
//! - [`SignalingMessage`] / [`SignalingEvent`]: the relay's JSON schema, and
//!   a WebSocket client behind the `ws-signaling` feature.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voxbridge_call::{CallRegistry, CallSettings, WsSignalingClient};
//! use voxbridge_realtime::gemini::{GeminiLiveBackend, GeminiLiveEngine};
//!
//! let engine = Arc::new(GeminiLiveEngine::new(GeminiLiveBackend::from_env()?));
//! let (signaling, events) =
//!     WsSignalingClient::connect("ws://localhost:3500/ws", "666666").await?;
//! let settings = CallSettings::new(engine);
//! let registry = CallRegistry::new("666666", settings, connector, Arc::new(signaling));
//! registry.run(events).await;
//! ```

pub mod error;
pub mod ice;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod video;
#[cfg(feature = "ws-signaling")]
pub mod ws;

pub use error::{CallError, Result};
pub use ice::IceCandidate;
pub use registry::CallRegistry;
pub use session::{CallSession, CallSettings, CallState, Direction, EndReason, SessionEnded};
pub use signaling::{
    RtcIceMessage, SdpType, SessionDescription, SignalingEvent, SignalingMessage, SignalingSink,
};
pub use transport::{
    BoxedTransport, MediaTransport, RemoteTrack, TransportConnector, TransportEvent,
    TransportHandle, TransportState,
};
pub use video::{VideoFrame, VideoSource, discard_video};
#[cfg(feature = "ws-signaling")]
pub use ws::WsSignalingClient;
