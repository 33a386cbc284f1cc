//! Call session orchestrator.
//!
//! A [`CallSession`] owns everything one call needs: the audio bridge, the
//! conversation session manager and the media transport. Transport events
//! are consumed by a per-session pump task; the first remote audio track
//! starts the engine side, video is drained, and a terminal transport state
//! tears the session down.
//!
//! Teardown goes through [`CallSession::cleanup`], whichever trigger comes
//! first: local hangup, remote hangup, transport failure or engine failure.
//! Only the first call does any work, and the [`SessionEnded`] notification
//! is sent exactly once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use voxbridge_realtime::{
    AudioBridge, BoxedEngine, BridgeConfig, ConversationSessionManager, FrameSource, LiveConfig,
    LogOutputSink, OutputSink, ReconnectPolicy, ToolRegistry,
};
use voxbridge_telemetry::call_session_span;

use crate::error::{CallError, Result};
use crate::ice::IceCandidate;
use crate::signaling::{RtcIceMessage, SessionDescription, SignalingMessage, SignalingSink};
use crate::transport::{
    BoxedTransport, RemoteTrack, TransportConnector, TransportEvent, TransportHandle,
    TransportState,
};
use crate::video::discard_video;

/// Who placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We called the remote peer.
    Outbound,
    /// The remote peer called us.
    Inbound,
}

impl Direction {
    /// `"outbound"` or `"inbound"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

/// Lifecycle of a call.
///
/// `Idle → Offering | Answering → Connected → Cleaning → Closed`. A session
/// never leaves `Cleaning` except to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Created, nothing negotiated.
    Idle,
    /// Our offer is out, waiting for the answer.
    Offering,
    /// We answered a remote offer.
    Answering,
    /// The transport is connected.
    Connected,
    /// Teardown in progress.
    Cleaning,
    /// All resources released.
    Closed,
}

impl CallState {
    /// Whether teardown has started.
    pub fn is_ending(&self) -> bool {
        matches!(self, Self::Cleaning | Self::Closed)
    }
}

/// Why a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Hung up locally.
    Hangup,
    /// The remote party hung up.
    RemoteHangup,
    /// The transport reached a terminal state.
    TransportFailed(TransportState),
    /// Offer/answer exchange failed.
    NegotiationFailed(String),
    /// The engine side gave up.
    EngineFailed(String),
    /// The process is shutting down.
    Shutdown,
}

/// Sent once per session when it has been torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    /// Session id.
    pub session_id: String,
    /// Remote peer of the ended call.
    pub remote_peer: String,
    /// Why it ended.
    pub reason: EndReason,
}

/// Engine-side settings shared by every call.
#[derive(Clone)]
pub struct CallSettings {
    /// Conversation engine.
    pub engine: BoxedEngine,
    /// Live session config.
    pub live: LiveConfig,
    /// Audio bridge config.
    pub bridge: BridgeConfig,
    /// Local tools.
    pub tools: ToolRegistry,
    /// Reconnect policy.
    pub policy: ReconnectPolicy,
    /// Where engine text goes.
    pub sink: Arc<dyn OutputSink>,
}

impl CallSettings {
    /// Defaults for everything but the engine.
    pub fn new(engine: BoxedEngine) -> Self {
        Self {
            engine,
            live: LiveConfig::default(),
            bridge: BridgeConfig::default(),
            tools: ToolRegistry::new(),
            policy: ReconnectPolicy::default(),
            sink: Arc::new(LogOutputSink),
        }
    }

    /// Set the live config.
    pub fn with_live_config(mut self, live: LiveConfig) -> Self {
        self.live = live;
        self
    }

    /// Set the bridge config.
    pub fn with_bridge_config(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    /// Set the local tools.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the reconnect policy.
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the output sink.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl fmt::Debug for CallSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSettings")
            .field("provider", &self.engine.provider())
            .field("model", &self.live.model)
            .field("bridge", &self.bridge)
            .field("tools", &self.tools.len())
            .field("policy", &self.policy)
            .finish()
    }
}

struct Inner {
    id: String,
    remote_peer: String,
    direction: Direction,
    created_at: DateTime<Utc>,
    bridge: Arc<AudioBridge>,
    manager: Arc<ConversationSessionManager>,
    transport: BoxedTransport,
    signaling: Arc<dyn SignalingSink>,
    state: watch::Sender<CallState>,
    cleaned: AtomicBool,
    engine_started: AtomicBool,
    cancel: CancellationToken,
    ended: mpsc::UnboundedSender<SessionEnded>,
}

/// One call between the local engine and a remote peer.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<Inner>,
}

impl CallSession {
    /// Create a session: build its bridge and manager, open a transport and
    /// start consuming transport events.
    ///
    /// `ended` receives one [`SessionEnded`] when the session is torn down.
    pub async fn open(
        remote_peer: impl Into<String>,
        direction: Direction,
        settings: &CallSettings,
        connector: &dyn TransportConnector,
        signaling: Arc<dyn SignalingSink>,
        ended: mpsc::UnboundedSender<SessionEnded>,
    ) -> Result<Self> {
        let remote_peer = remote_peer.into();
        let bridge = Arc::new(AudioBridge::new(settings.bridge.clone())?);
        let manager = Arc::new(
            ConversationSessionManager::builder(settings.engine.clone(), bridge.clone())
                .config(settings.live.clone())
                .tools(settings.tools.clone())
                .sink(settings.sink.clone())
                .policy(settings.policy.clone())
                .build(),
        );
        let TransportHandle { transport, events } = connector.open(bridge.playback_track()).await?;

        let (state, _) = watch::channel(CallState::Idle);
        let session = Self {
            inner: Arc::new(Inner {
                id: uuid::Uuid::new_v4().to_string(),
                remote_peer,
                direction,
                created_at: Utc::now(),
                bridge,
                manager,
                transport,
                signaling,
                state,
                cleaned: AtomicBool::new(false),
                engine_started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                ended,
            }),
        };

        let span = call_session_span(&session.inner.remote_peer, direction.as_str());
        tracing::info!(
            parent: &span,
            session_id = %session.inner.id,
            "Call session created"
        );
        tokio::spawn(session.clone().pump_events(events).instrument(span));
        Ok(session)
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Remote peer id.
    pub fn remote_peer(&self) -> &str {
        &self.inner.remote_peer
    }

    /// Call direction.
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// When the session was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current state.
    pub fn state(&self) -> CallState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.inner.state.subscribe()
    }

    /// The session's audio bridge.
    pub fn bridge(&self) -> &Arc<AudioBridge> {
        &self.inner.bridge
    }

    /// The session's conversation manager.
    pub fn manager(&self) -> &Arc<ConversationSessionManager> {
        &self.inner.manager
    }

    /// Whether teardown has been triggered.
    pub fn is_cleaned_up(&self) -> bool {
        self.inner.cleaned.load(Ordering::SeqCst)
    }

    /// Wait until the session is closed.
    pub async fn closed(&self) {
        let mut state = self.subscribe();
        let _ = state.wait_for(|s| *s == CallState::Closed).await;
    }

    /// Place the call: create an offer and send it to the remote peer.
    pub async fn initiate(&self) -> Result<()> {
        self.transition(CallState::Idle, CallState::Offering)?;
        tracing::info!(remote_peer = %self.remote_peer(), "Initiating outbound call");

        let result = async {
            let offer = self.inner.transport.create_offer().await?;
            let message =
                SignalingMessage::Call { callee_id: self.remote_peer().into(), rtc_message: offer };
            self.inner.signaling.send(message).await
        }
        .await;
        self.fail_negotiation(result).await
    }

    /// Answer an incoming offer.
    pub async fn accept_incoming(&self, offer: &SessionDescription) -> Result<()> {
        self.transition(CallState::Idle, CallState::Answering)?;
        tracing::info!(remote_peer = %self.remote_peer(), "Answering incoming call");

        let result = async {
            let answer = self.inner.transport.handle_remote_offer(offer).await?;
            let message = SignalingMessage::AnswerCall {
                caller_id: self.remote_peer().into(),
                rtc_message: answer,
            };
            self.inner.signaling.send(message).await
        }
        .await;
        self.fail_negotiation(result).await
    }

    /// Apply the remote answer to our offer.
    pub async fn handle_answer(&self, answer: &SessionDescription) -> Result<()> {
        let state = self.state();
        if state != CallState::Offering {
            return Err(CallError::invalid_state(format!("answer received while {state:?}")));
        }
        tracing::info!(remote_peer = %self.remote_peer(), "Call answered");
        let result = self.inner.transport.handle_remote_answer(answer).await;
        self.fail_negotiation(result).await
    }

    /// Add a candidate trickled by the remote peer.
    ///
    /// A malformed candidate is an error for this call only; the session
    /// keeps running.
    pub async fn add_remote_candidate(&self, message: &RtcIceMessage) -> Result<()> {
        if self.is_cleaned_up() {
            return Err(CallError::invalid_state("session is closed"));
        }
        let candidate = IceCandidate::from_message(message)?;
        self.inner.transport.add_ice_candidate(&candidate).await?;
        tracing::debug!(
            remote_peer = %self.remote_peer(),
            candidate_type = %candidate.candidate_type,
            "Added remote ICE candidate"
        );
        Ok(())
    }

    /// Hang up: tell the remote peer, then tear down.
    ///
    /// Returns `false` when the session was already torn down.
    pub async fn hangup(&self) -> bool {
        if self.is_cleaned_up() {
            tracing::debug!(remote_peer = %self.remote_peer(), "Hangup on a closed session");
            return false;
        }
        let message = SignalingMessage::Hangup { target_id: self.remote_peer().into() };
        if let Err(e) = self.inner.signaling.send(message).await {
            tracing::warn!(error = %e, "Failed to send hangup");
        }
        self.cleanup(EndReason::Hangup).await
    }

    /// The remote party hung up.
    pub async fn remote_hangup(&self) -> bool {
        self.cleanup(EndReason::RemoteHangup).await
    }

    /// Tear the session down.
    ///
    /// The first call stops the engine side, closes the transport and sends
    /// the [`SessionEnded`] notification; later calls return `false`
    /// immediately.
    pub async fn cleanup(&self, reason: EndReason) -> bool {
        if self.inner.cleaned.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                remote_peer = %self.remote_peer(),
                ?reason,
                "Cleanup already performed, skipping"
            );
            return false;
        }

        tracing::info!(remote_peer = %self.remote_peer(), ?reason, "Cleaning up call session");
        self.inner.state.send_replace(CallState::Cleaning);
        self.inner.cancel.cancel();
        self.inner.manager.stop().await;
        if let Err(e) = self.inner.transport.close().await {
            tracing::warn!(error = %e, "Error closing transport");
        }
        self.inner.state.send_replace(CallState::Closed);

        let ended = SessionEnded {
            session_id: self.inner.id.clone(),
            remote_peer: self.inner.remote_peer.clone(),
            reason,
        };
        if self.inner.ended.send(ended).is_err() {
            tracing::debug!("Nobody is listening for session end");
        }
        true
    }

    fn transition(&self, from: CallState, to: CallState) -> Result<()> {
        let mut current = from;
        let moved = self.inner.state.send_if_modified(|state| {
            current = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(CallError::invalid_state(format!("cannot move to {to:?} from {current:?}")))
        }
    }

    async fn fail_negotiation(&self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            tracing::error!(remote_peer = %self.remote_peer(), error = %e, "Negotiation failed");
            self.cleanup(EndReason::NegotiationFailed(e.to_string())).await;
        }
        result
    }

    async fn pump_events(self, mut events: mpsc::Receiver<TransportEvent>) {
        let cancel = self.inner.cancel.clone();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                tracing::debug!("Transport event stream ended");
                break;
            };

            match event {
                TransportEvent::LocalCandidate(candidate) => {
                    let message = SignalingMessage::IceCandidate {
                        callee_id: self.remote_peer().into(),
                        rtc_message: candidate,
                    };
                    if let Err(e) = self.inner.signaling.send(message).await {
                        tracing::warn!(error = %e, "Failed to forward local ICE candidate");
                    }
                }
                TransportEvent::RemoteTrack(RemoteTrack::Audio(source)) => {
                    self.start_engine(source);
                }
                TransportEvent::RemoteTrack(RemoteTrack::Video(source)) => {
                    tracing::info!("Remote video track received, discarding");
                    tokio::spawn(discard_video(source, cancel.child_token()).in_current_span());
                }
                TransportEvent::ConnectionState(state) => {
                    tracing::info!(%state, "Transport state changed");
                    if state == TransportState::Connected {
                        self.inner.state.send_if_modified(|s| {
                            let connect = matches!(
                                s,
                                CallState::Idle | CallState::Offering | CallState::Answering
                            );
                            if connect {
                                *s = CallState::Connected;
                            }
                            connect
                        });
                    } else if state.is_terminal() {
                        self.cleanup(EndReason::TransportFailed(state)).await;
                        break;
                    }
                }
            }
        }
    }

    fn start_engine(&self, mut source: Box<dyn FrameSource>) {
        if self.inner.engine_started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Ignoring additional remote audio track");
            return;
        }
        tracing::info!("Remote audio track received, starting engine session");

        let session = self.clone();
        tokio::spawn(
            async move {
                match session.inner.manager.start(source.as_mut()).await {
                    Ok(()) => tracing::info!("Engine session finished"),
                    Err(e) => {
                        tracing::error!(error = %e, "Engine session failed");
                        session.cleanup(EndReason::EngineFailed(e.to_string())).await;
                    }
                }
            }
            .in_current_span(),
        );
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.inner.id)
            .field("remote_peer", &self.inner.remote_peer)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}
