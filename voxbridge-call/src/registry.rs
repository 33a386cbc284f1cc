//! Multi-call registry.
//!
//! Routes relay events to the call they belong to, keyed by remote peer id.
//! Incoming offers are answered automatically. Sessions are dropped from the
//! registry once their end notification arrives.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{CallError, Result};
use crate::session::{CallSession, CallSettings, Direction, EndReason, SessionEnded};
use crate::signaling::{SignalingEvent, SignalingSink};
use crate::transport::TransportConnector;

/// All calls of one local client.
pub struct CallRegistry {
    local_id: String,
    settings: CallSettings,
    connector: Arc<dyn TransportConnector>,
    signaling: Arc<dyn SignalingSink>,
    sessions: RwLock<HashMap<String, CallSession>>,
    ended_tx: mpsc::UnboundedSender<SessionEnded>,
    ended_rx: Mutex<mpsc::UnboundedReceiver<SessionEnded>>,
    observer: Option<mpsc::UnboundedSender<SessionEnded>>,
    shutdown: CancellationToken,
}

impl CallRegistry {
    /// Create a registry for the client registered as `local_id`.
    pub fn new(
        local_id: impl Into<String>,
        settings: CallSettings,
        connector: Arc<dyn TransportConnector>,
        signaling: Arc<dyn SignalingSink>,
    ) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            local_id: local_id.into(),
            settings,
            connector,
            signaling,
            sessions: RwLock::new(HashMap::new()),
            ended_tx,
            ended_rx: Mutex::new(ended_rx),
            observer: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Forward every [`SessionEnded`] to `observer` after the session has
    /// been removed.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<SessionEnded>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Our client id at the relay.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// The live session with `peer`, if any.
    pub async fn session(&self, peer: &str) -> Option<CallSession> {
        self.sessions.read().await.get(peer).cloned()
    }

    /// Number of tracked sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is tracked.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Call `peer`.
    pub async fn call(&self, peer: &str) -> Result<CallSession> {
        let peer = peer.trim();
        if peer.is_empty() {
            return Err(CallError::invalid_state("callee id must not be empty"));
        }
        if peer == self.local_id {
            return Err(CallError::invalid_state("cannot call ourselves"));
        }
        let session = self.open_session(peer, Direction::Outbound).await?;
        tracing::info!(remote_peer = peer, "Starting call");
        session.initiate().await?;
        Ok(session)
    }

    /// Hang up the call with `peer`. Returns `false` when there is none.
    pub async fn hangup(&self, peer: &str) -> bool {
        match self.session(peer).await {
            Some(session) => session.hangup().await,
            None => {
                tracing::debug!(remote_peer = peer, "No call to hang up");
                false
            }
        }
    }

    /// Route one relay event.
    pub async fn handle_event(&self, event: SignalingEvent) {
        match event {
            SignalingEvent::NewCall { caller_id, rtc_message } => {
                tracing::info!(remote_peer = %caller_id, "Incoming call, auto-answering");
                let session = match self.open_session(&caller_id, Direction::Inbound).await {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::warn!(remote_peer = %caller_id, error = %e, "Rejected call");
                        return;
                    }
                };
                if let Err(e) = session.accept_incoming(&rtc_message).await {
                    tracing::warn!(remote_peer = %caller_id, error = %e, "Failed to answer");
                }
            }
            SignalingEvent::CallAnswered { callee, rtc_message } => {
                if let Some(session) = self.routed(&callee).await {
                    if let Err(e) = session.handle_answer(&rtc_message).await {
                        tracing::warn!(remote_peer = %callee, error = %e, "Failed to apply answer");
                    }
                }
            }
            SignalingEvent::IceCandidate { sender, rtc_message } => {
                if let Some(session) = self.routed(&sender).await {
                    if let Err(e) = session.add_remote_candidate(&rtc_message).await {
                        tracing::warn!(remote_peer = %sender, error = %e, "Dropped ICE candidate");
                    }
                }
            }
            SignalingEvent::CallEnded { sender_id } => {
                if let Some(session) = self.routed(&sender_id).await {
                    tracing::info!(remote_peer = %sender_id, "Remote party hung up");
                    session.remote_hangup().await;
                }
            }
        }
    }

    /// Route relay events and reap ended sessions until the event stream
    /// closes or [`shutdown`](Self::shutdown) is called, then tear down
    /// every remaining call.
    pub async fn run(&self, mut events: mpsc::Receiver<SignalingEvent>) {
        let mut ended = self.ended_rx.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(end) = ended.recv() => self.reap(end).await,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::info!("Signaling stream closed");
                        break;
                    }
                },
            }
        }
        drop(ended);
        self.close_all(EndReason::Shutdown).await;
        self.reap_pending().await;
    }

    /// Hang up every call and stop [`run`](Self::run).
    pub async fn shutdown(&self) {
        tracing::info!(local_id = %self.local_id, "Shutting down call registry");
        self.shutdown.cancel();
        self.close_all(EndReason::Shutdown).await;
        self.reap_pending().await;
    }

    /// Remove ended sessions whose notifications are already queued.
    ///
    /// Does nothing while [`run`](Self::run) owns the notifications.
    pub async fn reap_pending(&self) {
        let Ok(mut ended) = self.ended_rx.try_lock() else {
            return;
        };
        let mut pending = Vec::new();
        while let Ok(end) = ended.try_recv() {
            pending.push(end);
        }
        drop(ended);
        for end in pending {
            self.reap(end).await;
        }
    }

    async fn open_session(&self, peer: &str, direction: Direction) -> Result<CallSession> {
        if self.shutdown.is_cancelled() {
            return Err(CallError::invalid_state("registry is shut down"));
        }
        if let Some(existing) = self.session(peer).await {
            if !existing.is_cleaned_up() {
                return Err(CallError::invalid_state(format!("already in a call with {peer}")));
            }
        }

        let session = CallSession::open(
            peer,
            direction,
            &self.settings,
            self.connector.as_ref(),
            self.signaling.clone(),
            self.ended_tx.clone(),
        )
        .await?;
        self.sessions.write().await.insert(peer.to_string(), session.clone());
        Ok(session)
    }

    async fn routed(&self, peer: &str) -> Option<CallSession> {
        let session = self.session(peer).await;
        if session.is_none() {
            tracing::warn!(remote_peer = peer, "No call session for peer");
        }
        session
    }

    async fn reap(&self, end: SessionEnded) {
        {
            let mut sessions = self.sessions.write().await;
            if sessions.get(&end.remote_peer).is_some_and(|s| s.id() == end.session_id) {
                sessions.remove(&end.remote_peer);
            }
        }
        tracing::info!(remote_peer = %end.remote_peer, reason = ?end.reason, "Call ended");
        if let Some(observer) = &self.observer {
            let _ = observer.send(end);
        }
    }

    async fn close_all(&self, reason: EndReason) {
        let sessions: Vec<CallSession> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.cleanup(reason.clone()).await;
        }
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("local_id", &self.local_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
