//! Conversation session manager.
//!
//! Keeps one resumable streaming connection to the live engine alive for the
//! lifetime of a call. Each connection attempt runs three loops under one
//! cancellation scope:
//!
//! - **send**: inbound transport frames, resampled, written to the engine
//! - **receive**: engine messages, dispatched to the bridge, the output sink
//!   and the tool registry
//! - **playback**: raw engine audio paced onto the playback queue
//!
//! When any loop fails the attempt is marked failed, its siblings are
//! cancelled, and a new connection is opened with the latest resumption
//! handle. An attempt that ends because inbound media ended is final.

use crate::bridge::AudioBridge;
use crate::config::{LiveConfig, ReconnectPolicy};
use crate::error::{RealtimeError, Result};
use crate::events::EngineMessage;
use crate::model::BoxedEngine;
use crate::session::{BoxedConnection, FrameSource, LiveConnection, LogOutputSink, OutputSink};
use crate::tools::ToolRegistry;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use voxbridge_telemetry::engine_connection_span;

/// Lifecycle of a [`ConversationSessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Not started, or finished because inbound media ended.
    Disconnected,
    /// Opening the first connection.
    Connecting,
    /// A connection is up and the loops are running.
    Active,
    /// Reopening a connection with the stored resumption handle.
    Resuming,
    /// Stopped by [`ConversationSessionManager::stop`] or gave up.
    Stopped,
}

/// State of one streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Loops running.
    Active,
    /// Ended without error.
    Draining,
    /// Ended with an error.
    Failed,
}

/// Record of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingConnection {
    /// 1-based attempt number within the manager.
    pub attempt: u32,
    /// Current state.
    pub state: ConnectionState,
    /// Handle the attempt was opened with.
    pub resumption_handle: Option<String>,
    /// Whether the attempt ended because of an error.
    pub failed: bool,
}

/// How one of the three loops ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// Inbound media ended.
    MediaEnded,
    /// The attempt scope was cancelled.
    Cancelled,
}

enum AttemptOutcome {
    /// Inbound media ended; no retry.
    Ended,
    /// The manager was stopped.
    Cancelled,
    /// The attempt failed; `reached_active` tells whether the loops ran.
    Failed { error: RealtimeError, reached_active: bool },
}

/// Builder for [`ConversationSessionManager`].
pub struct ConversationSessionManagerBuilder {
    engine: BoxedEngine,
    bridge: Arc<AudioBridge>,
    config: LiveConfig,
    tools: ToolRegistry,
    sink: Arc<dyn OutputSink>,
    policy: ReconnectPolicy,
    resumption_handle: Option<String>,
}

impl ConversationSessionManagerBuilder {
    /// Set the live config.
    pub fn config(mut self, config: LiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the local tools.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the output sink.
    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the reconnect policy.
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resume an earlier conversation.
    pub fn resumption_handle(mut self, handle: impl Into<String>) -> Self {
        self.resumption_handle = Some(handle.into());
        self
    }

    /// Build the manager (does not connect yet).
    pub fn build(self) -> ConversationSessionManager {
        let mut config = self.config;
        for def in self.tools.definitions() {
            if !config.tools.iter().any(|t| t.name == def.name) {
                config.tools.push(def);
            }
        }
        let (state, _) = watch::channel(ManagerState::Disconnected);
        ConversationSessionManager {
            engine: self.engine,
            bridge: self.bridge,
            config,
            tools: self.tools,
            sink: self.sink,
            policy: self.policy,
            resumption_handle: Mutex::new(self.resumption_handle),
            state,
            cancel: CancellationToken::new(),
            connection: Mutex::new(None),
            current: Mutex::new(None),
        }
    }
}

/// Owns the engine side of one call.
pub struct ConversationSessionManager {
    engine: BoxedEngine,
    bridge: Arc<AudioBridge>,
    config: LiveConfig,
    tools: ToolRegistry,
    sink: Arc<dyn OutputSink>,
    policy: ReconnectPolicy,
    resumption_handle: Mutex<Option<String>>,
    state: watch::Sender<ManagerState>,
    cancel: CancellationToken,
    connection: Mutex<Option<BoxedConnection>>,
    current: Mutex<Option<StreamingConnection>>,
}

impl ConversationSessionManager {
    /// Create a builder.
    pub fn builder(
        engine: BoxedEngine,
        bridge: Arc<AudioBridge>,
    ) -> ConversationSessionManagerBuilder {
        ConversationSessionManagerBuilder {
            engine,
            bridge,
            config: LiveConfig::default(),
            tools: ToolRegistry::new(),
            sink: Arc::new(LogOutputSink),
            policy: ReconnectPolicy::default(),
            resumption_handle: None,
        }
    }

    /// The bridge this manager feeds.
    pub fn bridge(&self) -> &Arc<AudioBridge> {
        &self.bridge
    }

    /// Live config used for every attempt (without the handle).
    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.state.subscribe()
    }

    /// Latest stored resumption handle.
    pub fn resumption_handle(&self) -> Option<String> {
        self.resumption_handle.lock().clone()
    }

    /// Record of the latest connection attempt.
    pub fn current_connection(&self) -> Option<StreamingConnection> {
        self.current.lock().clone()
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run connection attempts until inbound media ends or the manager stops.
    ///
    /// Returns `Ok` on a graceful end or after [`stop`](Self::stop), and an
    /// error when the reconnect policy gives up or an error is final.
    pub async fn start(&self, inbound: &mut dyn FrameSource) -> Result<()> {
        let mut attempt = 0u32;
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(ManagerState::Stopped);
                return Ok(());
            }

            attempt += 1;
            let handle = self.resumption_handle();
            self.set_state(if attempt == 1 {
                ManagerState::Connecting
            } else {
                ManagerState::Resuming
            });

            let span = engine_connection_span(&self.config.model, attempt);
            let outcome = self.run_attempt(attempt, handle, inbound).instrument(span).await;

            match outcome {
                AttemptOutcome::Ended => {
                    tracing::info!(attempt, "Conversation ended");
                    self.set_state(ManagerState::Disconnected);
                    return Ok(());
                }
                AttemptOutcome::Cancelled => {
                    self.set_state(ManagerState::Stopped);
                    return Ok(());
                }
                AttemptOutcome::Failed { error, reached_active } => {
                    if !error.is_recoverable() {
                        tracing::error!(attempt, error = %error, "Engine session failed");
                        self.set_state(ManagerState::Stopped);
                        return Err(error);
                    }
                    if reached_active {
                        failures = 0;
                    }
                    failures += 1;
                    if self.policy.exhausted(failures) {
                        tracing::error!(attempts = failures, error = %error, "Giving up on engine");
                        self.set_state(ManagerState::Stopped);
                        return Err(RealtimeError::ReconnectExhausted { attempts: failures });
                    }

                    // A go-away after a healthy session is a planned handover.
                    let handover =
                        reached_active && matches!(error, RealtimeError::GoAway { .. });
                    let delay =
                        if handover { Duration::ZERO } else { self.policy.backoff(failures) };
                    tracing::warn!(
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Engine connection lost, resuming"
                    );
                    self.set_state(ManagerState::Resuming);
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.set_state(ManagerState::Stopped);
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Cancel all loops, wait for them, drain both queues and close the
    /// connection. Safe when nothing is running.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "Error closing engine connection");
            }
        }

        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|s| matches!(s, ManagerState::Disconnected | ManagerState::Stopped))
            .await;

        self.bridge.drain();
        self.set_state(ManagerState::Stopped);
    }

    async fn run_attempt(
        &self,
        attempt: u32,
        handle: Option<String>,
        inbound: &mut dyn FrameSource,
    ) -> AttemptOutcome {
        self.record(StreamingConnection {
            attempt,
            state: ConnectionState::Connecting,
            resumption_handle: handle.clone(),
            failed: false,
        });

        let config = self.config.resuming(handle);
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return AttemptOutcome::Cancelled,
            connected = self.engine.connect(&config) => connected,
        };
        let connection = match connected {
            Ok(connection) => connection,
            Err(error) => {
                self.update(|c| {
                    c.state = ConnectionState::Failed;
                    c.failed = true;
                });
                return AttemptOutcome::Failed { error, reached_active: false };
            }
        };

        *self.connection.lock() = Some(connection.clone());
        self.update(|c| c.state = ConnectionState::Active);
        self.set_state(ManagerState::Active);
        tracing::info!(
            connection_id = connection.connection_id(),
            resumed = config.resumption_handle.is_some(),
            "Engine connection active"
        );

        let scope = self.cancel.child_token();
        let (sent, received, ()) = tokio::join!(
            cancel_on_exit(&scope, self.send_loop(connection.as_ref(), inbound, &scope)),
            cancel_on_exit(&scope, self.receive_loop(connection.as_ref(), &scope)),
            self.bridge.run_playback(&scope),
        );

        self.connection.lock().take();
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "Error closing engine connection");
        }

        if self.cancel.is_cancelled() {
            self.update(|c| c.state = ConnectionState::Draining);
            return AttemptOutcome::Cancelled;
        }

        match (sent, received) {
            (Err(error), _) | (_, Err(error)) => {
                self.update(|c| {
                    c.state = ConnectionState::Failed;
                    c.failed = true;
                });
                AttemptOutcome::Failed { error, reached_active: true }
            }
            (Ok(LoopExit::MediaEnded), _) | (_, Ok(LoopExit::MediaEnded)) => {
                self.update(|c| c.state = ConnectionState::Draining);
                AttemptOutcome::Ended
            }
            (Ok(LoopExit::Cancelled), Ok(LoopExit::Cancelled)) => {
                self.update(|c| c.state = ConnectionState::Draining);
                AttemptOutcome::Cancelled
            }
        }
    }

    async fn send_loop(
        &self,
        connection: &dyn LiveConnection,
        inbound: &mut dyn FrameSource,
        scope: &CancellationToken,
    ) -> Result<LoopExit> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = scope.cancelled() => return Ok(LoopExit::Cancelled),
                frame = inbound.recv() => frame,
            };
            let Some(frame) = frame else {
                tracing::info!("Inbound media ended");
                return Ok(LoopExit::MediaEnded);
            };

            let chunks = match self.bridge.resample(&frame) {
                Ok(chunks) => chunks,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed inbound frame");
                    continue;
                }
            };
            for chunk in chunks {
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => return Ok(LoopExit::Cancelled),
                    sent = connection.send_audio(&chunk) => sent?,
                }
            }
        }
    }

    async fn receive_loop(
        &self,
        connection: &dyn LiveConnection,
        scope: &CancellationToken,
    ) -> Result<LoopExit> {
        loop {
            let message = tokio::select! {
                biased;
                _ = scope.cancelled() => return Ok(LoopExit::Cancelled),
                message = connection.next_message() => message,
            };
            let message = match message {
                Some(message) => message?,
                None => return Err(RealtimeError::StreamClosed),
            };
            tokio::select! {
                biased;
                _ = scope.cancelled() => return Ok(LoopExit::Cancelled),
                handled = self.handle_message(connection, message) => handled?,
            }
        }
    }

    async fn handle_message(
        &self,
        connection: &dyn LiveConnection,
        message: EngineMessage,
    ) -> Result<()> {
        if let Some(data) = message.data {
            self.bridge.push_engine_audio(data).await;
        }
        if let Some(text) = &message.text {
            self.sink.on_text(text).await;
        }
        for code in &message.executable_code {
            self.sink.on_executable_code(code).await;
        }
        for result in &message.code_results {
            self.sink.on_code_result(result).await;
        }

        if let Some(update) = &message.resumption_update {
            match update.usable_handle() {
                Some(handle) => {
                    tracing::debug!(handle, "Stored resumption handle");
                    *self.resumption_handle.lock() = Some(handle.to_string());
                }
                None => tracing::debug!(resumable = update.resumable, "Ignored resumption update"),
            }
        }

        if let Some(go_away) = message.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "Engine sent go-away");
            return Err(RealtimeError::GoAway { time_left: go_away.time_left });
        }

        if message.interrupted {
            if self.bridge.config().interrupt_enabled {
                let (raw, playback) = self.bridge.interrupt();
                tracing::info!(raw, playback, "Playback interrupted");
            } else {
                tracing::debug!("Interruption ignored");
            }
        }

        if !message.tool_calls.is_empty() {
            let mut responses = Vec::with_capacity(message.tool_calls.len());
            for call in &message.tool_calls {
                tracing::info!(tool = %call.name, call_id = %call.id, "Tool call");
                responses.push(self.tools.dispatch(call).await);
            }
            connection.send_tool_response(responses).await?;
        }

        if message.turn_complete {
            self.sink.on_turn_complete().await;
        }
        Ok(())
    }

    fn set_state(&self, state: ManagerState) {
        self.state.send_replace(state);
    }

    fn record(&self, connection: StreamingConnection) {
        *self.current.lock() = Some(connection);
    }

    fn update(&self, f: impl FnOnce(&mut StreamingConnection)) {
        if let Some(current) = self.current.lock().as_mut() {
            f(current);
        }
    }
}

impl std::fmt::Debug for ConversationSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSessionManager")
            .field("provider", &self.engine.provider())
            .field("model", &self.config.model)
            .field("state", &self.state())
            .field("current", &self.current_connection())
            .finish()
    }
}

/// Run one loop and cancel its siblings when it ends, whatever the reason.
async fn cancel_on_exit(
    scope: &CancellationToken,
    fut: impl Future<Output = Result<LoopExit>>,
) -> Result<LoopExit> {
    let result = fut.await;
    scope.cancel();
    result
}
