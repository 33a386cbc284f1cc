//! Integration tests for the call session orchestrator with an in-memory
//! transport and a scripted engine.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use voxbridge_call::{
    CallError, CallSession, CallSettings, CallState, Direction, EndReason, IceCandidate,
    MediaTransport, RemoteTrack, RtcIceMessage, SessionDescription, SessionEnded,
    SignalingMessage, TransportConnector, TransportEvent, TransportHandle, TransportState,
    VideoFrame,
};
use voxbridge_realtime::{
    AudioChunk, BoxedConnection, EngineMessage, FunctionResponse, LiveConfig, LiveConnection,
    LiveEngine, PcmFrame, RealtimeError, ReconnectPolicy,
};

// ── Engine double ───────────────────────────────────────────────────────

type MessageTx = mpsc::UnboundedSender<voxbridge_realtime::Result<EngineMessage>>;
type MessageRx = mpsc::UnboundedReceiver<voxbridge_realtime::Result<EngineMessage>>;

struct MockConnection {
    rx: Mutex<MessageRx>,
}

#[async_trait]
impl LiveConnection for MockConnection {
    fn connection_id(&self) -> &str {
        "mock"
    }

    async fn send_audio(&self, _chunk: &AudioChunk) -> voxbridge_realtime::Result<()> {
        Ok(())
    }

    async fn send_tool_response(
        &self,
        _responses: Vec<FunctionResponse>,
    ) -> voxbridge_realtime::Result<()> {
        Ok(())
    }

    async fn next_message(&self) -> Option<voxbridge_realtime::Result<EngineMessage>> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) -> voxbridge_realtime::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MockEngine {
    pending: std::sync::Mutex<VecDeque<MockConnection>>,
    handles: std::sync::Mutex<Vec<Option<String>>>,
}

impl MockEngine {
    fn script(&self) -> MessageTx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().unwrap().push_back(MockConnection { rx: Mutex::new(rx) });
        tx
    }

    fn handles(&self) -> Vec<Option<String>> {
        self.handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveEngine for MockEngine {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn connect(&self, config: &LiveConfig) -> voxbridge_realtime::Result<BoxedConnection> {
        self.handles.lock().unwrap().push(config.resumption_handle.clone());
        match self.pending.lock().unwrap().pop_front() {
            Some(connection) => Ok(Arc::new(connection)),
            None => Err(RealtimeError::connection("engine unavailable")),
        }
    }
}

// ── Transport double ────────────────────────────────────────────────────

#[derive(Default)]
struct MockTransport {
    fail_offer: bool,
    remote_offers: std::sync::Mutex<Vec<SessionDescription>>,
    remote_answers: std::sync::Mutex<Vec<SessionDescription>>,
    candidates: std::sync::Mutex<Vec<IceCandidate>>,
    closes: AtomicUsize,
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_offer(&self) -> voxbridge_call::Result<SessionDescription> {
        if self.fail_offer {
            return Err(CallError::negotiation("no codecs in common"));
        }
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn handle_remote_offer(
        &self,
        offer: &SessionDescription,
    ) -> voxbridge_call::Result<SessionDescription> {
        self.remote_offers.lock().unwrap().push(offer.clone());
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn handle_remote_answer(
        &self,
        answer: &SessionDescription,
    ) -> voxbridge_call::Result<()> {
        self.remote_answers.lock().unwrap().push(answer.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> voxbridge_call::Result<()> {
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> voxbridge_call::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockConnector {
    transport: Arc<MockTransport>,
    events: std::sync::Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    outbound: std::sync::Mutex<Option<voxbridge_realtime::PlaybackTrack>>,
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(
        &self,
        outbound: voxbridge_realtime::PlaybackTrack,
    ) -> voxbridge_call::Result<TransportHandle> {
        *self.outbound.lock().unwrap() = Some(outbound);
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CallError::transport("connector already used"))?;
        Ok(TransportHandle { transport: self.transport.clone(), events })
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    session: CallSession,
    engine: Arc<MockEngine>,
    transport: Arc<MockTransport>,
    connector: Arc<MockConnector>,
    transport_events: mpsc::Sender<TransportEvent>,
    signaling: mpsc::UnboundedReceiver<SignalingMessage>,
    ended: mpsc::UnboundedReceiver<SessionEnded>,
}

impl Harness {
    async fn open(direction: Direction) -> Self {
        Self::open_with(direction, Arc::new(MockEngine::default()), MockTransport::default()).await
    }

    async fn open_with(
        direction: Direction,
        engine: Arc<MockEngine>,
        transport: MockTransport,
    ) -> Self {
        let _ = voxbridge_telemetry::init_telemetry("voxbridge-call-tests");
        let transport = Arc::new(transport);
        let (transport_events, events_rx) = mpsc::channel(16);
        let connector = Arc::new(MockConnector {
            transport: transport.clone(),
            events: std::sync::Mutex::new(Some(events_rx)),
            outbound: std::sync::Mutex::new(None),
        });
        let (signaling_tx, signaling) = mpsc::unbounded_channel();
        let (ended_tx, ended) = mpsc::unbounded_channel();
        let settings = CallSettings::new(engine.clone()).with_policy(ReconnectPolicy::immediate());

        let session = CallSession::open(
            "peer-1",
            direction,
            &settings,
            connector.as_ref(),
            Arc::new(signaling_tx),
            ended_tx,
        )
        .await
        .unwrap();

        Self { session, engine, transport, connector, transport_events, signaling, ended }
    }

    async fn emit(&self, event: TransportEvent) {
        self.transport_events.send(event).await.unwrap();
    }

    async fn wait_state(&self, want: CallState) {
        let mut state = self.session.subscribe();
        within(async {
            state.wait_for(|s| *s == want).await.unwrap();
        })
        .await;
    }

    async fn next_end(&mut self) -> SessionEnded {
        within(self.ended.recv()).await.unwrap()
    }
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(30), fut).await.expect("timed out")
}

async fn eventually<F: FnMut() -> bool>(mut check: F) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_initiate_sends_offer_and_connects() {
    let mut h = Harness::open(Direction::Outbound).await;
    assert_eq!(h.session.state(), CallState::Idle);

    h.session.initiate().await.unwrap();
    assert_eq!(h.session.state(), CallState::Offering);
    assert_eq!(
        h.signaling.recv().await.unwrap(),
        SignalingMessage::Call {
            callee_id: "peer-1".into(),
            rtc_message: SessionDescription::offer("v=0 offer"),
        }
    );

    h.session.handle_answer(&SessionDescription::answer("remote")).await.unwrap();
    assert_eq!(h.transport.remote_answers.lock().unwrap().len(), 1);

    h.emit(TransportEvent::ConnectionState(TransportState::Connecting)).await;
    h.emit(TransportEvent::ConnectionState(TransportState::Connected)).await;
    h.wait_state(CallState::Connected).await;

    assert!(matches!(h.session.initiate().await, Err(CallError::InvalidState(_))));
    assert!(h.session.hangup().await);
}

#[tokio::test(start_paused = true)]
async fn test_answer_without_offer_is_rejected() {
    let h = Harness::open(Direction::Outbound).await;
    let err = h.session.handle_answer(&SessionDescription::answer("x")).await.unwrap_err();
    assert!(matches!(err, CallError::InvalidState(_)));
    assert!(!h.session.is_cleaned_up());
    assert!(h.transport.remote_answers.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_accept_incoming_sends_answer() {
    let mut h = Harness::open(Direction::Inbound).await;
    h.session.accept_incoming(&SessionDescription::offer("remote offer")).await.unwrap();

    assert_eq!(h.session.state(), CallState::Answering);
    assert_eq!(h.transport.remote_offers.lock().unwrap()[0].sdp, "remote offer");
    assert_eq!(
        h.signaling.recv().await.unwrap(),
        SignalingMessage::AnswerCall {
            caller_id: "peer-1".into(),
            rtc_message: SessionDescription::answer("v=0 answer"),
        }
    );

    let again = h.session.accept_incoming(&SessionDescription::offer("again")).await;
    assert!(matches!(again, Err(CallError::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_local_candidates_forwarded() {
    let mut h = Harness::open(Direction::Outbound).await;
    let candidate = RtcIceMessage::new(
        "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
        Some("0".into()),
        Some(0),
    );
    h.emit(TransportEvent::LocalCandidate(candidate.clone())).await;

    let sent = within(h.signaling.recv()).await.unwrap();
    assert_eq!(
        sent,
        SignalingMessage::IceCandidate { callee_id: "peer-1".into(), rtc_message: candidate }
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_remote_candidate_keeps_session() {
    let h = Harness::open(Direction::Inbound).await;
    h.session.accept_incoming(&SessionDescription::offer("o")).await.unwrap();

    let bad = RtcIceMessage::new("candidate:garbage", None, None);
    let err = h.session.add_remote_candidate(&bad).await.unwrap_err();
    assert!(matches!(err, CallError::InvalidCandidate(_)));
    assert_eq!(h.session.state(), CallState::Answering);

    let good = RtcIceMessage::new(
        "candidate:842163049 1 udp 1677729535 192.168.1.20 54400 typ srflx",
        Some("0".into()),
        Some(0),
    );
    h.session.add_remote_candidate(&good).await.unwrap();
    let candidates = h.transport.candidates.lock().unwrap().clone();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].foundation, "842163049");
    assert_eq!(candidates[0].port, 54400);
    assert_eq!(candidates[0].candidate_type, "srflx");
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_cleans_up_once() {
    let mut h = Harness::open(Direction::Outbound).await;
    h.session.initiate().await.unwrap();
    h.emit(TransportEvent::ConnectionState(TransportState::Connected)).await;
    h.wait_state(CallState::Connected).await;

    h.emit(TransportEvent::ConnectionState(TransportState::Failed)).await;
    let end = h.next_end().await;
    assert_eq!(end.remote_peer, "peer-1");
    assert_eq!(end.session_id, h.session.id());
    assert_eq!(end.reason, EndReason::TransportFailed(TransportState::Failed));

    h.session.closed().await;
    assert_eq!(h.session.state(), CallState::Closed);
    assert_eq!(h.transport.closes.load(Ordering::SeqCst), 1);
    assert!(h.session.manager().is_stopped());

    assert!(!h.session.hangup().await);
    assert!(!h.session.remote_hangup().await);
    assert!(!h.session.cleanup(EndReason::Shutdown).await);
    assert!(h.ended.try_recv().is_err());
    assert_eq!(h.transport.closes.load(Ordering::SeqCst), 1);

    let late = h.session.add_remote_candidate(&RtcIceMessage::new("x", None, None)).await;
    assert!(matches!(late, Err(CallError::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_notify_once() {
    let mut h = Harness::open(Direction::Outbound).await;
    h.emit(TransportEvent::ConnectionState(TransportState::Disconnected)).await;

    let (a, b, c) = tokio::join!(
        h.session.hangup(),
        h.session.remote_hangup(),
        h.session.cleanup(EndReason::Shutdown),
    );
    h.session.closed().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let performed = [a, b, c].into_iter().filter(|done| *done).count();
    assert!(performed <= 1);
    assert!(h.ended.try_recv().is_ok());
    assert!(h.ended.try_recv().is_err());
    assert_eq!(h.transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hangup_notifies_peer() {
    let mut h = Harness::open(Direction::Outbound).await;
    h.session.initiate().await.unwrap();
    let _offer = h.signaling.recv().await.unwrap();

    assert!(h.session.hangup().await);
    assert_eq!(
        h.signaling.recv().await.unwrap(),
        SignalingMessage::Hangup { target_id: "peer-1".into() }
    );
    assert_eq!(h.next_end().await.reason, EndReason::Hangup);
    assert_eq!(h.session.state(), CallState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_failure_cleans_up() {
    let engine = Arc::new(MockEngine::default());
    let transport = MockTransport { fail_offer: true, ..Default::default() };
    let mut h = Harness::open_with(Direction::Outbound, engine, transport).await;

    let err = h.session.initiate().await.unwrap_err();
    assert!(matches!(err, CallError::Negotiation(_)));
    assert!(matches!(h.next_end().await.reason, EndReason::NegotiationFailed(_)));
    assert!(h.signaling.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_go_away_keeps_call_connected() {
    let engine = Arc::new(MockEngine::default());
    let first = engine.script();
    let _second = engine.script();
    let mut h = Harness::open_with(Direction::Inbound, engine, MockTransport::default()).await;
    h.session.accept_incoming(&SessionDescription::offer("o")).await.unwrap();
    h.emit(TransportEvent::ConnectionState(TransportState::Connected)).await;
    h.wait_state(CallState::Connected).await;

    let (_mic, mic_rx) = mpsc::channel::<PcmFrame>(8);
    h.emit(TransportEvent::RemoteTrack(RemoteTrack::Audio(Box::new(mic_rx)))).await;
    eventually(|| h.engine.handles().len() == 1).await;

    first.send(Ok(EngineMessage::resumption(true, Some("h1")))).unwrap();
    first.send(Ok(EngineMessage::go_away(Some(Duration::from_secs(5))))).unwrap();
    eventually(|| h.engine.handles().len() == 2).await;

    assert_eq!(h.engine.handles(), vec![None, Some("h1".to_string())]);
    assert_eq!(h.session.state(), CallState::Connected);
    assert!(h.ended.try_recv().is_err());

    h.session.hangup().await;
    assert_eq!(h.next_end().await.reason, EndReason::Hangup);
}

#[tokio::test(start_paused = true)]
async fn test_engine_audio_reaches_outbound_track() {
    let engine = Arc::new(MockEngine::default());
    let conn = engine.script();
    let h = Harness::open_with(Direction::Outbound, engine, MockTransport::default()).await;
    let mut track = h.connector.outbound.lock().unwrap().take().unwrap();

    let (_mic, mic_rx) = mpsc::channel::<PcmFrame>(8);
    h.emit(TransportEvent::RemoteTrack(RemoteTrack::Audio(Box::new(mic_rx)))).await;
    conn.send(Ok(EngineMessage::audio(vec![7u8; 1920]))).unwrap();

    let first = within(track.next_frame()).await;
    let second = within(track.next_frame()).await;
    assert_eq!(first.data().len(), 960);
    assert_eq!(first.timestamp(), 0);
    assert_eq!(second.timestamp(), 480);
    assert!(second.data().iter().all(|&b| b == 7));

    h.session.cleanup(EndReason::Shutdown).await;
}

#[tokio::test(start_paused = true)]
async fn test_second_audio_track_ignored() {
    let engine = Arc::new(MockEngine::default());
    let _conn = engine.script();
    let h = Harness::open_with(Direction::Outbound, engine, MockTransport::default()).await;

    let (_a, a_rx) = mpsc::channel::<PcmFrame>(1);
    let (_b, b_rx) = mpsc::channel::<PcmFrame>(1);
    h.emit(TransportEvent::RemoteTrack(RemoteTrack::Audio(Box::new(a_rx)))).await;
    h.emit(TransportEvent::RemoteTrack(RemoteTrack::Audio(Box::new(b_rx)))).await;
    eventually(|| h.engine.handles().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.handles().len(), 1);

    h.session.cleanup(EndReason::Shutdown).await;
}

#[tokio::test(start_paused = true)]
async fn test_engine_failure_ends_call() {
    let engine = Arc::new(MockEngine::default());
    let transport = Arc::new(MockTransport::default());
    let (transport_events, events_rx) = mpsc::channel(4);
    let connector = MockConnector {
        transport: transport.clone(),
        events: std::sync::Mutex::new(Some(events_rx)),
        outbound: std::sync::Mutex::new(None),
    };
    let (signaling_tx, _signaling) = mpsc::unbounded_channel();
    let (ended_tx, mut ended) = mpsc::unbounded_channel();
    let settings = CallSettings::new(engine.clone())
        .with_policy(ReconnectPolicy::immediate().with_max_attempts(2));
    let session = CallSession::open(
        "peer-2",
        Direction::Inbound,
        &settings,
        &connector,
        Arc::new(signaling_tx),
        ended_tx,
    )
    .await
    .unwrap();

    let (_mic, mic_rx) = mpsc::channel::<PcmFrame>(1);
    transport_events
        .send(TransportEvent::RemoteTrack(RemoteTrack::Audio(Box::new(mic_rx))))
        .await
        .unwrap();

    let end = within(ended.recv()).await.unwrap();
    assert_eq!(end.remote_peer, "peer-2");
    assert!(matches!(end.reason, EndReason::EngineFailed(ref msg) if msg.contains("2 attempts")));
    assert_eq!(engine.handles().len(), 2);
    session.closed().await;
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_video_track_is_drained() {
    let h = Harness::open(Direction::Inbound).await;
    let (video, video_rx) = mpsc::channel::<VideoFrame>(1);
    h.emit(TransportEvent::RemoteTrack(RemoteTrack::Video(Box::new(video_rx)))).await;

    within(async {
        for ts in 0..100 {
            video.send(VideoFrame { width: 320, height: 240, timestamp: ts }).await.unwrap();
        }
    })
    .await;

    h.session.cleanup(EndReason::Shutdown).await;
    within(video.closed()).await;
}
