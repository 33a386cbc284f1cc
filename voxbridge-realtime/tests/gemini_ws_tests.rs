//! Wire-level tests for the Gemini Live connection against a local
//! WebSocket server.

#![cfg(feature = "gemini")]

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use voxbridge_realtime::gemini::{GeminiLiveBackend, GeminiLiveEngine};
use voxbridge_realtime::{
    AudioBridge, AudioChunk, BridgeConfig, ConversationSessionManager, FunctionCall,
    FunctionResponse, LiveConfig, LiveEngine, ManagerState, PcmFrame, RealtimeError,
    ReconnectPolicy, ToolDefinition,
};

type ServerWs = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    (listener, endpoint)
}

/// Accept one client, returning the socket and the request path with query.
async fn accept(listener: &TcpListener) -> (ServerWs, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let path = Arc::new(std::sync::Mutex::new(String::new()));
    let seen = path.clone();
    let ws = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        *seen.lock().unwrap() = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();
    let path = path.lock().unwrap().clone();
    (ws, path)
}

async fn recv_json(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(_) => panic!("client closed"),
            _ => continue,
        }
    }
}

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Hold the socket open until the client leaves.
async fn wait_for_close(ws: &mut ServerWs) {
    while let Some(Ok(message)) = ws.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}

/// Complete the setup handshake and return the client's setup payload.
async fn handshake(ws: &mut ServerWs) -> Value {
    let setup = recv_json(ws).await;
    send_json(ws, json!({"setupComplete": {}})).await;
    setup["setup"].clone()
}

fn engine(endpoint: &str) -> GeminiLiveEngine {
    GeminiLiveEngine::new(GeminiLiveBackend::studio("test-key")).with_endpoint(endpoint)
}

fn audio_content(bytes: &[u8]) -> Value {
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{
                    "inlineData": {
                        "mimeType": "audio/pcm;rate=24000",
                        "data": BASE64_STANDARD.encode(bytes)
                    }
                }]
            }
        }
    })
}

#[tokio::test]
async fn test_connect_sends_setup_and_waits_for_completion() {
    let (listener, endpoint) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, path) = accept(&listener).await;
        assert!(path.starts_with(
            "/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent"
        ));
        assert!(path.ends_with("?key=test-key"));

        let setup = handshake(&mut ws).await;
        assert_eq!(setup["model"], "models/gemini-live-2.5-flash-preview");
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(setup["sessionResumption"], json!({}));
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "turn_on_the_lights");
    });

    let config = LiveConfig::default().with_tool(ToolDefinition::new("turn_on_the_lights"));
    let connection = engine(&endpoint).connect(&config).await.unwrap();
    assert!(!connection.connection_id().is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn test_audio_and_tool_round_trip() {
    let (listener, endpoint) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        handshake(&mut ws).await;

        let input = recv_json(&mut ws).await;
        let chunk = &input["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm");
        let pcm = BASE64_STANDARD.decode(chunk["data"].as_str().unwrap()).unwrap();
        assert_eq!(pcm, vec![1, 0, 2, 0]);

        send_json(&mut ws, audio_content(&[9, 9, 9, 9])).await;
        send_json(
            &mut ws,
            json!({"toolCall": {"functionCalls": [
                {"id": "c1", "name": "turn_on_the_lights", "args": {}}
            ]}}),
        )
        .await;

        let reply = recv_json(&mut ws).await;
        let response = &reply["toolResponse"]["functionResponses"][0];
        assert_eq!(response["id"], "c1");
        assert_eq!(response["name"], "turn_on_the_lights");
        assert_eq!(response["response"], json!({"result": "ok"}));

        send_json(
            &mut ws,
            json!({"serverContent": {"modelTurn": {"parts": [{"text": "done"}]},
                   "turnComplete": true}}),
        )
        .await;
        wait_for_close(&mut ws).await;
    });

    let connection = engine(&endpoint).connect(&LiveConfig::default()).await.unwrap();
    connection.send_audio(&AudioChunk::from_i16_samples(&[1, 2], 16000, 0)).await.unwrap();

    let audio = connection.next_message().await.unwrap().unwrap();
    assert_eq!(audio.data.as_deref(), Some(&[9u8, 9, 9, 9][..]));

    let calls = connection.next_message().await.unwrap().unwrap();
    let call: &FunctionCall = &calls.tool_calls[0];
    assert_eq!(call.name, "turn_on_the_lights");
    connection
        .send_tool_response(vec![FunctionResponse::result(call, json!("ok"))])
        .await
        .unwrap();

    let text = connection.next_message().await.unwrap().unwrap();
    assert_eq!(text.text.as_deref(), Some("done"));
    assert!(text.turn_complete);

    connection.close().await.unwrap();
    connection.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_close_ends_stream() {
    let (listener, endpoint) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        handshake(&mut ws).await;
        ws.close(None).await.unwrap();
    });

    let connection = engine(&endpoint).connect(&LiveConfig::default()).await.unwrap();
    assert!(connection.next_message().await.is_none());
    assert!(matches!(
        connection.send_audio(&AudioChunk::from_i16_samples(&[1], 16000, 0)).await,
        Err(RealtimeError::SessionClosed)
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn test_close_during_setup_is_connection_error() {
    let (listener, endpoint) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        recv_json(&mut ws).await;
        ws.close(None).await.unwrap();
    });

    let err = engine(&endpoint).connect(&LiveConfig::default()).await.err().unwrap();
    assert!(matches!(err, RealtimeError::ConnectionError(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_manager_resumes_after_go_away() {
    let (listener, endpoint) = listen().await;
    let (setups_tx, mut setups) = mpsc::unbounded_channel::<Value>();
    let (answered_tx, answered) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (mut first, _) = accept(&listener).await;
        setups_tx.send(handshake(&mut first).await).unwrap();
        send_json(&mut first, audio_content(&[5; 960])).await;
        send_json(
            &mut first,
            json!({"sessionResumptionUpdate": {"newHandle": "h2", "resumable": true}}),
        )
        .await;
        send_json(&mut first, json!({"goAway": {"timeLeft": "5s"}})).await;

        let (mut second, _) = accept(&listener).await;
        setups_tx.send(handshake(&mut second).await).unwrap();
        send_json(&mut second, json!({"toolCall": {"functionCalls": [
            {"id": "c9", "name": "unknown_fn", "args": {}}
        ]}}))
        .await;
        let reply = recv_json(&mut second).await;
        assert_eq!(
            reply["toolResponse"]["functionResponses"][0]["response"],
            json!({"result": {"error": "Unknown function: unknown_fn"}})
        );
        answered_tx.send(()).unwrap();
        wait_for_close(&mut second).await;
    });

    let bridge = Arc::new(AudioBridge::new(BridgeConfig::default()).unwrap());
    let manager = Arc::new(
        ConversationSessionManager::builder(Arc::new(engine(&endpoint)), bridge.clone())
            .policy(ReconnectPolicy::immediate())
            .build(),
    );
    let (frames, mut inbound) = mpsc::channel::<PcmFrame>(4);
    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start(&mut inbound).await })
    };

    let first = setups.recv().await.unwrap();
    assert_eq!(first["sessionResumption"], json!({}));
    let second =
        tokio::time::timeout(Duration::from_secs(5), setups.recv()).await.unwrap().unwrap();
    assert_eq!(second["sessionResumption"], json!({"handle": "h2"}));
    assert_eq!(manager.resumption_handle().as_deref(), Some("h2"));

    // Audio from the first connection survives the reconnect.
    let chunk = tokio::time::timeout(Duration::from_secs(5), bridge.playback_track().next_frame())
        .await
        .unwrap();
    assert_eq!(chunk.data().len(), 960);

    answered.await.unwrap();
    drop(frames);
    assert!(task.await.unwrap().is_ok());
    assert_eq!(manager.state(), ManagerState::Disconnected);
    server.await.unwrap();
}
