use crate::audio::AudioChunk;
use crate::config::{BuiltinTool, LiveConfig, ToolDefinition};
use crate::error::{RealtimeError, Result};
use crate::events::{
    CodeExecutionResult, EngineMessage, ExecutableCode, FunctionCall, FunctionResponse, GoAway,
    ResumptionUpdate, parse_duration,
};
use crate::session::LiveConnection;
use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{GeminiLiveBackend, live_url};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

const AUDIO_MIME_TYPE: &str = "audio/pcm";

// ── Client messages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRealtimeInputMessage {
    realtime_input: GeminiRealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRealtimeInput {
    media_chunks: Vec<GeminiMediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiMediaChunk {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolResponseMessage {
    tool_response: GeminiToolResponse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolResponse {
    function_responses: Vec<FunctionResponse>,
}

// ── Server messages ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<GeminiServerContent>,
    tool_call: Option<GeminiToolCall>,
    go_away: Option<GeminiGoAway>,
    session_resumption_update: Option<GeminiResumptionUpdate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiServerContent {
    model_turn: Option<GeminiContent>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    inline_data: Option<GeminiInlineData>,
    executable_code: Option<GeminiExecutableCode>,
    code_execution_result: Option<GeminiCodeExecutionResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiExecutableCode {
    #[serde(default)]
    language: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct GeminiCodeExecutionResult {
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    output: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGoAway {
    time_left: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResumptionUpdate {
    #[serde(default)]
    resumable: bool,
    new_handle: Option<String>,
}

/// A decoded server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// The setup handshake finished.
    SetupComplete,
    /// Anything else, translated.
    Message(EngineMessage),
}

/// Translate one Live API server message.
pub fn translate_server_message(raw: &str) -> Result<ServerFrame> {
    let message: GeminiServerMessage = serde_json::from_str(raw)
        .map_err(|e| RealtimeError::protocol(format!("Parse error: {e}")))?;

    if message.setup_complete.is_some() {
        return Ok(ServerFrame::SetupComplete);
    }

    let mut out = EngineMessage::default();

    if let Some(content) = message.server_content {
        out.turn_complete = content.turn_complete;
        out.interrupted = content.interrupted;

        let mut audio: Vec<u8> = Vec::new();
        let mut text = String::new();
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                let mime_type = inline.mime_type.as_str();
                if !mime_type.is_empty() && !mime_type.starts_with("audio/") {
                    tracing::debug!(mime_type, "Skipping non-audio inline data");
                } else {
                    let decoded = BASE64_STANDARD.decode(inline.data.as_bytes()).map_err(|e| {
                        RealtimeError::protocol(format!("Invalid audio data: {e}"))
                    })?;
                    audio.extend_from_slice(&decoded);
                }
            }
            if let Some(part_text) = part.text {
                text.push_str(&part_text);
            }
            if let Some(code) = part.executable_code {
                out.executable_code
                    .push(ExecutableCode { language: code.language, code: code.code });
            }
            if let Some(result) = part.code_execution_result {
                out.code_results
                    .push(CodeExecutionResult { outcome: result.outcome, output: result.output });
            }
        }
        if !audio.is_empty() {
            out.data = Some(Bytes::from(audio));
        }
        if !text.is_empty() {
            out.text = Some(text);
        }
    }

    if let Some(tool_call) = message.tool_call {
        out.tool_calls = tool_call.function_calls;
    }

    if let Some(update) = message.session_resumption_update {
        out.resumption_update =
            Some(ResumptionUpdate { resumable: update.resumable, new_handle: update.new_handle });
    }

    if let Some(go_away) = message.go_away {
        let time_left = go_away.time_left.as_deref().and_then(parse_duration);
        out.go_away = Some(GoAway { time_left });
    }

    Ok(ServerFrame::Message(out))
}

/// Build the `setup` message for `config`.
pub fn build_setup(config: &LiveConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let mut generation_config = json!({
        "responseModalities": config.response_modalities,
    });
    let mut speech_config = json!({});
    if let Some(voice) = &config.voice {
        speech_config["voiceConfig"] = json!({
            "prebuiltVoiceConfig": {
                "voiceName": voice
            }
        });
    }
    if let Some(language) = &config.language_code {
        speech_config["languageCode"] = json!(language);
    }
    if speech_config.as_object().is_some_and(|o| !o.is_empty()) {
        generation_config["speechConfig"] = speech_config;
    }

    // An empty sessionResumption still asks the engine for handle updates.
    let resumption = match &config.resumption_handle {
        Some(handle) => json!({ "handle": handle }),
        None => json!({}),
    };
    let mut setup = json!({
        "model": model,
        "generationConfig": generation_config,
        "sessionResumption": resumption,
    });

    if let Some(instruction) = &config.instruction {
        setup["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }
    if config.sliding_window_compression {
        setup["contextWindowCompression"] = json!({ "slidingWindow": {} });
    }
    if let Some(tools) = convert_tools(&config.builtin_tools, &config.tools) {
        setup["tools"] = json!(tools);
    }

    json!({ "setup": setup })
}

fn convert_tools(builtin: &[BuiltinTool], tools: &[ToolDefinition]) -> Option<Vec<Value>> {
    let mut out: Vec<Value> = builtin
        .iter()
        .map(|tool| match tool {
            BuiltinTool::GoogleSearch => json!({ "googleSearch": {} }),
            BuiltinTool::CodeExecution => json!({ "codeExecution": {} }),
        })
        .collect();

    if !tools.is_empty() {
        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description.clone().unwrap_or_default(),
                    "parameters": t
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
                })
            })
            .collect();
        out.push(json!({ "functionDeclarations": function_declarations }));
    }

    if out.is_empty() { None } else { Some(out) }
}

/// Gemini Live connection.
///
/// Manages one WebSocket connection to Google's Gemini Live API.
pub struct GeminiLiveConnection {
    connection_id: String,
    closed: AtomicBool,
    sender: Mutex<WsSink>,
    receiver: Mutex<WsSource>,
}

impl GeminiLiveConnection {
    /// Connect, send `setup` and wait for `setupComplete`.
    pub async fn connect(
        backend: &GeminiLiveBackend,
        endpoint: &str,
        config: &LiveConfig,
    ) -> Result<Self> {
        let url = match backend {
            GeminiLiveBackend::Studio { api_key } => {
                let base = live_url(endpoint, &config.api_version);
                format!("{}?key={}", base, api_key.expose_secret())
            }
        };
        let request = url.into_client_request().map_err(|e| {
            RealtimeError::connection(format!("Failed to create client request: {}", e))
        })?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::connection(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = stream.split();
        let connection = Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            closed: AtomicBool::new(false),
            sender: Mutex::new(sink),
            receiver: Mutex::new(source),
        };

        tracing::info!(
            model_id = %config.model,
            resumed = config.resumption_handle.is_some(),
            "Sending setup message"
        );
        connection.send_raw(&build_setup(config)).await?;
        connection.await_setup_complete().await?;
        Ok(connection)
    }

    async fn await_setup_complete(&self) -> Result<()> {
        loop {
            match self.receive_frame().await {
                Some(Ok(ServerFrame::SetupComplete)) => {
                    tracing::debug!(connection_id = %self.connection_id, "Setup complete");
                    return Ok(());
                }
                Some(Ok(ServerFrame::Message(_))) => {
                    tracing::debug!("Ignoring message before setup completed");
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(RealtimeError::connection("Connection closed during setup"));
                }
            }
        }
    }

    /// Send a raw message.
    async fn send_raw<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::SessionClosed);
        }
        let msg = serde_json::to_string(value)?;

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Text(msg.into()))
            .await
            .map_err(|e| RealtimeError::connection(format!("Send error: {}", e)))?;

        Ok(())
    }

    /// Receive and decode the next frame, skipping control frames.
    async fn receive_frame(&self) -> Option<Result<ServerFrame>> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(translate_server_message(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(match std::str::from_utf8(&bytes) {
                        Ok(text) => translate_server_message(text),
                        Err(e) => Err(RealtimeError::protocol(format!(
                            "Invalid UTF-8 in binary message: {}",
                            e
                        ))),
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "Engine closed the connection");
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    return Some(Err(RealtimeError::connection(format!("Receive error: {}", e))));
                }
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl LiveConnection for GeminiLiveConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn send_audio(&self, chunk: &AudioChunk) -> Result<()> {
        let msg = GeminiRealtimeInputMessage {
            realtime_input: GeminiRealtimeInput {
                media_chunks: vec![GeminiMediaChunk {
                    mime_type: AUDIO_MIME_TYPE,
                    data: chunk.to_base64(),
                }],
            },
        };
        self.send_raw(&msg).await
    }

    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        let msg = GeminiToolResponseMessage {
            tool_response: GeminiToolResponse { function_responses: responses },
        };
        self.send_raw(&msg).await
    }

    async fn next_message(&self) -> Option<Result<EngineMessage>> {
        loop {
            match self.receive_frame().await? {
                Ok(ServerFrame::Message(message)) if message.is_empty() => continue,
                Ok(ServerFrame::Message(message)) => return Some(Ok(message)),
                Ok(ServerFrame::SetupComplete) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| RealtimeError::connection(format!("Close error: {}", e)))?;

        Ok(())
    }
}

impl std::fmt::Debug for GeminiLiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConnection")
            .field("connection_id", &self.connection_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
