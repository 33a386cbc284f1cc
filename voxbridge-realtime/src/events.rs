//! Engine-neutral event types.
//!
//! Providers translate their wire messages into [`EngineMessage`] values. One
//! message can carry several parts at once (audio and a resumption update,
//! say), so the type is a struct of optional parts rather than an enum.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// A function call requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Correlation id echoed back in the response.
    #[serde(default)]
    pub id: String,
    /// Name of the local capability.
    pub name: String,
    /// Arguments payload.
    #[serde(default)]
    pub args: Value,
}

/// The answer to one [`FunctionCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Correlation id of the call.
    pub id: String,
    /// Name of the called function.
    pub name: String,
    /// `{"result": ...}` or `{"error": ...}`.
    pub response: Value,
}

impl FunctionResponse {
    /// A successful response wrapping `value` as `{"result": value}`.
    pub fn result(call: &FunctionCall, value: Value) -> Self {
        Self { id: call.id.clone(), name: call.name.clone(), response: json!({ "result": value }) }
    }

    /// A failed response shaped `{"error": message}`.
    pub fn error(call: &FunctionCall, message: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: json!({ "error": message.into() }),
        }
    }

    /// Whether the response carries an error, at the top level or inside `result`.
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
            || self.response.get("result").and_then(|r| r.get("error")).is_some()
    }
}

/// A session-resumption update from the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumptionUpdate {
    /// Whether the session can currently be resumed.
    pub resumable: bool,
    /// New handle, possibly empty.
    pub new_handle: Option<String>,
}

impl ResumptionUpdate {
    /// The handle worth storing, if any.
    ///
    /// Only updates that are resumable and carry a non-empty handle count.
    pub fn usable_handle(&self) -> Option<&str> {
        match (&self.resumable, self.new_handle.as_deref()) {
            (true, Some(handle)) if !handle.is_empty() => Some(handle),
            _ => None,
        }
    }
}

/// Code the engine generated and ran server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableCode {
    /// Language of the snippet.
    pub language: String,
    /// Source code.
    pub code: String,
}

/// Outcome of server-side code execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeExecutionResult {
    /// Outcome label, e.g. `OUTCOME_OK`.
    pub outcome: String,
    /// Captured output.
    pub output: String,
}

/// One message received from the live engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineMessage {
    /// Output audio, PCM16 mono at the engine output rate.
    pub data: Option<Bytes>,
    /// Output text.
    pub text: Option<String>,
    /// Function calls to answer before continuing.
    pub tool_calls: Vec<FunctionCall>,
    /// Resumption handle update.
    pub resumption_update: Option<ResumptionUpdate>,
    /// Present when the engine is about to drop the connection.
    pub go_away: Option<GoAway>,
    /// The user barged in; pending playback is stale.
    pub interrupted: bool,
    /// The model finished its turn.
    pub turn_complete: bool,
    /// Server-side code.
    pub executable_code: Vec<ExecutableCode>,
    /// Server-side code results.
    pub code_results: Vec<CodeExecutionResult>,
}

/// Go-away notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoAway {
    /// Time left before the engine disconnects.
    pub time_left: Option<Duration>,
}

impl EngineMessage {
    /// A message carrying only audio.
    pub fn audio(data: impl Into<Bytes>) -> Self {
        Self { data: Some(data.into()), ..Default::default() }
    }

    /// A message carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    /// A message carrying a single function call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_calls: vec![FunctionCall { id: id.into(), name: name.into(), args }],
            ..Default::default()
        }
    }

    /// A resumption update.
    pub fn resumption(resumable: bool, new_handle: Option<&str>) -> Self {
        Self {
            resumption_update: Some(ResumptionUpdate {
                resumable,
                new_handle: new_handle.map(str::to_string),
            }),
            ..Default::default()
        }
    }

    /// A go-away notice.
    pub fn go_away(time_left: Option<Duration>) -> Self {
        Self { go_away: Some(GoAway { time_left }), ..Default::default() }
    }

    /// An interruption notice.
    pub fn interrupted() -> Self {
        Self { interrupted: true, ..Default::default() }
    }

    /// A turn-complete marker.
    pub fn turn_complete() -> Self {
        Self { turn_complete: true, ..Default::default() }
    }

    /// Whether the message carries nothing the manager acts on.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Parse a protobuf JSON duration such as `"5s"` or `"1.500s"`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let secs = raw.trim().strip_suffix('s')?;
    let value: f64 = secs.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(value))
}
