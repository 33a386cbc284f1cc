//! Configuration types for the audio bridge and live-engine sessions.

use crate::audio::{
    AudioFormat, BYTES_PER_SAMPLE, ENGINE_INPUT_SAMPLE_RATE, TRANSPORT_OUTPUT_SAMPLE_RATE,
};
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default live model.
pub const DEFAULT_MODEL: &str = "gemini-live-2.5-flash-preview";
/// Default API version for the live endpoint.
pub const DEFAULT_API_VERSION: &str = "v1alpha";
/// Default prebuilt voice.
pub const DEFAULT_VOICE: &str = "Puck";
/// Default speech language.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Audio pipeline settings for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Sample rate of the outbound transport track and of engine output audio.
    pub output_sample_rate: u32,
    /// Sample rate the engine expects for input audio.
    pub engine_sample_rate: u32,
    /// Duration of one paced playback chunk.
    pub chunk_duration_ms: u32,
    /// Capacity of the raw engine-output queue.
    pub raw_queue_capacity: usize,
    /// Capacity of the paced playback queue.
    pub playback_queue_capacity: usize,
    /// Flush pending playback when the engine reports an interruption.
    pub interrupt_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: TRANSPORT_OUTPUT_SAMPLE_RATE,
            engine_sample_rate: ENGINE_INPUT_SAMPLE_RATE,
            chunk_duration_ms: 20,
            raw_queue_capacity: 200,
            playback_queue_capacity: 10,
            interrupt_enabled: true,
        }
    }
}

impl BridgeConfig {
    /// Parse a config from TOML; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| RealtimeError::config(format!("invalid bridge config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.output_sample_rate == 0 || self.engine_sample_rate == 0 {
            return Err(RealtimeError::config("sample rates must be non-zero"));
        }
        if self.chunk_duration_ms == 0 {
            return Err(RealtimeError::config("chunk_duration_ms must be non-zero"));
        }
        if self.raw_queue_capacity == 0 || self.playback_queue_capacity == 0 {
            return Err(RealtimeError::config("queue capacities must be non-zero"));
        }
        if self.chunk_size_bytes() == 0 {
            return Err(RealtimeError::config("chunk duration too short for output rate"));
        }
        Ok(())
    }

    /// Format of the outbound transport track.
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::new(self.output_sample_rate, 1, (BYTES_PER_SAMPLE * 8) as u8)
    }

    /// Samples in one paced chunk.
    pub fn samples_per_chunk(&self) -> usize {
        (self.output_sample_rate as u64 * self.chunk_duration_ms as u64 / 1000) as usize
    }

    /// Bytes in one paced chunk (960 at 24kHz/20ms).
    pub fn chunk_size_bytes(&self) -> usize {
        self.samples_per_chunk() * BYTES_PER_SAMPLE
    }

    /// Playback duration of one full chunk.
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms as u64)
    }
}

/// How the session manager paces reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay.
    #[serde(with = "millis")]
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Retry immediately, forever.
    pub fn immediate() -> Self {
        Self { max_attempts: None, initial_backoff: Duration::ZERO, max_backoff: Duration::ZERO }
    }

    /// Set the attempt bound.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before retry number `failures` (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 || self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32 << (failures - 1).min(16);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Tool/function definition advertised to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Built-in engine-side tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTool {
    /// Grounding with web search.
    GoogleSearch,
    /// Engine-side code execution.
    CodeExecution,
}

/// Configuration for one live-engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Model to use.
    pub model: String,
    /// API version path segment of the live endpoint.
    pub api_version: String,
    /// Prebuilt voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// BCP-47 speech language code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    /// System instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Response modalities, e.g. `["AUDIO"]`.
    pub response_modalities: Vec<String>,
    /// Engine-side tools.
    #[serde(default)]
    pub builtin_tools: Vec<BuiltinTool>,
    /// Local function declarations.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Let the engine compress long contexts with a sliding window.
    pub sliding_window_compression: bool,
    /// Handle to resume a previous conversation; set per connection attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumption_handle: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            voice: Some(DEFAULT_VOICE.to_string()),
            language_code: Some(DEFAULT_LANGUAGE.to_string()),
            instruction: None,
            response_modalities: vec!["AUDIO".to_string()],
            builtin_tools: Vec::new(),
            tools: Vec::new(),
            sliding_window_compression: true,
            resumption_handle: None,
        }
    }
}

impl LiveConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the speech language.
    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.language_code = Some(language_code.into());
        self
    }

    /// Enable an engine-side tool.
    pub fn with_builtin_tool(mut self, tool: BuiltinTool) -> Self {
        if !self.builtin_tools.contains(&tool) {
            self.builtin_tools.push(tool);
        }
        self
    }

    /// Add a local function declaration.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Copy of this config that resumes from `handle`.
    pub fn resuming(&self, handle: Option<String>) -> Self {
        Self { resumption_handle: handle, ..self.clone() }
    }
}
