//! # voxbridge-realtime
//!
//! The engine side of a voxbridge call: a duplex audio bridge and a
//! resumable session manager for streaming conversation engines.
//!
//! ## Architecture
//!
//! ```text
//!   transport frames ──► Resampler ──► send loop ──────────────► engine
//!                                                                   │
//!   transport track ◄── PlaybackTrack ◄── playback queue            │
//!                                            ▲                      │
//!                                          Pacer ◄── raw queue ◄── receive loop
//!                                                                   │
//!                                                   tools, text ◄───┘
//! ```
//!
//! ## Features
//!
//! - **ConversationSessionManager**: send/receive/playback loops under one
//!   cancellation scope, reconnect with resumption handles, tool dispatch
//! - **AudioBridge**: resampling, bounded queues, real-time pacing and
//!   barge-in flushing
//! - **Gemini Live provider** (feature `gemini`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voxbridge_realtime::gemini::{GeminiLiveBackend, GeminiLiveEngine};
//! use voxbridge_realtime::{AudioBridge, BridgeConfig, ConversationSessionManager, LiveConfig};
//!
//! let engine = Arc::new(GeminiLiveEngine::new(GeminiLiveBackend::from_env()?));
//! let bridge = Arc::new(AudioBridge::new(BridgeConfig::default())?);
//! let manager = ConversationSessionManager::builder(engine, bridge.clone())
//!     .config(LiveConfig::default().with_instruction("You are a helpful voice assistant."))
//!     .build();
//!
//! let mut track = bridge.playback_track();
//! manager.start(&mut inbound_frames).await?;
//! ```

pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod model;
pub mod pacer;
pub mod queue;
pub mod resample;
pub mod session;
pub mod tools;

// Provider implementations
#[cfg(feature = "gemini")]
pub mod gemini;

// Re-exports
pub use audio::{AudioChunk, AudioFormat, PcmFrame};
pub use bridge::{AudioBridge, PlaybackTrack};
pub use config::{BridgeConfig, BuiltinTool, LiveConfig, ReconnectPolicy, ToolDefinition};
pub use error::{RealtimeError, Result};
pub use events::{EngineMessage, FunctionCall, FunctionResponse, ResumptionUpdate};
pub use manager::{
    ConnectionState, ConversationSessionManager, ConversationSessionManagerBuilder, ManagerState,
    StreamingConnection,
};
pub use model::{BoxedEngine, LiveEngine};
pub use pacer::{PaceOutcome, Pacer};
pub use queue::BoundedQueue;
pub use resample::Resampler;
pub use session::{BoxedConnection, FrameSource, LiveConnection, LogOutputSink, OutputSink};
pub use tools::{FnToolHandler, ToolHandler, ToolRegistry};
