//! # voxbridge telemetry
//!
//! Structured logging for voxbridge services.
//!
//! ## Usage
//!
//! ```rust
//! use voxbridge_telemetry::{call_session_span, init_telemetry, info};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     init_telemetry("voxbridge")?;
//!
//!     let span = call_session_span("peer-42", "outbound");
//!     let _enter = span.enter();
//!     info!("Calling");
//!     Ok(())
//! }
//! ```

pub mod init;
pub mod spans;

// Re-export tracing macros for convenience
pub use tracing::{Span, debug, error, info, instrument, trace, warn};

pub use spans::*;

pub use init::{init_json_telemetry, init_telemetry};
