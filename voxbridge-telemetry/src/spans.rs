//! Span helpers for voxbridge operations
//!
//! Pre-configured spans for instrumenting calls, engine connections and tool
//! execution.

use tracing::Span;

/// Create a span covering one call session
///
/// # Arguments
/// * `remote_peer` - Id of the remote party
/// * `direction` - `"outbound"` or `"inbound"`
///
/// # Example
/// ```
/// use voxbridge_telemetry::call_session_span;
/// let span = call_session_span("peer-42", "inbound");
/// let _enter = span.enter();
/// ```
pub fn call_session_span(remote_peer: &str, direction: &str) -> Span {
    tracing::info_span!("call.session", call.remote_peer = remote_peer, call.direction = direction)
}

/// Create a span for one engine connection attempt
///
/// # Example
/// ```
/// use voxbridge_telemetry::engine_connection_span;
/// let span = engine_connection_span("gemini-live-2.5-flash-preview", 1);
/// let _enter = span.enter();
/// ```
pub fn engine_connection_span(model_name: &str, attempt: u32) -> Span {
    tracing::info_span!("engine.connection", model.name = model_name, attempt)
}

/// Create a span for tool execution
pub fn tool_execute_span(tool_name: &str, call_id: &str) -> Span {
    tracing::info_span!("tool.execute", tool.name = tool_name, tool.call_id = call_id)
}
