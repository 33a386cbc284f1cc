//! Traits at the seams of the session manager: the engine connection, the
//! inbound media source and the output sink.

use crate::audio::{AudioChunk, PcmFrame};
use crate::error::Result;
use crate::events::{CodeExecutionResult, EngineMessage, ExecutableCode, FunctionResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// One live duplex connection to the conversation engine.
///
/// Sending and receiving happen concurrently from different loops, so all
/// methods take `&self`.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Connection id, for logs.
    fn connection_id(&self) -> &str;

    /// Send one chunk of input audio.
    async fn send_audio(&self, chunk: &AudioChunk) -> Result<()>;

    /// Answer the function calls of one tool-call message.
    async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()>;

    /// Next message from the engine.
    ///
    /// Returns `None` when the engine closed the stream.
    async fn next_message(&self) -> Option<Result<EngineMessage>>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> Result<()>;
}

/// A shared connection type.
pub type BoxedConnection = Arc<dyn LiveConnection>;

/// Inbound audio frames from the remote party.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the media stream has ended.
    async fn recv(&mut self) -> Option<PcmFrame>;
}

#[async_trait]
impl FrameSource for tokio::sync::mpsc::Receiver<PcmFrame> {
    async fn recv(&mut self) -> Option<PcmFrame> {
        tokio::sync::mpsc::Receiver::recv(self).await
    }
}

#[async_trait]
impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    async fn recv(&mut self) -> Option<PcmFrame> {
        (**self).recv().await
    }
}

/// Receives the non-audio output of the engine.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Called with each text part.
    async fn on_text(&self, _text: &str) {}

    /// Called with code the engine generated.
    async fn on_executable_code(&self, _code: &ExecutableCode) {}

    /// Called with the result of server-side code execution.
    async fn on_code_result(&self, _result: &CodeExecutionResult) {}

    /// Called when the model finishes a turn.
    async fn on_turn_complete(&self) {}
}

/// Output sink that writes engine text to the log.
#[derive(Debug, Clone, Default)]
pub struct LogOutputSink;

#[async_trait]
impl OutputSink for LogOutputSink {
    async fn on_text(&self, text: &str) {
        tracing::info!(text, "Engine text");
    }

    async fn on_executable_code(&self, code: &ExecutableCode) {
        tracing::info!(language = %code.language, code = %code.code, "Engine executable code");
    }

    async fn on_code_result(&self, result: &CodeExecutionResult) {
        tracing::info!(outcome = %result.outcome, output = %result.output, "Engine code result");
    }

    async fn on_turn_complete(&self) {
        tracing::debug!("Engine turn complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mpsc_receiver_is_frame_source() {
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let mut source: Box<dyn FrameSource> = Box::new(rx);
        tx.send(PcmFrame::new(vec![1, 2], 16000, 1)).await.unwrap();
        drop(tx);
        assert_eq!(source.recv().await.map(|f| f.samples), Some(vec![1, 2]));
        assert!(source.recv().await.is_none());
    }
}
