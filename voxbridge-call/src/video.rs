//! Remote video handling.
//!
//! The engine only takes audio. Remote video still has to be read so the
//! transport's receive buffers do not fill up; frames are dropped on arrival.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Metadata of one received video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrame {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Presentation timestamp in the track's time base.
    pub timestamp: u64,
}

/// Inbound video frames from the remote party.
#[async_trait]
pub trait VideoSource: Send {
    /// Next frame, or `None` once the track has ended.
    async fn recv(&mut self) -> Option<VideoFrame>;
}

#[async_trait]
impl VideoSource for mpsc::Receiver<VideoFrame> {
    async fn recv(&mut self) -> Option<VideoFrame> {
        mpsc::Receiver::recv(self).await
    }
}

/// Read and drop frames until the track ends or `cancel` fires.
///
/// Returns the number of frames discarded.
pub async fn discard_video(mut source: Box<dyn VideoSource>, cancel: CancellationToken) -> u64 {
    let mut discarded = 0u64;
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = source.recv() => frame,
        };
        match frame {
            Some(frame) => {
                discarded += 1;
                if discarded == 1 {
                    tracing::debug!(
                        width = frame.width,
                        height = frame.height,
                        "Discarding remote video"
                    );
                }
            }
            None => break,
        }
    }
    tracing::debug!(frames = discarded, "Remote video drain finished");
    discarded
}
