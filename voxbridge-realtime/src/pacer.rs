//! Real-time pacing of bursty engine audio.

use crate::audio::{AudioChunk, AudioFormat};
use crate::queue::BoundedQueue;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a call to [`Pacer::pace`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    /// Every chunk of the payload was queued.
    Completed {
        /// Chunks queued.
        chunks: usize,
    },
    /// The admit check failed; the rest of the payload was dropped.
    Interrupted {
        /// Chunks queued before the interruption.
        chunks: usize,
    },
    /// The cancellation token fired.
    Cancelled {
        /// Chunks queued before cancellation.
        chunks: usize,
    },
}

impl PaceOutcome {
    /// Chunks queued.
    pub fn chunks(&self) -> usize {
        match *self {
            Self::Completed { chunks }
            | Self::Interrupted { chunks }
            | Self::Cancelled { chunks } => chunks,
        }
    }
}

/// Splits payloads into fixed-size chunks and releases them at playback speed.
#[derive(Debug)]
pub struct Pacer {
    format: AudioFormat,
    chunk_size: usize,
    next_timestamp: AtomicU64,
}

impl Pacer {
    /// Create a pacer producing `chunk_size`-byte chunks in `format`.
    pub fn new(format: AudioFormat, chunk_size: usize) -> Self {
        let frame = format.bytes_per_frame().max(1);
        // Keep chunks sample-aligned.
        let chunk_size = (chunk_size.max(frame) / frame) * frame;
        Self { format, chunk_size, next_timestamp: AtomicU64::new(0) }
    }

    /// Bytes per full chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Playback duration of a chunk holding `bytes` bytes.
    pub fn chunk_duration(&self, bytes: usize) -> Duration {
        self.format.duration_of(bytes)
    }

    /// Queue `payload` onto `playback`, one chunk per chunk-duration.
    ///
    /// Each chunk is pushed only while `admit` holds (checked under the
    /// queue lock), then the pacer sleeps for the chunk's playback time.
    /// Cancellation is observed while blocked on a full queue and during the
    /// sleep, never between pushing a chunk and its bytes landing.
    pub async fn pace(
        &self,
        payload: &Bytes,
        playback: &BoundedQueue<AudioChunk>,
        admit: impl Fn() -> bool,
        cancel: &CancellationToken,
    ) -> PaceOutcome {
        let mut chunks = 0;
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + self.chunk_size).min(payload.len());
            let piece = payload.slice(offset..end);
            offset = end;

            let samples = (piece.len() / self.format.bytes_per_frame().max(1)) as u64;
            let timestamp = self.next_timestamp.load(Ordering::Relaxed);
            let duration = self.chunk_duration(piece.len());
            let chunk = AudioChunk::new(piece, self.format.sample_rate, timestamp);

            let admitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PaceOutcome::Cancelled { chunks },
                admitted = playback.put_if(chunk, &admit) => admitted,
            };
            if !admitted {
                tracing::debug!(chunks, "Pacing interrupted, dropping rest of payload");
                return PaceOutcome::Interrupted { chunks };
            }
            self.next_timestamp.fetch_add(samples, Ordering::Relaxed);
            chunks += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PaceOutcome::Cancelled { chunks },
                _ = tokio::time::sleep(duration) => {}
            }
        }
        PaceOutcome::Completed { chunks }
    }
}
