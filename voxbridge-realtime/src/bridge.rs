//! The per-call audio pipeline between transport and engine.
//!
//! ```text
//! transport frames -> Resampler -> (send loop) -> engine
//! engine audio -> raw queue -> Pacer -> playback queue -> PlaybackTrack -> transport
//! ```

use crate::audio::{AudioChunk, PcmFrame};
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::pacer::{PaceOutcome, Pacer};
use crate::queue::BoundedQueue;
use crate::resample::Resampler;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Engine audio waiting to be paced, tagged with the interruption epoch it
/// was received in.
#[derive(Debug)]
struct RawPayload {
    epoch: u64,
    data: Bytes,
}

/// Owns the resampler, both queues and the pacer for one call.
#[derive(Debug)]
pub struct AudioBridge {
    config: BridgeConfig,
    resampler: Mutex<Resampler>,
    raw: BoundedQueue<RawPayload>,
    playback: Arc<BoundedQueue<AudioChunk>>,
    pacer: Pacer,
    epoch: AtomicU64,
}

impl AudioBridge {
    /// Build a bridge from a validated config.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            resampler: Mutex::new(Resampler::new(config.engine_sample_rate)),
            raw: BoundedQueue::new(config.raw_queue_capacity),
            playback: Arc::new(BoundedQueue::new(config.playback_queue_capacity)),
            pacer: Pacer::new(config.output_format(), config.chunk_size_bytes()),
            epoch: AtomicU64::new(0),
            config,
        })
    }

    /// Pipeline settings.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Convert an inbound transport frame into engine-rate chunks.
    pub fn resample(&self, frame: &PcmFrame) -> Result<Vec<AudioChunk>> {
        self.resampler.lock().process(frame)
    }

    /// Queue engine output audio for pacing, waiting while the raw queue is full.
    pub async fn push_engine_audio(&self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.raw.put(RawPayload { epoch, data }).await;
    }

    /// Pace raw payloads onto the playback queue until `cancel` fires.
    ///
    /// Payloads from before the latest [`interrupt`](Self::interrupt) are
    /// dropped, including one whose chunks are mid-flight.
    pub async fn run_playback(&self, cancel: &CancellationToken) {
        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                payload = self.raw.get() => payload,
            };
            let epoch = payload.epoch;
            let current = || self.epoch.load(Ordering::SeqCst) == epoch;
            let outcome = self.pacer.pace(&payload.data, &self.playback, current, cancel).await;
            match outcome {
                PaceOutcome::Cancelled { .. } => return,
                PaceOutcome::Interrupted { chunks } => {
                    let bytes = payload.data.len();
                    tracing::debug!(chunks, bytes, "Dropped interrupted payload");
                }
                PaceOutcome::Completed { .. } => {}
            }
        }
    }

    /// Flush all pending playback after a barge-in.
    ///
    /// Returns the number of raw payloads and playback chunks discarded.
    pub fn interrupt(&self) -> (usize, usize) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let raw = self.raw.drain();
        let playback = self.playback.drain();
        tracing::debug!(raw, playback, "Flushed playback queues");
        (raw, playback)
    }

    /// Empty both queues without starting a new epoch.
    pub fn drain(&self) {
        self.raw.drain();
        self.playback.drain();
    }

    /// Payloads waiting to be paced.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Chunks waiting for the transport.
    pub fn playback_len(&self) -> usize {
        self.playback.len()
    }

    /// The transport-facing consumer of the playback queue.
    ///
    /// Create one per outbound track; several tracks would split the audio
    /// between them.
    pub fn playback_track(&self) -> PlaybackTrack {
        PlaybackTrack::new(
            self.playback.clone(),
            self.config.output_sample_rate,
            self.config.samples_per_chunk(),
        )
    }
}

/// Pulls paced chunks at real-time cadence for an outbound audio track.
#[derive(Debug)]
pub struct PlaybackTrack {
    queue: Arc<BoundedQueue<AudioChunk>>,
    sample_rate: u32,
    samples_per_frame: u64,
    start: Option<Instant>,
    timestamp: u64,
}

impl PlaybackTrack {
    fn new(queue: Arc<BoundedQueue<AudioChunk>>, sample_rate: u32, frame_samples: usize) -> Self {
        let samples_per_frame = frame_samples as u64;
        Self { queue, sample_rate, samples_per_frame, start: None, timestamp: 0 }
    }

    /// Sample rate of the frames this track yields.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Timestamp the next frame will carry.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Wait for the next frame's deadline, then take it from the queue.
    ///
    /// The returned chunk is stamped with the track's running sample count.
    pub async fn next_frame(&mut self) -> AudioChunk {
        let start = *self.start.get_or_insert_with(Instant::now);
        let deadline = start + self.offset(self.timestamp + self.samples_per_frame);
        tokio::time::sleep_until(deadline).await;

        let chunk = self.queue.get().await;
        let stamped = chunk.with_timestamp(self.timestamp);
        self.timestamp += chunk.samples();
        stamped
    }

    fn offset(&self, samples: u64) -> Duration {
        Duration::from_nanos(samples * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }
}
