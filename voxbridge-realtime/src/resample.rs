//! Streaming format conversion from transport frames to engine input chunks.
//!
//! The transport hands over frames of whatever size, rate and channel layout
//! it negotiated; the engine wants mono PCM16 at a fixed rate. Frames are
//! down-mixed to mono, resampled with an FFT resampler whose filter state
//! carries across frames, and emitted as timestamped [`AudioChunk`]s.

use crate::audio::{AudioChunk, PcmFrame};
use crate::error::{RealtimeError, Result};
use rubato::{FftFixedIn, Resampler as _};

/// Input block length in milliseconds fed to the FFT stage.
const BLOCK_MS: usize = 10;
/// Sub-chunks per FFT block.
const SUB_CHUNKS: usize = 2;

struct FftStage {
    input_rate: u32,
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl FftStage {
    fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        let block = (input_rate as usize * BLOCK_MS / 1000).max(1);
        let resampler = FftFixedIn::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            block,
            SUB_CHUNKS,
            1,
        )
        .map_err(|e| RealtimeError::audio(format!("resampler construction failed: {e}")))?;
        Ok(Self { input_rate, resampler, pending: Vec::new() })
    }

    fn process(&mut self, mono: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(mono);
        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if needed == 0 || self.pending.len() < needed {
                break;
            }
            let block = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let frames = self
                .resampler
                .process(&block, None)
                .map_err(|e| RealtimeError::audio(format!("resample failed: {e}")))?;
            if let Some(channel) = frames.into_iter().next() {
                out.extend(channel);
            }
        }
        Ok(out)
    }

    /// Push out whatever input is still buffered, zero-padding the last block.
    fn flush(&mut self) -> Result<Vec<f32>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let block = vec![std::mem::take(&mut self.pending)];
        let frames = self
            .resampler
            .process_partial(Some(block.as_slice()), None)
            .map_err(|e| RealtimeError::audio(format!("resampler flush failed: {e}")))?;
        Ok(frames.into_iter().next().unwrap_or_default())
    }
}

/// Converts transport frames into mono PCM16 chunks at a target rate.
///
/// One instance per call; it is not shared across calls.
pub struct Resampler {
    target_rate: u32,
    stage: Option<FftStage>,
    emitted: u64,
}

impl Resampler {
    /// Create a resampler producing mono PCM16 at `target_rate`.
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate, stage: None, emitted: 0 }
    }

    /// Output sample rate.
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Samples emitted so far (the timestamp of the next chunk).
    pub fn samples_emitted(&self) -> u64 {
        self.emitted
    }

    /// Convert one frame, yielding zero or more output chunks.
    ///
    /// The FFT stage consumes fixed-size blocks, so small frames may produce
    /// nothing until enough input has accumulated.
    pub fn process(&mut self, frame: &PcmFrame) -> Result<Vec<AudioChunk>> {
        if frame.channels == 0 {
            return Err(RealtimeError::audio("frame has zero channels"));
        }
        if frame.sample_rate == 0 {
            return Err(RealtimeError::audio("frame has zero sample rate"));
        }

        let mut samples = Vec::new();
        if self.stage.as_ref().is_some_and(|s| s.input_rate != frame.sample_rate) {
            if let Some(mut old) = self.stage.take() {
                let flushed = old.flush()?;
                tracing::debug!(
                    input_rate = old.input_rate,
                    samples = flushed.len(),
                    "Input rate changed, flushed resampler stage"
                );
                samples.extend(flushed.into_iter().map(f32_to_i16));
            }
        }

        if frame.sample_rate == self.target_rate {
            samples.extend(downmix_i16(frame));
        } else {
            if self.stage.is_none() {
                tracing::debug!(
                    input_rate = frame.sample_rate,
                    output_rate = self.target_rate,
                    "Building resampler stage"
                );
                self.stage = Some(FftStage::new(frame.sample_rate, self.target_rate)?);
            }
            if let Some(stage) = self.stage.as_mut() {
                let mono = downmix_f32(frame);
                samples.extend(stage.process(&mono)?.into_iter().map(f32_to_i16));
            }
        }

        if samples.is_empty() {
            return Ok(Vec::new());
        }
        let chunk = AudioChunk::from_i16_samples(&samples, self.target_rate, self.emitted);
        self.emitted += samples.len() as u64;
        Ok(vec![chunk])
    }
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("target_rate", &self.target_rate)
            .field("input_rate", &self.stage.as_ref().map(|s| s.input_rate))
            .field("emitted", &self.emitted)
            .finish()
    }
}

fn downmix_i16(frame: &PcmFrame) -> Vec<i16> {
    let channels = frame.channels as usize;
    if channels == 1 {
        return frame.samples.clone();
    }
    frame
        .samples
        .chunks_exact(channels)
        .map(|f| (f.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
        .collect()
}

fn downmix_f32(frame: &PcmFrame) -> Vec<f32> {
    let channels = frame.channels as usize;
    frame
        .samples
        .chunks_exact(channels)
        .map(|f| {
            let sum: f32 = f.iter().map(|&s| s as f32 / 32768.0).sum();
            sum / channels as f32
        })
        .collect()
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frame(rate: u32, channels: u16, samples_per_channel: usize, offset: usize) -> PcmFrame {
        let mut samples = Vec::with_capacity(samples_per_channel * channels as usize);
        for i in 0..samples_per_channel {
            let t = (offset + i) as f32 / rate as f32;
            let v = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
            for _ in 0..channels {
                samples.push(v);
            }
        }
        PcmFrame::new(samples, rate, channels)
    }

    #[test]
    fn test_same_rate_mono_is_passthrough() {
        let mut resampler = Resampler::new(16000);
        let frame = PcmFrame::new(vec![1, -2, 3, -4], 16000, 1);
        let chunks = resampler.process(&frame).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].to_i16_samples().unwrap(), vec![1, -2, 3, -4]);
        assert_eq!(chunks[0].timestamp(), 0);
        assert_eq!(resampler.samples_emitted(), 4);
    }

    #[test]
    fn test_same_rate_stereo_is_downmixed() {
        let mut resampler = Resampler::new(16000);
        let frame = PcmFrame::new(vec![100, 300, -50, -150], 16000, 2);
        let chunks = resampler.process(&frame).unwrap();
        assert_eq!(chunks[0].to_i16_samples().unwrap(), vec![200, -100]);
    }

    #[test]
    fn test_48k_stereo_to_16k_mono() {
        let mut resampler = Resampler::new(16000);
        let mut total = 0u64;
        let mut next_timestamp = 0u64;
        for n in 0..50 {
            let frame = sine_frame(48000, 2, 960, n * 960);
            for chunk in resampler.process(&frame).unwrap() {
                assert_eq!(chunk.sample_rate(), 16000);
                assert_eq!(chunk.timestamp(), next_timestamp);
                next_timestamp += chunk.samples();
                total += chunk.samples();
            }
        }
        // One second of input; the FFT stage holds back at most a few blocks.
        assert!(total <= 16000, "emitted {total}");
        assert!(total >= 14000, "emitted {total}");
    }

    #[test]
    fn test_small_frames_accumulate() {
        let mut resampler = Resampler::new(16000);
        let first = resampler.process(&sine_frame(48000, 1, 10, 0)).unwrap();
        assert!(first.is_empty());
    }

    #[test]
    fn test_rate_change_flushes_buffered_input() {
        let mut resampler = Resampler::new(16000);
        assert!(resampler.process(&sine_frame(48000, 1, 100, 0)).unwrap().is_empty());

        // 10 samples at 8 kHz are not enough for the new stage, so any
        // output is the flushed 48 kHz input.
        let chunks = resampler.process(&sine_frame(8000, 1, 10, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].samples() > 0);
        assert_eq!(chunks[0].timestamp(), 0);
        assert_eq!(resampler.samples_emitted(), chunks[0].samples());
    }

    #[test]
    fn test_switch_to_target_rate_keeps_buffered_input() {
        let mut resampler = Resampler::new(16000);
        assert!(resampler.process(&sine_frame(48000, 1, 100, 0)).unwrap().is_empty());

        let chunks = resampler.process(&PcmFrame::new(vec![7; 4], 16000, 1)).unwrap();
        let samples = chunks[0].to_i16_samples().unwrap();
        assert!(samples.len() > 4);
        assert_eq!(&samples[samples.len() - 4..], &[7, 7, 7, 7]);
    }

    #[test]
    fn test_zero_channels_rejected() {
        let mut resampler = Resampler::new(16000);
        assert!(resampler.process(&PcmFrame::new(vec![1, 2], 48000, 0)).is_err());
    }
}
