//! Audio format definitions and utilities.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sample rate the live engine expects for input audio.
pub const ENGINE_INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the synthetic outbound transport track (and of engine output audio).
pub const TRANSPORT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Complete PCM audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000, 48000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new audio format specification.
    pub fn new(sample_rate: u32, channels: u8, bits_per_sample: u8) -> Self {
        Self { sample_rate, channels, bits_per_sample }
    }

    /// PCM16 mono at 24kHz (engine output and transport output).
    pub fn pcm16_24khz() -> Self {
        Self::new(TRANSPORT_OUTPUT_SAMPLE_RATE, 1, 16)
    }

    /// PCM16 mono at 16kHz (engine input).
    pub fn pcm16_16khz() -> Self {
        Self::new(ENGINE_INPUT_SAMPLE_RATE, 1, 16)
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// Bytes per sample frame (all channels).
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample / 8) as usize
    }

    /// Calculate duration in milliseconds for a given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bytes_per_second = self.bytes_per_second() as u64;
        if bytes_per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(bytes as u64 * 1_000_000_000 / bytes_per_second)
    }

    /// Number of bytes holding `ms` milliseconds of audio.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * ms as u64 / 1000) as usize * self.bytes_per_frame()
    }
}

/// An immutable run of PCM16 little-endian audio.
///
/// `timestamp` counts samples since the start of the session on the side
/// that produced the chunk. Chunks move through queues by value and are
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Bytes,
    sample_rate: u32,
    timestamp: u64,
}

impl AudioChunk {
    /// Create a new mono PCM16 chunk.
    pub fn new(data: impl Into<Bytes>, sample_rate: u32, timestamp: u64) -> Self {
        Self { data: data.into(), sample_rate, timestamp }
    }

    /// Create a chunk from i16 samples (converted to PCM16 little-endian bytes).
    pub fn from_i16_samples(samples: &[i16], sample_rate: u32, timestamp: u64) -> Self {
        let le: Vec<i16> = samples.iter().map(|s| s.to_le()).collect();
        Self::new(bytemuck::cast_slice::<i16, u8>(&le).to_vec(), sample_rate, timestamp)
    }

    /// Raw PCM bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Sample count since session start at which this chunk begins.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Number of mono samples in this chunk.
    pub fn samples(&self) -> u64 {
        (self.data.len() / BYTES_PER_SAMPLE) as u64
    }

    /// Whether the chunk carries no audio.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        AudioFormat::new(self.sample_rate, 1, 16).duration_of(self.data.len())
    }

    /// Return a copy of this chunk carrying a different timestamp.
    pub fn with_timestamp(&self, timestamp: u64) -> Self {
        Self { data: self.data.clone(), sample_rate: self.sample_rate, timestamp }
    }

    /// Encode audio data as base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Convert the audio data to i16 samples (PCM16 little-endian).
    ///
    /// Returns an error string if the data length is not even (not valid PCM16).
    pub fn to_i16_samples(&self) -> Result<Vec<i16>, String> {
        if self.data.len() % 2 != 0 {
            return Err(format!(
                "Invalid data length for PCM16: {} (must be even)",
                self.data.len()
            ));
        }
        Ok(self.data.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
    }
}

/// One frame of decoded audio as delivered by a media transport.
///
/// Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    /// Interleaved i16 samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
}

impl PcmFrame {
    /// Create a new frame.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self { samples, sample_rate, channels }
    }

    /// Samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 { 0 } else { self.samples.len() / self.channels as usize }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_bytes_per_second() {
        assert_eq!(AudioFormat::pcm16_24khz().bytes_per_second(), 48000);
        assert_eq!(AudioFormat::pcm16_16khz().bytes_per_second(), 32000);
    }

    #[test]
    fn test_audio_format_duration() {
        let format = AudioFormat::pcm16_24khz();
        let duration = format.duration_ms(48000);
        assert!((duration - 1000.0).abs() < 0.001);
        assert_eq!(format.duration_of(960), Duration::from_millis(20));
    }

    #[test]
    fn test_bytes_for_ms() {
        assert_eq!(AudioFormat::pcm16_24khz().bytes_for_ms(20), 960);
        assert_eq!(AudioFormat::pcm16_16khz().bytes_for_ms(20), 640);
    }

    #[test]
    fn test_chunk_samples_and_duration() {
        let chunk = AudioChunk::new(vec![0u8; 960], 24000, 480);
        assert_eq!(chunk.samples(), 480);
        assert_eq!(chunk.timestamp(), 480);
        assert_eq!(chunk.duration(), Duration::from_millis(20));
        assert_eq!(chunk.with_timestamp(0).timestamp(), 0);
    }

    #[test]
    fn test_i16_samples_roundtrip() {
        let samples: Vec<i16> = vec![0, 1, -1, 32767, -32768, 1000, -1000];
        let chunk = AudioChunk::from_i16_samples(&samples, 24000, 0);
        assert_eq!(chunk.to_i16_samples().unwrap(), samples);
    }

    #[test]
    fn test_i16_samples_are_little_endian() {
        let chunk = AudioChunk::from_i16_samples(&[1, -2, 0x1234], 16000, 0);
        assert_eq!(&chunk.data()[..], &[0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_i16_samples_odd_bytes_error() {
        let chunk = AudioChunk::new(vec![0u8, 1, 2], 24000, 0);
        assert!(chunk.to_i16_samples().is_err());
    }

    #[test]
    fn test_frame_samples_per_channel() {
        let frame = PcmFrame::new(vec![0; 1920], 48000, 2);
        assert_eq!(frame.samples_per_channel(), 960);
        assert_eq!(PcmFrame::new(vec![], 48000, 0).samples_per_channel(), 0);
    }
}
