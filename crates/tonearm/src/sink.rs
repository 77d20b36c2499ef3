//! Output sink boundary.
//!
//! The consumer side of the engine only ever talks to [`AudioSink`]; the cpal
//! implementation lives in [`crate::device`].

/// Bytes per sample of the fixed output format (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Output stream parameters negotiated at session start. The engine emits
/// S16LE interleaved PCM at exactly this rate and channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: usize,
}

impl OutputSpec {
    /// Output bytes per second of audio.
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * BYTES_PER_SAMPLE as u64
    }

    /// Size in bytes of one interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels * BYTES_PER_SAMPLE
    }
}

/// Playback device boundary: accepts S16LE interleaved PCM bytes.
///
/// `write` never blocks beyond the copy; callers pace themselves with
/// `wait_for_capacity`, which must bound its own wait so a stop request is
/// never starved for longer than one interval.
pub trait AudioSink {
    /// Append up to `bytes.len()` bytes, returning how many were accepted.
    fn write(&self, bytes: &[u8]) -> usize;

    /// Block until the sink frees buffer space, with a bounded internal
    /// timeout.
    fn wait_for_capacity(&self);

    /// Best-effort, immediate volume control, `0.0..=1.0`.
    fn set_volume(&self, volume: f32);
}

/// Sink that swallows audio immediately. Useful for headless runs and tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&self, bytes: &[u8]) -> usize {
        bytes.len()
    }

    fn wait_for_capacity(&self) {}

    fn set_volume(&self, _volume: f32) {}
}
