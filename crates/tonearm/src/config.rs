/// Tuning knobs for one playback session.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Decode-ahead target in seconds. The producer blocks once the shared
    /// buffer holds this much audio.
    pub buffer_seconds: f32,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Initial volume in percent (0..=100).
    pub volume_percent: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 2.0,
            chunk_frames: 1024,
            volume_percent: 100,
        }
    }
}

impl EngineConfig {
    /// Buffer target with non-finite or non-positive values replaced by the
    /// default.
    pub fn effective_buffer_seconds(&self) -> f32 {
        if self.buffer_seconds.is_finite() && self.buffer_seconds > 0.0 {
            self.buffer_seconds
        } else {
            2.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_buffer_seconds_falls_back() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.effective_buffer_seconds(), 2.0);
        cfg.buffer_seconds = 0.5;
        assert_eq!(cfg.effective_buffer_seconds(), 0.5);
        cfg.buffer_seconds = -1.0;
        assert_eq!(cfg.effective_buffer_seconds(), 2.0);
        cfg.buffer_seconds = f32::NAN;
        assert_eq!(cfg.effective_buffer_seconds(), 2.0);
    }
}
