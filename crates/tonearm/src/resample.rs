//! Decoded-audio to output-format conversion.
//!
//! Converts interleaved `f32` blocks from the source rate to S16LE
//! interleaved bytes at the output rate. When the rates match this is a
//! straight sample serialization; otherwise input is accumulated into fixed
//! chunks and pushed through Rubato's streaming sinc resampler, with a tail
//! flush at end of stream. Runs entirely on the producer thread.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::PlaybackError;
use crate::source::DecodedBlock;

pub struct OutputConverter {
    /// `None` means pass-through: the source already runs at the output rate.
    resampler: Option<Box<dyn Resampler<f32> + Send>>,
    channels: usize,
    chunk_frames: usize,
    /// Interleaved input awaiting a full chunk.
    pending: Vec<f32>,
    /// Interleaved resampler output, reused across calls.
    scratch: Vec<f32>,
}

impl OutputConverter {
    /// Build the converter for one session. A failure here is fatal and must
    /// surface before the producer thread starts.
    pub fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self, PlaybackError> {
        let chunk_frames = chunk_frames.max(1);

        let resampler = if src_rate == dst_rate {
            None
        } else {
            let f_ratio = dst_rate as f64 / src_rate as f64;

            let sinc_len = 128;
            let window = WindowFunction::BlackmanHarris2;
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: calculate_cutoff(sinc_len, window),
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window,
            };

            let resampler = Async::<f32>::new_sinc(
                f_ratio,
                1.1,
                &params,
                chunk_frames,
                channels,
                FixedAsync::Input,
            )
            .map_err(|e| PlaybackError::ResamplerInit {
                src_rate,
                dst_rate,
                channels,
                reason: e.to_string(),
            })?;
            Some(Box::new(resampler) as Box<dyn Resampler<f32> + Send>)
        };

        // Output headroom for one chunk at the configured max ratio drift.
        let ratio = dst_rate as f64 / src_rate as f64;
        let scratch_frames = (chunk_frames as f64 * ratio * 1.1).ceil() as usize + 16;
        let scratch = vec![0.0f32; scratch_frames * channels];

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::new(),
            scratch,
        })
    }

    /// Whether an actual rate conversion is in play.
    pub fn needed(&self) -> bool {
        self.resampler.is_some()
    }

    /// Convert one decoded block to output bytes.
    ///
    /// May return no bytes while the resampler accumulates a full chunk;
    /// that is not an error.
    pub fn convert(&mut self, block: &DecodedBlock) -> Result<Vec<u8>, PlaybackError> {
        let Some(resampler) = self.resampler.as_deref_mut() else {
            let mut out = Vec::new();
            write_s16le(&block.samples, &mut out);
            return Ok(out);
        };

        self.pending.extend_from_slice(&block.samples);
        let chunk_samples = self.chunk_frames * self.channels;

        let mut out = Vec::new();
        while self.pending.len() >= chunk_samples {
            let produced_frames = run_resampler(
                resampler,
                &self.pending[..chunk_samples],
                self.chunk_frames,
                None,
                self.channels,
                &mut self.scratch,
            )?;
            write_s16le(&self.scratch[..produced_frames * self.channels], &mut out);
            self.pending.drain(..chunk_samples);
        }
        Ok(out)
    }

    /// Flush the partial tail after the source hits end of stream.
    pub fn finish(&mut self) -> Result<Vec<u8>, PlaybackError> {
        let Some(resampler) = self.resampler.as_deref_mut() else {
            return Ok(Vec::new());
        };
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            return Ok(Vec::new());
        }

        let produced_frames = run_resampler(
            resampler,
            &self.pending,
            tail_frames,
            Some(tail_frames),
            self.channels,
            &mut self.scratch,
        )?;
        self.pending.clear();

        let mut out = Vec::new();
        write_s16le(&self.scratch[..produced_frames * self.channels], &mut out);
        Ok(out)
    }
}

/// Run one resampler pass over `frames` of interleaved input.
///
/// Returns the number of output frames written into `scratch`.
fn run_resampler(
    resampler: &mut (dyn Resampler<f32> + Send),
    input: &[f32],
    frames: usize,
    partial: Option<usize>,
    channels: usize,
    scratch: &mut [f32],
) -> Result<usize, PlaybackError> {
    let input_adapter = InterleavedSlice::new(input, channels, frames)
        .map_err(|e| PlaybackError::Decode(format!("input adapter: {e}")))?;

    let capacity_frames = scratch.len() / channels;
    let mut output_adapter = InterleavedSlice::new_mut(scratch, channels, capacity_frames)
        .map_err(|e| PlaybackError::Decode(format!("output adapter: {e}")))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: partial,
    };

    let (_consumed_frames, produced_frames) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| PlaybackError::Decode(format!("resample: {e}")))?;
    Ok(produced_frames)
}

/// Serialize `f32` samples to interleaved signed 16-bit little-endian bytes.
fn write_s16le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
}
