//! Output device discovery, selection and the cpal-backed sink.
//!
//! Device selection is by case-insensitive substring match with a fallback to
//! the host default. The sink keeps a small byte ring between the consumer
//! and the real-time callback; the callback never blocks on a condition
//! variable and fills underruns with silence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::PlaybackError;
use crate::sink::{AudioSink, BYTES_PER_SAMPLE, OutputSpec};

/// Upper bound for one capacity wait in [`AudioSink::wait_for_capacity`].
const CAPACITY_WAIT: Duration = Duration::from_millis(50);

/// Pick the first output device matching `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| PlaybackError::Device(format!("no output devices: {e}")))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(PlaybackError::Device(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| PlaybackError::Device("no default output device".into()))
}

/// Print available output devices to stdout (`--list-devices` UX).
pub fn list_devices(host: &cpal::Host) -> Result<(), PlaybackError> {
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::Device(format!("no output devices: {e}")))?;
    for (i, d) in devices.enumerate() {
        let name = d
            .description()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Choose the best supported output config for `target_rate`.
///
/// Exact rate matches win; after that, rates at or below the target beat
/// rates above it (closer first), and ties break on sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig, PlaybackError> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::Device(e.to_string()))?
        .collect();
    if ranges.is_empty() {
        return Err(PlaybackError::Device("no supported output configs".into()));
    }

    let mut best: Option<(u64, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let score = config_score(rate, target_rate, range.sample_format());
        let cfg = range.with_sample_rate(rate);
        match &best {
            Some((best_score, _)) if score >= *best_score => {}
            _ => best = Some((score, cfg)),
        }
    }

    // ranges was non-empty, so best is set.
    Ok(best.unwrap().1)
}

/// Prefer a fixed stream buffer when the device advertises a range; larger
/// buffers mean fewer underruns.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let chosen = if *max > MAX_FRAMES {
                if *min > MAX_FRAMES { *min } else { MAX_FRAMES }
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max)
}

/// Lower is better. Distance from the target dominates, with rates above the
/// target penalized over rates below, then format preference breaks ties.
fn config_score(rate: u32, target: u32, format: cpal::SampleFormat) -> u64 {
    let distance = rate.abs_diff(target) as u64;
    let above = u64::from(rate > target);
    let rank = sample_format_rank(format) as u64;
    (distance << 8) | (above << 4) | rank
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// State shared between the consumer and the cpal callback.
struct SinkShared {
    ring: Mutex<VecDeque<u8>>,
    cv: Condvar,
    capacity: usize,
    /// Gain as `f32` bits; the callback loads it per buffer.
    volume_bits: AtomicU32,
    src_channels: usize,
}

impl SinkShared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }
}

/// Output sink backed by a cpal stream.
///
/// Holds the stream handle, so it lives on the thread that runs the session
/// loop. Bytes written here are S16LE interleaved at [`CpalSink::spec`].
pub struct CpalSink {
    shared: Arc<SinkShared>,
    spec: OutputSpec,
    // Dropped with the sink, which tears the stream down.
    _stream: cpal::Stream,
}

impl CpalSink {
    /// Negotiate an output stream for a source running at `src_rate` /
    /// `src_channels` and start it. The returned spec tells the caller what
    /// rate to convert to; channel mapping happens inside the callback.
    pub fn connect(
        device_hint: Option<&str>,
        src_rate: u32,
        src_channels: usize,
        ring_ms: u32,
    ) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = pick_device(&host, device_hint)?;
        let supported = pick_output_config(&device, src_rate)?;

        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.clone().into();
        if let Some(size) = pick_buffer_size(&supported) {
            config.buffer_size = size;
        }

        let spec = OutputSpec {
            sample_rate: config.sample_rate,
            channels: src_channels,
        };
        let capacity = (spec.byte_rate() as usize * ring_ms.max(10) as usize / 1000)
            .max(spec.frame_bytes() * 64);

        let shared = Arc::new(SinkShared {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            cv: Condvar::new(),
            capacity,
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            src_channels,
        });

        let device_name = device.description().map(|d| d.name().to_string()).ok();
        tracing::info!(
            device = ?device_name,
            rate_hz = config.sample_rate,
            device_channels = config.channels,
            format = ?sample_format,
            "output stream negotiated"
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, &shared),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, &shared),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, &shared),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, &shared),
            other => Err(PlaybackError::Device(format!(
                "unsupported sample format: {other:?}"
            ))),
        }?;
        stream
            .play()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        Ok(Self {
            shared,
            spec,
            _stream: stream,
        })
    }

    pub fn spec(&self) -> OutputSpec {
        self.spec
    }
}

impl AudioSink for CpalSink {
    fn write(&self, bytes: &[u8]) -> usize {
        let mut ring = self.shared.ring.lock().unwrap();
        let free = self.shared.capacity.saturating_sub(ring.len());
        let take = free.min(bytes.len());
        ring.extend(bytes[..take].iter().copied());
        take
    }

    fn wait_for_capacity(&self) {
        let ring = self.shared.ring.lock().unwrap();
        if self.shared.capacity.saturating_sub(ring.len()) >= self.shared.capacity / 4 {
            return;
        }
        let _unused = self.shared.cv.wait_timeout(ring, CAPACITY_WAIT).unwrap();
    }

    fn set_volume(&self, volume: f32) {
        let v = volume.clamp(0.0, 1.0);
        self.shared.volume_bits.store(v.to_bits(), Ordering::Relaxed);
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<SinkShared>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels as usize;
    let shared_cb = shared.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| fill_output(data, dst_channels, &shared_cb),
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::Device(e.to_string()))?;
    Ok(stream)
}

/// Real-time callback body: drain whole source frames from the ring, decode
/// S16LE, apply gain and channel mapping, pad with silence on underrun.
fn fill_output<T>(data: &mut [T], dst_channels: usize, shared: &Arc<SinkShared>)
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let src_channels = shared.src_channels;
    let src_frame_bytes = src_channels * BYTES_PER_SAMPLE;
    let dst_frames = data.len() / dst_channels.max(1);

    let chunk: Vec<u8> = {
        let mut ring = shared.ring.lock().unwrap();
        let wanted = dst_frames * src_frame_bytes;
        let mut take = ring.len().min(wanted);
        take -= take % src_frame_bytes;
        ring.drain(..take).collect()
    };
    shared.cv.notify_all();

    let volume = shared.volume();
    let src_frames = chunk.len() / src_frame_bytes;

    for frame in 0..dst_frames {
        for ch in 0..dst_channels {
            let sample = if frame < src_frames {
                volume * mapped_sample(&chunk, frame, src_channels, dst_channels, ch)
            } else {
                0.0
            };
            data[frame * dst_channels + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
        }
    }
}

fn sample_at(chunk: &[u8], frame: usize, src_channels: usize, ch: usize) -> f32 {
    let idx = (frame * src_channels + ch) * BYTES_PER_SAMPLE;
    let raw = i16::from_le_bytes([chunk[idx], chunk[idx + 1]]);
    raw as f32 / i16::MAX as f32
}

/// Channel mapping: mono duplicates, stereo downmix averages, anything else
/// clamps to the available channels.
fn mapped_sample(
    chunk: &[u8],
    frame: usize,
    src_channels: usize,
    dst_channels: usize,
    dst_ch: usize,
) -> f32 {
    match (src_channels, dst_channels) {
        (1, _) => sample_at(chunk, frame, src_channels, 0),
        (2, 1) => {
            0.5 * (sample_at(chunk, frame, src_channels, 0)
                + sample_at(chunk, frame, src_channels, 1))
        }
        _ => sample_at(chunk, frame, src_channels, dst_ch.min(src_channels - 1)),
    }
}
