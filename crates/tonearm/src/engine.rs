//! Playback engine: producer thread, consumer pump and session control.
//!
//! A session runs two halves. The producer thread owns the media source and
//! the rate converter; it decodes ahead into the shared [`PcmBuffer`] and
//! blocks once the decode-ahead target is reached. The consumer side is
//! caller-driven: each [`PlaybackSession::pump`] call applies queued control
//! commands, moves one chunk of bytes from the buffer to the sink and reports
//! whether the session is still live.
//!
//! Control arrives through a cloneable [`ControlHandle`] over a channel, so
//! UI threads never touch the decoder or the sink directly. Stop is a flag
//! inside the buffer; every blocking wait in the pipeline is bounded, which
//! makes stop latency at most one wait slice per stage.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::buffer::{PcmBuffer, SeekTarget};
use crate::config::EngineConfig;
use crate::device::CpalSink;
use crate::error::PlaybackError;
use crate::resample::OutputConverter;
use crate::sink::{AudioSink, OutputSpec};
use crate::source::{MediaSource, Source};
use crate::status::{EngineState, PlaybackStatus};

/// Consumer sleep while paused. Short enough that resume feels immediate.
const PAUSE_POLL: Duration = Duration::from_millis(20);

/// Volume moves in single percent steps.
const VOLUME_STEP: i16 = 1;

/// Control commands accepted by a running session.
#[derive(Clone, Copy, Debug)]
enum Command {
    TogglePause,
    VolumeUp,
    VolumeDown,
    /// Relative seek in milliseconds.
    SeekBy(i64),
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The track played to the end.
    Completed,
    /// A stop was requested.
    Stopped,
    /// The producer hit an unrecoverable error.
    Failed,
}

/// Outcome of one [`PlaybackSession::pump`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Audio moved to the sink.
    Playing,
    /// Nothing to do right now (paused, or waiting on the producer).
    Idle,
    /// The session is over; further pumps return the same reason.
    Finished(EndReason),
}

const FINISHED_NONE: u8 = 0;
const FINISHED_COMPLETED: u8 = 1;
const FINISHED_STOPPED: u8 = 2;
const FINISHED_FAILED: u8 = 3;

/// State both halves and every control handle can reach.
struct Shared {
    buffer: PcmBuffer,
    paused: AtomicBool,
    volume_percent: AtomicU8,
    finished: AtomicU8,
}

/// One track being played. Owns the sink and the producer thread; the
/// caller's loop drives playback through [`PlaybackSession::pump`] or
/// [`PlaybackSession::run`].
pub struct PlaybackSession {
    shared: Arc<Shared>,
    sink: Box<dyn AudioSink>,
    out: OutputSpec,
    duration_ms: Option<u64>,
    codec: Option<String>,
    ctl_tx: Sender<Command>,
    ctl_rx: Receiver<Command>,
    producer: Option<JoinHandle<()>>,
    /// Bytes moved per pump, roughly 100 ms of audio.
    write_chunk: usize,
    finished: Option<EndReason>,
}

impl PlaybackSession {
    /// Open `path`, connect an output device and start decoding.
    pub fn start(
        path: &Path,
        device_hint: Option<&str>,
        cfg: &EngineConfig,
    ) -> Result<Self, PlaybackError> {
        let source = MediaSource::open(path)?;
        let params = source.params().clone();
        let sink = CpalSink::connect(device_hint, params.sample_rate, params.channels, 200)?;
        let out = sink.spec();
        Self::spawn(source, Box::new(sink), out, cfg)
    }

    /// Start a session over an arbitrary source and sink. The sink must
    /// accept S16LE interleaved PCM at `out`.
    pub fn spawn<S>(
        source: S,
        sink: Box<dyn AudioSink>,
        out: OutputSpec,
        cfg: &EngineConfig,
    ) -> Result<Self, PlaybackError>
    where
        S: Source + 'static,
    {
        let params = source.params().clone();

        // Converter construction can fail (bad rate combination); surface
        // that here instead of from inside the producer thread.
        let converter = OutputConverter::new(
            params.sample_rate,
            out.sample_rate,
            params.channels,
            cfg.chunk_frames,
        )?;
        if converter.needed() {
            tracing::info!(
                src_rate = params.sample_rate,
                dst_rate = out.sample_rate,
                "resampling enabled"
            );
        }

        let max_bytes = (out.byte_rate() as f64 * cfg.effective_buffer_seconds() as f64) as usize;
        let volume = cfg.volume_percent.min(100);
        let shared = Arc::new(Shared {
            buffer: PcmBuffer::new(max_bytes.max(out.frame_bytes() * 64)),
            paused: AtomicBool::new(false),
            volume_percent: AtomicU8::new(volume),
            finished: AtomicU8::new(FINISHED_NONE),
        });
        sink.set_volume(volume as f32 / 100.0);

        let (ctl_tx, ctl_rx) = unbounded();

        let producer = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("tonearm-producer".into())
                .spawn(move || producer_loop(source, converter, shared))
                .map_err(PlaybackError::Io)?
        };

        let write_chunk = (out.byte_rate() as usize / 10).max(out.frame_bytes());
        Ok(Self {
            shared,
            sink,
            out,
            duration_ms: params.duration_ms,
            codec: params.codec,
            ctl_tx,
            ctl_rx,
            producer: Some(producer),
            write_chunk,
            finished: None,
        })
    }

    /// Cloneable control surface for other threads (key handlers, signal
    /// handlers, status displays).
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shared: self.shared.clone(),
            ctl_tx: self.ctl_tx.clone(),
            out: self.out,
            duration_ms: self.duration_ms,
            codec: self.codec.clone(),
        }
    }

    /// Advance playback by one step.
    pub fn pump(&mut self) -> Tick {
        if let Some(reason) = self.finished {
            return Tick::Finished(reason);
        }

        while let Ok(cmd) = self.ctl_rx.try_recv() {
            self.apply(cmd);
        }

        if self.shared.buffer.is_stopped() {
            return self.finish(EndReason::Stopped);
        }
        if self.shared.paused.load(Ordering::Relaxed) {
            thread::sleep(PAUSE_POLL);
            return Tick::Idle;
        }

        let chunk = self.shared.buffer.pop_chunk(self.write_chunk);
        if chunk.is_empty() {
            if self.shared.buffer.has_failed() {
                return self.finish(EndReason::Failed);
            }
            if self.shared.buffer.is_drained() {
                return self.finish(EndReason::Completed);
            }
            self.shared.buffer.wait_for_data();
            return Tick::Idle;
        }

        // No locks held across the sink write.
        let written = self.sink.write(&chunk);
        self.shared.buffer.commit(written as u64, &chunk[written..]);
        if written < chunk.len() {
            self.sink.wait_for_capacity();
        }
        Tick::Playing
    }

    /// Pump until the session ends. `cancel` is checked every iteration and
    /// turns into a stop request.
    pub fn run(&mut self, cancel: &AtomicBool) -> EndReason {
        loop {
            if cancel.load(Ordering::Relaxed) {
                self.shared.buffer.stop();
            }
            if let Tick::Finished(reason) = self.pump() {
                return reason;
            }
        }
    }

    fn finish(&mut self, reason: EndReason) -> Tick {
        self.finished = Some(reason);
        let code = match reason {
            EndReason::Completed => FINISHED_COMPLETED,
            EndReason::Stopped => FINISHED_STOPPED,
            EndReason::Failed => FINISHED_FAILED,
        };
        self.shared.finished.store(code, Ordering::Relaxed);
        self.shared.buffer.stop();
        tracing::info!(?reason, "session finished");
        Tick::Finished(reason)
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePause => {
                let was = self.shared.paused.fetch_xor(true, Ordering::Relaxed);
                tracing::debug!(paused = !was, "pause toggled");
            }
            Command::VolumeUp => self.step_volume(VOLUME_STEP),
            Command::VolumeDown => self.step_volume(-VOLUME_STEP),
            Command::SeekBy(delta_ms) => self.seek_by(delta_ms),
        }
    }

    fn step_volume(&mut self, delta: i16) {
        let cur = self.shared.volume_percent.load(Ordering::Relaxed) as i16;
        let next = (cur + delta).clamp(0, 100) as u8;
        self.shared.volume_percent.store(next, Ordering::Relaxed);
        self.sink.set_volume(next as f32 / 100.0);
        tracing::debug!(volume_percent = next, "volume changed");
    }

    /// Relative seek. The buffer is cleared and repositioned atomically; the
    /// source-level reposition happens on the producer thread, which also
    /// drops any audio it decoded before the seek landed.
    fn seek_by(&mut self, delta_ms: i64) {
        let byte_rate = self.out.byte_rate();
        let frame_bytes = self.out.frame_bytes() as u64;
        let duration_ms = self.duration_ms;

        let target = self.shared.buffer.seek_with(|position| {
            let current_ms = position.saturating_mul(1000) / byte_rate;
            let mut target_ms = (current_ms as i64).saturating_add(delta_ms).max(0) as u64;
            if let Some(d) = duration_ms {
                target_ms = target_ms.min(d);
            }
            let raw = target_ms * byte_rate / 1000;
            SeekTarget {
                position_bytes: raw - raw % frame_bytes,
                source_ms: target_ms,
            }
        });
        tracing::debug!(delta_ms, target_ms = target.source_ms, "seek requested");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shared.buffer.stop();
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                tracing::error!("producer thread panicked");
            }
        }
    }
}

/// Decode-ahead loop, one per session, on its own thread.
fn producer_loop<S: Source>(mut source: S, mut converter: OutputConverter, shared: Arc<Shared>) {
    let buffer = &shared.buffer;
    loop {
        if buffer.is_stopped() {
            return;
        }
        if let Some(target_ms) = buffer.take_pending_seek() {
            source.seek(target_ms);
        }

        // Output decoded from here on belongs to this epoch; a seek bumps
        // the epoch and push_back drops the stale bytes.
        let epoch = buffer.epoch();

        let packet = match source.read_packet() {
            Ok(Some(p)) => p,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("read failed: {e}");
                buffer.mark_failed();
                return;
            }
        };
        let block = match source.decode(packet) {
            Ok(Some(b)) => b,
            Ok(None) => continue,
            Err(e) if e.is_recoverable() => {
                tracing::warn!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => {
                tracing::error!("decoder failed: {e}");
                buffer.mark_failed();
                return;
            }
        };
        let bytes = match converter.convert(&block) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("conversion failed: {e}");
                buffer.mark_failed();
                return;
            }
        };
        if !bytes.is_empty() {
            // A false return is either stop (checked next iteration) or a
            // seek that invalidated this block.
            let _accepted = buffer.push_back(&bytes, epoch);
        }
    }

    match converter.finish() {
        Ok(tail) if !tail.is_empty() => {
            let _accepted = buffer.push_back(&tail, buffer.epoch());
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("tail flush failed: {e}"),
    }
    buffer.mark_eof();
    tracing::debug!("producer reached end of stream");
}

/// Cloneable control and status surface for a session.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
    ctl_tx: Sender<Command>,
    out: OutputSpec,
    duration_ms: Option<u64>,
    codec: Option<String>,
}

impl ControlHandle {
    pub fn toggle_pause(&self) {
        let _unused = self.ctl_tx.send(Command::TogglePause);
    }

    pub fn volume_up(&self) {
        let _unused = self.ctl_tx.send(Command::VolumeUp);
    }

    pub fn volume_down(&self) {
        let _unused = self.ctl_tx.send(Command::VolumeDown);
    }

    pub fn seek_forward(&self, seconds: u32) {
        let _unused = self.ctl_tx.send(Command::SeekBy(seconds as i64 * 1000));
    }

    pub fn seek_backward(&self, seconds: u32) {
        let _unused = self.ctl_tx.send(Command::SeekBy(-(seconds as i64) * 1000));
    }

    /// Request stop. Takes effect within one wait slice on every stage.
    pub fn stop(&self) {
        self.shared.buffer.stop();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    pub fn volume_percent(&self) -> u8 {
        self.shared.volume_percent.load(Ordering::Relaxed)
    }

    /// Audio handed to the sink so far, in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.shared
            .buffer
            .position()
            .saturating_mul(1000)
            / self.out.byte_rate()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn buffered_bytes(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn status(&self) -> PlaybackStatus {
        let finished = self.shared.finished.load(Ordering::Relaxed);
        let state = if finished != FINISHED_NONE {
            EngineState::Stopped
        } else if self.shared.buffer.is_stopped() {
            EngineState::Stopping
        } else if self.is_paused() {
            EngineState::Paused
        } else {
            EngineState::Running
        };
        PlaybackStatus {
            elapsed_ms: self.elapsed_ms(),
            duration_ms: self.duration_ms,
            paused: self.is_paused(),
            volume_percent: self.volume_percent(),
            state,
            codec: self.codec.clone(),
        }
    }
}
