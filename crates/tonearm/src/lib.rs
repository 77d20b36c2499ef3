//! Single-file audio playback engine.
//!
//! Pipeline: demux and decode ([`source`]) on a producer thread, rate
//! conversion to S16LE ([`resample`]), a shared byte buffer with seek and
//! stop semantics ([`buffer`]), and a caller-driven consumer that feeds an
//! output sink ([`engine`]). The cpal-backed sink lives in [`device`];
//! [`sink::NullSink`] covers headless use.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::atomic::AtomicBool;
//! use tonearm::{EngineConfig, PlaybackSession};
//!
//! let cfg = EngineConfig::default();
//! let mut session = PlaybackSession::start(Path::new("track.flac"), None, &cfg)?;
//! let handle = session.handle();
//! handle.volume_up();
//! let reason = session.run(&AtomicBool::new(false));
//! println!("ended: {reason:?}");
//! # Ok::<(), tonearm::PlaybackError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod resample;
pub mod sink;
pub mod source;
pub mod status;

pub use config::EngineConfig;
pub use engine::{ControlHandle, EndReason, PlaybackSession, Tick};
pub use error::PlaybackError;
pub use sink::{AudioSink, NullSink, OutputSpec};
pub use status::{EngineState, PlaybackStatus};
