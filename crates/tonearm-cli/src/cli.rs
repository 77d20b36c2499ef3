use clap::Parser;
use std::path::PathBuf;

/// Play a single audio file.
#[derive(Parser, Debug)]
#[command(name = "tonearm", version, about = "Single-file audio player")]
pub struct Cli {
    /// Audio file to play.
    pub path: Option<PathBuf>,

    /// Output device substring (case-insensitive). Default device when unset.
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit.
    #[arg(long)]
    pub list_devices: bool,

    /// Decode-ahead target in seconds.
    #[arg(long, default_value_t = 2.0)]
    pub buffer_seconds: f32,

    /// Resampler chunk size in frames.
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Initial volume in percent (0..=100).
    #[arg(long, default_value_t = 40)]
    pub volume: u8,

    /// Start playback this many seconds into the track.
    #[arg(long)]
    pub start_at: Option<u32>,
}
