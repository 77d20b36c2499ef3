mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tonearm::{EngineConfig, PlaybackSession, Tick};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Cli::parse();

    if args.list_devices {
        tonearm::device::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    let path = args
        .path
        .context("no file given (use --list-devices to inspect outputs)")?;
    let cfg = EngineConfig {
        buffer_seconds: args.buffer_seconds,
        chunk_frames: args.chunk_frames,
        volume_percent: args.volume.min(100),
    };

    let mut session = PlaybackSession::start(&path, args.device.as_deref(), &cfg)
        .with_context(|| format!("failed to start playback of {}", path.display()))?;
    let handle = session.handle();

    if let Some(seconds) = args.start_at {
        handle.seek_forward(seconds);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        let handle = handle.clone();
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
            handle.stop();
        })
        .context("failed to install signal handler")?;
    }

    let mut last_status = Instant::now();
    loop {
        if let Tick::Finished(reason) = session.pump() {
            tracing::info!(?reason, "playback ended");
            break;
        }
        if last_status.elapsed() >= Duration::from_secs(1) {
            last_status = Instant::now();
            let status = handle.status();
            tracing::info!(
                position = %format_time(status.elapsed_ms / 1000),
                duration = %status
                    .duration_ms
                    .map(|d| format_time(d / 1000))
                    .unwrap_or_else(|| "--:--:--".into()),
                volume = status.volume_percent,
                paused = status.paused,
                codec = status.codec.as_deref().unwrap_or("unknown"),
                "playing"
            );
        }
    }
    Ok(())
}

fn format_time(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
