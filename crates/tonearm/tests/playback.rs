//! End-to-end playback over a real container, headless.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use tonearm::source::MediaSource;
use tonearm::{EndReason, EngineConfig, NullSink, OutputSpec, PlaybackSession, Tick};

/// Write a 10 second 44.1 kHz mono S16 WAV and return its path.
fn write_test_wav(dir: &Path) -> PathBuf {
    let path = dir.join("tone.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..441_000u32 {
        let t = i as f32 / 44_100.0;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.3;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn headless_spec() -> OutputSpec {
    OutputSpec {
        sample_rate: 44_100,
        channels: 1,
    }
}

#[test]
fn wav_plays_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let source = MediaSource::open(&write_test_wav(dir.path())).unwrap();

    let mut session = PlaybackSession::spawn(
        source,
        Box::new(NullSink),
        headless_spec(),
        &EngineConfig::default(),
    )
    .unwrap();
    let handle = session.handle();
    assert_eq!(handle.duration_ms(), Some(10_000));

    let reason = session.run(&AtomicBool::new(false));
    assert_eq!(reason, EndReason::Completed);
    assert_eq!(handle.elapsed_ms(), 10_000);
}

#[test]
fn seek_forward_during_playback_lands_near_target() {
    let dir = tempfile::tempdir().unwrap();
    let source = MediaSource::open(&write_test_wav(dir.path())).unwrap();

    let mut session = PlaybackSession::spawn(
        source,
        Box::new(NullSink),
        headless_spec(),
        &EngineConfig::default(),
    )
    .unwrap();
    let handle = session.handle();

    while handle.elapsed_ms() < 2_000 {
        if let Tick::Finished(reason) = session.pump() {
            panic!("ended early: {reason:?}");
        }
    }

    handle.seek_forward(5);
    let reason = session.run(&AtomicBool::new(false));
    assert_eq!(reason, EndReason::Completed);

    // Skipped about five seconds of a ten second track.
    let elapsed = handle.elapsed_ms();
    assert!(
        (9_500..=11_000).contains(&elapsed),
        "elapsed {elapsed} ms after seek"
    );
}

#[test]
fn stop_request_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let source = MediaSource::open(&write_test_wav(dir.path())).unwrap();

    let mut session = PlaybackSession::spawn(
        source,
        Box::new(NullSink),
        headless_spec(),
        &EngineConfig::default(),
    )
    .unwrap();
    let handle = session.handle();

    while handle.elapsed_ms() < 500 {
        if let Tick::Finished(reason) = session.pump() {
            panic!("ended early: {reason:?}");
        }
    }
    handle.stop();
    assert_eq!(session.run(&AtomicBool::new(false)), EndReason::Stopped);
}
