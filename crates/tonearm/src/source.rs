//! Media source: container probing, stream selection, packet decode, seek.
//!
//! Wraps Symphonia. All of the decoder state lives here and is only ever
//! touched by the engine's producer thread.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::PlaybackError;

/// Codec parameters and duration captured while opening a source.
#[derive(Clone, Debug)]
pub struct SourceParams {
    pub sample_rate: u32,
    pub channels: usize,
    /// Total duration when the container provides it.
    pub duration_ms: Option<u64>,
    /// Codec label for status display (best-effort).
    pub codec: Option<String>,
}

/// One decoded block of interleaved `f32` samples at the source rate.
#[derive(Clone, Debug)]
pub struct DecodedBlock {
    pub samples: Vec<f32>,
    pub frames: usize,
}

/// Decode-side boundary the engine drives from its producer thread.
///
/// The real implementation is [`MediaSource`]; engine tests substitute
/// scripted fakes.
pub trait Source: Send {
    type Packet;

    fn params(&self) -> &SourceParams;

    /// Next compressed packet of the selected stream; `None` at end of
    /// stream. Packets belonging to other streams (embedded cover art and
    /// the like) are skipped internally.
    fn read_packet(&mut self) -> Result<Option<Self::Packet>, PlaybackError>;

    /// Decode one packet. `Ok(None)` means the codec needs more input before
    /// it can emit a frame.
    fn decode(&mut self, packet: Self::Packet) -> Result<Option<DecodedBlock>, PlaybackError>;

    /// Reposition near `target_ms` (nearest syncpoint at or before it) and
    /// flush decoder state. Failures are logged, never returned: audio
    /// containers tolerate approximate seeks.
    fn seek(&mut self, target_ms: u64);
}

pub struct MediaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    params: SourceParams,
    path: PathBuf,
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("track_id", &self.track_id)
            .field("params", &self.params)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl MediaSource {
    /// Open a media file and select its first real audio track.
    pub fn open(path: &Path) -> Result<Self, PlaybackError> {
        let file = File::open(path)?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PlaybackError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let format = probed.format;

        // Cover-art and other non-audio tracks carry a NULL codec; skip them.
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
            .ok_or_else(|| PlaybackError::NoAudioStream {
                path: path.to_path_buf(),
            })?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| PlaybackError::UnsupportedCodec {
                path: path.to_path_buf(),
                reason: "unknown sample rate".into(),
            })?;
        let channels = codec_params
            .channels
            .map(|c| c.count())
            .filter(|&c| c > 0)
            .ok_or_else(|| PlaybackError::UnsupportedCodec {
                path: path.to_path_buf(),
                reason: "unknown channel layout".into(),
            })?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::UnsupportedCodec {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let params = SourceParams {
            sample_rate,
            channels,
            duration_ms: duration_ms_from_codec_params(&codec_params),
            codec: codec_name_from_params(&codec_params),
        };
        tracing::info!(
            rate_hz = sample_rate,
            channels,
            duration_ms = ?params.duration_ms,
            codec = ?params.codec,
            "opened media source"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            params,
            path: path.to_path_buf(),
        })
    }
}

impl Source for MediaSource {
    type Packet = Packet;

    fn params(&self) -> &SourceParams {
        &self.params
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, PlaybackError> {
        loop {
            match self.format.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }
                    return Ok(Some(packet));
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    // Demux errors at this point are indistinguishable from a
                    // truncated tail; end the stream rather than the session.
                    tracing::debug!(path = ?self.path, "treating read error as end of stream: {e}");
                    return Ok(None);
                }
            }
        }
    }

    fn decode(&mut self, packet: Packet) -> Result<Option<DecodedBlock>, PlaybackError> {
        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                return Err(PlaybackError::Decode(msg.to_string()));
            }
            Err(SymphoniaError::IoError(e)) => {
                return Err(PlaybackError::Decode(e.to_string()));
            }
            Err(e) => return Err(PlaybackError::DecoderLost(e.to_string())),
        };

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(None);
        }
        let mut buf = SampleBuffer::<f32>::new(frames as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        Ok(Some(DecodedBlock {
            samples: buf.samples().to_vec(),
            frames,
        }))
    }

    fn seek(&mut self, target_ms: u64) {
        let time = Time::new(target_ms / 1000, (target_ms % 1000) as f64 / 1000.0);
        match self.format.seek(
            SeekMode::Coarse,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => tracing::debug!(target_ms, actual_ts = seeked.actual_ts, "seeked"),
            Err(e) => tracing::warn!(target_ms, "seek failed, continuing in place: {e}"),
        }
        self.decoder.reset();
    }
}

/// Best-effort duration in milliseconds from codec metadata.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for status display.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_handles_missing_and_zero_rate() {
        let mut params = CodecParameters::new();
        assert!(duration_ms_from_codec_params(&params).is_none());
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_computes_from_frames_and_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(44_100);
        params.n_frames = Some(441_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(10_000));
    }

    #[test]
    fn codec_names_map_known_codecs_only() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn open_missing_file_is_a_session_start_error() {
        let err = MediaSource::open(Path::new("/nonexistent/track.flac")).unwrap_err();
        assert!(matches!(err, PlaybackError::Io(_)));
        assert!(!err.is_recoverable());
    }
}
