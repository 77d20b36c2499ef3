//! Session state and status snapshots.

/// Lifecycle of one playback session.
///
/// `Starting` is implicit: it spans session construction and ends when the
/// first [`crate::engine::PlaybackSession::pump`] call runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// Point-in-time status snapshot, assembled from the shared counters.
#[derive(Clone, Debug)]
pub struct PlaybackStatus {
    /// Audio handed to the sink so far, in milliseconds.
    pub elapsed_ms: u64,
    /// Track duration when the container reports one.
    pub duration_ms: Option<u64>,
    pub paused: bool,
    pub volume_percent: u8,
    pub state: EngineState,
    /// Codec label, when recognized.
    pub codec: Option<String>,
}
