//! Errors surfaced to the controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// The stream could not be opened (I/O, HTTP status, unknown container).
    #[error("failed to open source {uri}: {cause:#}")]
    SourceOpen { uri: String, cause: anyhow::Error },

    /// No tracks, or the first track is not audio.
    #[error("unsupported track: {0}")]
    UnsupportedTrack(String),

    #[error("a playback session is already running")]
    AlreadyPlaying,

    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },

    #[error("decoder failure: {0:#}")]
    Decoder(anyhow::Error),

    #[error("output sink failure: {0:#}")]
    Sink(anyhow::Error),

    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("playback thread exited before reporting readiness")]
    SessionLost,
}
