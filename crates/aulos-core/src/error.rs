//! Error types for aulos-core.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for aulos-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("audio output is not initialized")]
    NotInitialized,

    #[error("invalid latency override: {0} ms")]
    LatencyOverride(i32),

    #[error("wind voice initialization failed")]
    WindVoiceInit,

    #[error("instrument initialization failed")]
    InstrumentInit,

    #[error("invalid device: {0}")]
    InvalidDevice(String),

    #[error("audio driver: {0}")]
    Driver(String),

    #[error("audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to enumerate devices")]
    DevicesError(#[from] cpal::DevicesError),

    #[error(transparent)]
    Dsp(#[from] aulos_dsp::Error),
}
