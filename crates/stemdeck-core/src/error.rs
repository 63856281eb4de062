//! Error types for the controller layer
//!
//! Errors local to one voice or effect never abort a session. Only engine
//! start has no degraded path and is surfaced as a blocking error.

use thiserror::Error;

/// A track's audio could not be fetched or decoded
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The source could not be fetched
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The source was fetched but could not be decoded
    #[error("Failed to decode {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The loader task died before producing a result
    #[error("Loader task for {url} did not complete")]
    Interrupted { url: String },

    /// The decoded audio could not be handed to the engine
    #[error("Engine rejected source {url}: {reason}")]
    Engine { url: String, reason: String },
}

/// Result type for source loading
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors from the audio engine seam
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No engine has been started yet (waiting for the first user gesture)
    #[error("Audio engine is not running")]
    NotStarted,

    /// The platform engine failed to start (e.g. autoplay policy)
    #[error("Audio engine failed to start: {0}. Tap to enable audio")]
    StartFailed(String),

    /// The render thread is not draining the command queue
    #[error("Engine command queue is full")]
    QueueFull,

    /// The graph already holds as many nodes as the renderer can track
    #[error("Audio graph is full ({0} nodes)")]
    NodeLimit(usize),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A bounce of a voice's processed output failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordingError {
    /// The voice has no decoded source, so its duration is unknown
    #[error("Track is not ready for recording")]
    NotReady,

    /// The voice already has a capture in progress
    #[error("A recording is already in progress for this track")]
    AlreadyRecording,

    /// Playback was stopped while the capture was running
    #[error("Recording was cancelled because playback stopped")]
    Cancelled,

    /// The captured audio could not be encoded
    #[error("Failed to encode recording: {0}")]
    Encode(String),

    /// The captured audio could not be saved
    #[error("Failed to save recording: {0}")]
    Save(String),

    /// The engine rejected a graph edit needed for the capture
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_failure_is_actionable() {
        let err = EngineError::StartFailed("not allowed".to_string());
        assert!(err.to_string().contains("Tap to enable audio"));
    }

    #[test]
    fn test_engine_error_converts_into_recording_error() {
        let err: RecordingError = EngineError::QueueFull.into();
        assert_eq!(err, RecordingError::Engine(EngineError::QueueFull));
    }
}
