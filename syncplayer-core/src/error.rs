//! Error types for the sync player

use thiserror::Error;

/// Main error type for sync player operations
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Configuration error
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// Reason the configuration was rejected
        reason: String,
    },

    /// Data source could not be opened or read
    #[error("Data source {path} failed: {reason}")]
    DataSource {
        /// Path or URI of the media source
        path: String,
        /// Reason for the failure
        reason: String,
    },

    /// No data source was set before preparing
    #[error("No data source set")]
    MissingDataSource,

    /// No decoder is available for a track's declared format
    #[error("No decoder available for {mime}")]
    NoDecoder {
        /// MIME type that could not be decoded
        mime: String,
    },

    /// Decoder configuration failed
    #[error("Decoder configuration failed for track {track}: {reason}")]
    DecoderConfiguration {
        /// Track index
        track: usize,
        /// Reason for the failure
        reason: String,
    },

    /// Decoder reported an error while working
    #[error("Decoder error on track {track}: {reason}")]
    Decoder {
        /// Track index
        track: usize,
        /// Reason for the failure
        reason: String,
    },

    /// Demultiplexer reported an error while reading
    #[error("Demuxer error: {reason}")]
    Demuxer {
        /// Reason for the failure
        reason: String,
    },

    /// Audio output failure
    #[error("Audio output error: {reason}")]
    AudioOutput {
        /// Reason for the failure
        reason: String,
    },

    /// Media format data is malformed or out of range
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason the format was rejected
        reason: String,
    },

    /// Operation is not allowed in the current playback state
    #[error("Invalid state for {operation}: player is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: String,
        /// Current playback state
        state: String,
    },

    /// Playback worker thread failure
    #[error("Worker thread error: {reason}")]
    Thread {
        /// Reason for the failure
        reason: String,
    },

    /// A track failed during playback and the session can no longer progress
    #[error("Playback failed: {reason}")]
    PlaybackFailed {
        /// Reason for the failure
        reason: String,
    },

    /// Media engine error that does not fit the variants above
    #[error("Media processing error: {reason}")]
    MediaProcessing {
        /// Reason for the failure
        reason: String,
    },
}

/// Result type alias for sync player operations
pub type PlayerResult<T> = Result<T, PlayerError>;

impl PlayerError {
    /// Whether this error ends the playback session it happened in
    pub fn is_fatal_to_session(&self) -> bool {
        !matches!(
            self,
            PlayerError::InvalidState { .. } | PlayerError::Configuration { .. }
        )
    }

    /// Build an `InvalidState` error from anything displayable
    pub fn invalid_state(operation: &str, state: impl std::fmt::Display) -> Self {
        PlayerError::InvalidState {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PlayerError::NoDecoder {
            mime: "video/hevc".to_string(),
        };
        assert_eq!(error.to_string(), "No decoder available for video/hevc");

        let error = PlayerError::invalid_state("pause", "Idle");
        assert_eq!(error.to_string(), "Invalid state for pause: player is Idle");
    }

    #[test]
    fn test_session_fatality() {
        assert!(!PlayerError::invalid_state("pause", "Idle").is_fatal_to_session());
        assert!(PlayerError::Decoder {
            track: 1,
            reason: "codec died".to_string(),
        }
        .is_fatal_to_session());
        assert!(PlayerError::MissingDataSource.is_fatal_to_session());
    }
}
