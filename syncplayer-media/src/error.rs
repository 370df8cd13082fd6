//! Media engine error types and handling
//!
//! This module defines the errors raised while preparing and driving the
//! decode loop, and how they classify and convert into the player's public
//! [`PlayerError`].

use syncplayer_core::{PlayerError, TrackKind};
use thiserror::Error;

/// Main error type for media engine operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// No decoder exists for a track's MIME type
    #[error("Decoder unavailable for {mime}")]
    DecoderUnavailable {
        /// MIME type
        mime: String,
    },

    /// Decoder rejected the track format
    #[error("Codec configuration failed on track {track}: {reason}")]
    CodecConfiguration {
        /// Track index
        track: usize,
        /// Failure reason
        reason: String,
    },

    /// A track failed while decoding
    #[error("{kind} track {track} failed: {source}")]
    TrackFailed {
        /// Track index
        track: usize,
        /// Track media type
        kind: TrackKind,
        /// Underlying platform error
        #[source]
        source: PlayerError,
    },

    /// Decoder reported an audio layout outside sane bounds
    #[error("Invalid audio format: {sample_rate} Hz, {channels} channels")]
    InvalidAudioFormat {
        /// Reported sample rate
        sample_rate: i64,
        /// Reported channel count
        channels: i64,
    },

    /// No data source was set before prepare
    #[error("Data source not set")]
    DataSourceNotSet,

    /// Invalid engine configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Platform collaborator failure outside a track's decode loop
    #[error("Platform error: {source}")]
    Platform {
        /// Underlying platform error
        #[from]
        source: PlayerError,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::InvalidAudioFormat { .. } => true,
            MediaError::InvalidConfiguration { .. } => true,
            MediaError::DataSourceNotSet => true,
            MediaError::DecoderUnavailable { .. } => false,
            MediaError::CodecConfiguration { .. } => false,
            MediaError::TrackFailed { .. } => false,
            MediaError::Platform { .. } => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::DecoderUnavailable { .. } => ErrorCategory::Codec,
            MediaError::CodecConfiguration { .. } => ErrorCategory::Codec,
            MediaError::TrackFailed { .. } => ErrorCategory::Decode,
            MediaError::InvalidAudioFormat { .. } => ErrorCategory::Format,
            MediaError::DataSourceNotSet => ErrorCategory::Configuration,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::Platform { .. } => ErrorCategory::Platform,
        }
    }

    /// Wrap a platform error raised inside a track's decode loop
    pub fn track(track: usize, kind: TrackKind, source: PlayerError) -> Self {
        MediaError::TrackFailed {
            track,
            kind,
            source,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration and parameter errors
    Configuration,
    /// Decoder availability and setup errors
    Codec,
    /// Runtime decode failures
    Decode,
    /// Malformed format data
    Format,
    /// Platform collaborator errors
    Platform,
}

impl From<MediaError> for PlayerError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::DecoderUnavailable { mime } => PlayerError::NoDecoder { mime },
            MediaError::CodecConfiguration { track, reason } => {
                PlayerError::DecoderConfiguration { track, reason }
            }
            MediaError::TrackFailed { track, source, .. } => PlayerError::Decoder {
                track,
                reason: source.to_string(),
            },
            MediaError::DataSourceNotSet => PlayerError::MissingDataSource,
            MediaError::InvalidConfiguration { message } => {
                PlayerError::Configuration { reason: message }
            }
            MediaError::Platform { source } => source,
            other @ MediaError::InvalidAudioFormat { .. } => PlayerError::InvalidFormat {
                reason: other.to_string(),
            },
        }
    }
}
