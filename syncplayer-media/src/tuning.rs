//! Engine thresholds and defaults

use crate::error::{MediaError, MediaResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and back-pressure thresholds used by the decode loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Stop feeding audio input once this many decoded bytes wait in the sink
    pub max_queued_audio_bytes: usize,
    /// Frames later than this are rendered immediately instead of scheduled
    pub late_render_threshold_us: i64,
    /// Frames earlier than this many vsync periods stay in the decoder
    pub early_release_vsyncs: i64,
    /// Release timer drift that forces a re-sync
    pub max_allowed_drift_ns: i64,
    /// Frames observed after a sync point before the average frame duration is trusted
    pub min_frames_for_adjustment: u64,
    /// Minimum spacing between two hardware audio timestamp reads
    #[serde(with = "duration_ms")]
    pub audio_timestamp_resample: Duration,
    /// Delay between two vsync samples
    #[serde(with = "duration_ms")]
    pub vsync_resample_delay: Duration,
    /// Accepted decoder channel counts (inclusive)
    pub audio_channel_bounds: (i64, i64),
    /// Accepted decoder sample rates in Hz (inclusive)
    pub audio_sample_rate_bounds: (i64, i64),
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            max_queued_audio_bytes: 2 * 1024 * 1024,
            late_render_threshold_us: 30_000,
            early_release_vsyncs: 2,
            max_allowed_drift_ns: 20_000_000,
            min_frames_for_adjustment: 6,
            audio_timestamp_resample: Duration::from_millis(250),
            vsync_resample_delay: Duration::from_millis(500),
            audio_channel_bounds: (1, 8),
            audio_sample_rate_bounds: (8_000, 128_000),
        }
    }
}

impl SyncTuning {
    /// Reject zero, negative or inverted thresholds
    pub fn validate(&self) -> MediaResult<()> {
        let invalid = |message: &str| {
            Err(MediaError::InvalidConfiguration {
                message: message.to_string(),
            })
        };

        if self.max_queued_audio_bytes == 0 {
            return invalid("max_queued_audio_bytes must be positive");
        }
        if self.late_render_threshold_us <= 0 {
            return invalid("late_render_threshold_us must be positive");
        }
        if self.early_release_vsyncs <= 0 {
            return invalid("early_release_vsyncs must be positive");
        }
        if self.max_allowed_drift_ns <= 0 {
            return invalid("max_allowed_drift_ns must be positive");
        }
        if self.min_frames_for_adjustment == 0 {
            return invalid("min_frames_for_adjustment must be positive");
        }
        if self.audio_timestamp_resample.is_zero() || self.vsync_resample_delay.is_zero() {
            return invalid("resample intervals must be positive");
        }
        let (min_channels, max_channels) = self.audio_channel_bounds;
        if min_channels < 1 || min_channels > max_channels {
            return invalid("audio_channel_bounds must be a non-empty range starting at 1 or more");
        }
        let (min_rate, max_rate) = self.audio_sample_rate_bounds;
        if min_rate < 1 || min_rate > max_rate {
            return invalid("audio_sample_rate_bounds must be a non-empty positive range");
        }
        Ok(())
    }

    /// Whether a decoder-reported audio layout is within bounds
    pub fn accepts_audio_format(&self, sample_rate: i64, channel_count: i64) -> bool {
        let (min_channels, max_channels) = self.audio_channel_bounds;
        let (min_rate, max_rate) = self.audio_sample_rate_bounds;
        (min_channels..=max_channels).contains(&channel_count)
            && (min_rate..=max_rate).contains(&sample_rate)
    }
}

/// Serde helpers storing a [`Duration`] as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserialize from milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let tuning = SyncTuning::default();
        assert!(tuning.validate().is_ok());
        assert_eq!(tuning.max_queued_audio_bytes, 2_097_152);
        assert_eq!(tuning.late_render_threshold_us, 30_000);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let tuning = SyncTuning {
            audio_sample_rate_bounds: (48_000, 8_000),
            ..SyncTuning::default()
        };
        assert!(tuning.validate().is_err());

        let tuning = SyncTuning {
            audio_channel_bounds: (0, 2),
            ..SyncTuning::default()
        };
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn test_audio_format_bounds() {
        let tuning = SyncTuning::default();
        assert!(tuning.accepts_audio_format(44_100, 2));
        assert!(tuning.accepts_audio_format(8_000, 1));
        assert!(tuning.accepts_audio_format(128_000, 8));
        assert!(!tuning.accepts_audio_format(7_999, 2));
        assert!(!tuning.accepts_audio_format(44_100, 0));
        assert!(!tuning.accepts_audio_format(44_100, 9));
        assert!(!tuning.accepts_audio_format(192_000, 2));
    }
}
