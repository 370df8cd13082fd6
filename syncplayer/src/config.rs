//! Configuration types and defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;
use syncplayer_core::{PlayerError, PlayerResult};
use syncplayer_media::tuning::duration_ms;
use syncplayer_media::SyncTuning;

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Cadence of the polling thread
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Engine thresholds
    pub tuning: SyncTuning,
    /// Events buffered per subscriber before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            tuning: SyncTuning::default(),
            event_capacity: 64,
        }
    }
}

impl PlayerConfig {
    /// Load a (possibly partial) JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> PlayerResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| PlayerError::Configuration {
            reason: format!("Failed to parse player config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty-printed JSON
    pub fn to_json_string(&self) -> PlayerResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PlayerError::Configuration {
            reason: format!("Failed to serialize player config: {}", e),
        })
    }

    /// Reject values the player cannot run with
    pub fn validate(&self) -> PlayerResult<()> {
        if self.poll_interval.is_zero() {
            return Err(PlayerError::Configuration {
                reason: "poll_interval must be positive".to_string(),
            });
        }
        if self.event_capacity == 0 {
            return Err(PlayerError::Configuration {
                reason: "event_capacity must be positive".to_string(),
            });
        }
        self.tuning.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.tuning.max_queued_audio_bytes, 2 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlayerConfig::from_json_str(
            r#"{ "poll_interval": 10, "tuning": { "late_render_threshold_us": 40000 } }"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.tuning.late_render_threshold_us, 40_000);
        assert_eq!(config.tuning.min_frames_for_adjustment, 6);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            PlayerConfig::from_json_str(r#"{ "poll_interval": 0 }"#),
            Err(PlayerError::Configuration { .. })
        ));
        assert!(matches!(
            PlayerConfig::from_json_str("not json"),
            Err(PlayerError::Configuration { .. })
        ));
        assert!(PlayerConfig::from_json_str(r#"{ "tuning": { "min_frames_for_adjustment": 0 } }"#)
            .is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = PlayerConfig {
            event_capacity: 8,
            ..PlayerConfig::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(PlayerConfig::from_json_str(&json).unwrap(), config);
    }
}
