//! Media format and track descriptions
//!
//! A [`MediaFormat`] is the key/value description a demultiplexer reports for
//! a track, and a decoder reports for its output. Only a handful of keys
//! matter to the player; everything else is carried through untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// MIME prefix shared by every audio format
pub const MIME_AUDIO_PREFIX: &str = "audio/";
/// MIME prefix shared by every video format
pub const MIME_VIDEO_PREFIX: &str = "video/";
/// MIME type of decoded 16-bit PCM audio
pub const MIME_AUDIO_RAW: &str = "audio/raw";
/// MIME type of decoded video frames
pub const MIME_VIDEO_RAW: &str = "video/raw";

/// Well-known format keys
pub mod keys {
    /// Sample rate in Hz (integer)
    pub const SAMPLE_RATE: &str = "sample-rate";
    /// Number of interleaved audio channels (integer)
    pub const CHANNEL_COUNT: &str = "channel-count";
    /// Frame width in pixels (integer)
    pub const WIDTH: &str = "width";
    /// Frame height in pixels (integer)
    pub const HEIGHT: &str = "height";
    /// Declared track duration in microseconds (integer)
    pub const DURATION_US: &str = "durationUs";
    /// Whether AAC payloads carry ADTS headers (integer, 0 or 1)
    pub const IS_ADTS: &str = "is-adts";
}

/// Media type class of a track, derived from its MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    /// `audio/*`
    Audio,
    /// `video/*`
    Video,
    /// Anything else (subtitles, metadata...)
    Other,
}

impl TrackKind {
    /// Classify a MIME type by prefix
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with(MIME_AUDIO_PREFIX) {
            TrackKind::Audio
        } else if mime.starts_with(MIME_VIDEO_PREFIX) {
            TrackKind::Video
        } else {
            TrackKind::Other
        }
    }

    /// MIME prefix selecting tracks of this kind
    pub fn mime_prefix(&self) -> Option<&'static str> {
        match self {
            TrackKind::Audio => Some(MIME_AUDIO_PREFIX),
            TrackKind::Video => Some(MIME_VIDEO_PREFIX),
            TrackKind::Other => None,
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
            TrackKind::Other => write!(f, "other"),
        }
    }
}

/// A single format value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatValue {
    /// Integer value (rates, sizes, durations)
    Integer(i64),
    /// Floating point value (frame rates)
    Float(f64),
    /// Text value
    Text(String),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Integer(v) => write!(f, "{}", v),
            FormatValue::Float(v) => write!(f, "{}", v),
            FormatValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Key/value description of a track or decoder output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    mime: String,
    #[serde(default)]
    entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    /// Create an empty format for the given MIME type
    pub fn new(mime: &str) -> Self {
        Self {
            mime: mime.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Audio format with sample rate and channel count
    pub fn audio(mime: &str, sample_rate: u32, channel_count: u16) -> Self {
        Self::new(mime)
            .with_integer(keys::SAMPLE_RATE, i64::from(sample_rate))
            .with_integer(keys::CHANNEL_COUNT, i64::from(channel_count))
    }

    /// Video format with frame dimensions
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self::new(mime)
            .with_integer(keys::WIDTH, i64::from(width))
            .with_integer(keys::HEIGHT, i64::from(height))
    }

    /// Builder-style integer setter
    pub fn with_integer(mut self, key: &str, value: i64) -> Self {
        self.set_integer(key, value);
        self
    }

    /// Builder-style duration setter
    pub fn with_duration_us(self, duration_us: i64) -> Self {
        self.with_integer(keys::DURATION_US, duration_us)
    }

    /// Set an integer value
    pub fn set_integer(&mut self, key: &str, value: i64) {
        self.entries
            .insert(key.to_string(), FormatValue::Integer(value));
    }

    /// Set a floating point value
    pub fn set_float(&mut self, key: &str, value: f64) {
        self.entries.insert(key.to_string(), FormatValue::Float(value));
    }

    /// Set a text value
    pub fn set_string(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), FormatValue::Text(value.to_string()));
    }

    /// MIME type
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Media type class
    pub fn kind(&self) -> TrackKind {
        TrackKind::from_mime(&self.mime)
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Integer value, if present and integral
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(FormatValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integer value, or zero when absent
    pub fn integer_or_zero(&self, key: &str) -> i64 {
        self.integer(key).unwrap_or(0)
    }

    /// Floating point value; integers are widened
    pub fn float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(FormatValue::Float(v)) => Some(*v),
            Some(FormatValue::Integer(v)) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text value
    pub fn string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Declared duration in microseconds
    pub fn duration_us(&self) -> Option<i64> {
        self.integer(keys::DURATION_US)
    }

    /// Sample rate in Hz, zero when absent
    pub fn sample_rate(&self) -> i64 {
        self.integer_or_zero(keys::SAMPLE_RATE)
    }

    /// Channel count, zero when absent
    pub fn channel_count(&self) -> i64 {
        self.integer_or_zero(keys::CHANNEL_COUNT)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{mime={}", self.mime)?;
        for (key, value) in &self.entries {
            write!(f, ", {}={}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// A demultiplexed elementary stream selected from a container
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Track index inside the container
    pub index: usize,
    /// Track format as reported by the demultiplexer
    pub format: MediaFormat,
}

impl TrackInfo {
    /// Create a new track description
    pub fn new(index: usize, format: MediaFormat) -> Self {
        Self { index, format }
    }

    /// Media type class
    pub fn kind(&self) -> TrackKind {
        self.format.kind()
    }

    /// Declared duration in microseconds
    pub fn duration_us(&self) -> Option<i64> {
        self.format.duration_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind_from_mime() {
        assert_eq!(TrackKind::from_mime("audio/mp4a-latm"), TrackKind::Audio);
        assert_eq!(TrackKind::from_mime("video/avc"), TrackKind::Video);
        assert_eq!(TrackKind::from_mime("text/vtt"), TrackKind::Other);
        assert_eq!(TrackKind::Audio.mime_prefix(), Some("audio/"));
        assert_eq!(TrackKind::Other.mime_prefix(), None);
    }

    #[test]
    fn test_audio_format_accessors() {
        let format = MediaFormat::audio("audio/mp4a-latm", 44_100, 2).with_duration_us(5_000_000);
        assert_eq!(format.kind(), TrackKind::Audio);
        assert_eq!(format.sample_rate(), 44_100);
        assert_eq!(format.channel_count(), 2);
        assert_eq!(format.duration_us(), Some(5_000_000));
        assert_eq!(format.integer_or_zero(keys::IS_ADTS), 0);
    }

    #[test]
    fn test_value_types_do_not_coerce_to_integer() {
        let mut format = MediaFormat::new("video/avc");
        format.set_float("frame-rate", 29.97);
        format.set_string("language", "und");
        assert_eq!(format.integer("frame-rate"), None);
        assert_eq!(format.float("frame-rate"), Some(29.97));
        assert_eq!(format.string("language"), Some("und"));
        assert!(format.contains_key("language"));
    }

    #[test]
    fn test_display_lists_entries() {
        let format = MediaFormat::video("video/avc", 1280, 720);
        assert_eq!(format.to_string(), "{mime=video/avc, height=720, width=1280}");
    }
}
