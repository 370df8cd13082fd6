//! Media time provider interface
//!
//! The video drain path does not know where the master clock lives. It asks a
//! [`MediaTimeProvider`] for "now" and for the real release time of a frame.
//! The player implements this on top of the audio clock and the release timer.

use syncplayer_core::time;

/// Source of the master playback clock
pub trait MediaTimeProvider {
    /// Current playback clock in microseconds
    fn now_us(&mut self) -> i64;

    /// Real (monotonic) release time in microseconds for a media presentation time
    fn real_time_us_for_media_time(&mut self, media_time_us: i64) -> i64;

    /// Display vsync period in nanoseconds
    fn vsync_duration_ns(&self) -> i64;

    /// Monotonic "now" used to measure how early or late a frame is
    fn monotonic_now_us(&self) -> i64 {
        time::monotonic_now_us()
    }
}
