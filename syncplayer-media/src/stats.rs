//! Synchronisation statistics

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Counters describing how the decode loop kept audio and video in sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Video frames handed to the display
    pub frames_rendered: u64,
    /// Frames rendered although later than the late threshold
    pub late_frames: u64,
    /// Drain attempts deferred because the head frame was too early
    pub early_deferrals: u64,
    /// Decoded audio buffers queued into the sink
    pub audio_buffers_queued: u64,
    /// Bytes accepted by the audio output
    pub audio_bytes_written: u64,
    /// Drift-triggered release timer re-syncs
    pub resyncs: u64,
}

impl SyncStats {
    /// Share of rendered frames that were late, in percent
    pub fn late_frame_percentage(&self) -> f64 {
        if self.frames_rendered == 0 {
            0.0
        } else {
            self.late_frames as f64 * 100.0 / self.frames_rendered as f64
        }
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.frames_rendered += other.frames_rendered;
        self.late_frames += other.late_frames;
        self.early_deferrals += other.early_deferrals;
        self.audio_buffers_queued += other.audio_buffers_queued;
        self.audio_bytes_written += other.audio_bytes_written;
        self.resyncs += other.resyncs;
    }
}
