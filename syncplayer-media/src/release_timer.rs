//! Vsync-aware frame release timing
//!
//! [`FrameReleaseTimer`] turns a frame's ideal release time into the one that
//! is actually requested from the decoder. It smooths release times using the
//! average frame duration observed since the last sync point, re-syncs when
//! the projected timeline drifts too far from the caller's, and finally snaps
//! the result to the closest display vsync.

use crate::tuning::SyncTuning;
use crate::vsync::VsyncSampler;
use syncplayer_core::time;
use tracing::{debug, trace};

/// Smooths and vsync-snaps video frame release times
#[derive(Debug)]
pub struct FrameReleaseTimer {
    sampler: Option<VsyncSampler>,
    vsync_duration_ns: i64,
    min_frames_for_adjustment: u64,
    max_allowed_drift_ns: i64,
    observing: bool,

    have_sync: bool,
    last_frame_presentation_time_us: i64,
    frame_count: u64,
    adjusted_last_frame_time_ns: i64,
    pending_adjusted_frame_time_ns: i64,
    sync_frame_presentation_time_ns: i64,
    sync_unadjusted_release_time_ns: i64,
    resync_count: u64,
}

impl FrameReleaseTimer {
    /// Create a timer; without a sampler, release times are never snapped
    pub fn new(sampler: Option<VsyncSampler>, tuning: &SyncTuning) -> Self {
        let vsync_duration_ns = sampler
            .as_ref()
            .and_then(VsyncSampler::vsync_duration_ns)
            .unwrap_or(0);
        Self {
            sampler,
            vsync_duration_ns,
            min_frames_for_adjustment: tuning.min_frames_for_adjustment,
            max_allowed_drift_ns: tuning.max_allowed_drift_ns,
            observing: false,
            have_sync: false,
            last_frame_presentation_time_us: 0,
            frame_count: 0,
            adjusted_last_frame_time_ns: 0,
            pending_adjusted_frame_time_ns: 0,
            sync_frame_presentation_time_ns: 0,
            sync_unadjusted_release_time_ns: 0,
            resync_count: 0,
        }
    }

    /// Drop the sync point and start observing vsync
    pub fn enable(&mut self) {
        self.have_sync = false;
        self.frame_count = 0;
        if self.vsync_duration_ns <= 0 || self.observing {
            return;
        }
        if let Some(sampler) = &self.sampler {
            sampler.add_observer();
            self.observing = true;
        }
    }

    /// Stop observing vsync
    pub fn disable(&mut self) {
        if !self.observing {
            return;
        }
        if let Some(sampler) = &self.sampler {
            sampler.remove_observer();
        }
        self.observing = false;
    }

    /// Forget the sync point; the next frame establishes a new one
    pub fn reset(&mut self) {
        self.have_sync = false;
        self.frame_count = 0;
    }

    /// Display vsync period in nanoseconds, zero when unknown
    pub fn vsync_duration_ns(&self) -> i64 {
        self.vsync_duration_ns
    }

    /// Frames observed since the current sync point
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of drift-triggered re-syncs
    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    /// Adjust a frame release time.
    ///
    /// `unadjusted_release_time_ns` is on the [`time::monotonic_now_ns`] time
    /// base; so is the returned value.
    pub fn adjust_release_time(
        &mut self,
        frame_presentation_time_us: i64,
        unadjusted_release_time_ns: i64,
    ) -> i64 {
        let frame_presentation_time_ns = time::us_to_ns(frame_presentation_time_us);

        let mut adjusted_frame_time_ns = frame_presentation_time_ns;
        let mut adjusted_release_time_ns = unadjusted_release_time_ns;

        if self.have_sync && frame_presentation_time_us != self.last_frame_presentation_time_us {
            self.frame_count += 1;
            self.adjusted_last_frame_time_ns = self.pending_adjusted_frame_time_ns;
        }

        let had_sync = self.have_sync;
        if self.frame_count >= self.min_frames_for_adjustment {
            // Average frame duration since the sync point, finer grained than the timestamps.
            let average_frame_duration_ns = (frame_presentation_time_ns
                - self.sync_frame_presentation_time_ns)
                / self.frame_count as i64;
            let candidate_adjusted_frame_time_ns =
                self.adjusted_last_frame_time_ns + average_frame_duration_ns;
            if self.is_drift_too_large(candidate_adjusted_frame_time_ns, unadjusted_release_time_ns)
            {
                self.have_sync = false;
            } else {
                adjusted_frame_time_ns = candidate_adjusted_frame_time_ns;
                adjusted_release_time_ns = self.sync_unadjusted_release_time_ns
                    + adjusted_frame_time_ns
                    - self.sync_frame_presentation_time_ns;
            }
        } else if self.is_drift_too_large(frame_presentation_time_ns, unadjusted_release_time_ns) {
            self.have_sync = false;
        }

        if !self.have_sync {
            if had_sync {
                self.resync_count += 1;
                debug!(
                    frame_us = frame_presentation_time_us,
                    frames = self.frame_count,
                    "Release time drifted, re-syncing"
                );
            }
            self.sync_frame_presentation_time_ns = frame_presentation_time_ns;
            self.sync_unadjusted_release_time_ns = unadjusted_release_time_ns;
            self.frame_count = 0;
            self.have_sync = true;
        }

        self.last_frame_presentation_time_us = frame_presentation_time_us;
        self.pending_adjusted_frame_time_ns = adjusted_frame_time_ns;

        let sampled_vsync_time_ns = self
            .sampler
            .as_ref()
            .map_or(0, VsyncSampler::sampled_vsync_time_ns);
        if sampled_vsync_time_ns == 0 || self.vsync_duration_ns <= 0 {
            return adjusted_release_time_ns;
        }
        let snapped = closest_vsync(
            adjusted_release_time_ns,
            sampled_vsync_time_ns,
            self.vsync_duration_ns,
        );
        trace!(adjusted_release_time_ns, snapped, "Snapped release time to vsync");
        snapped
    }

    fn is_drift_too_large(&self, frame_time_ns: i64, release_time_ns: i64) -> bool {
        let elapsed_frame_time_ns = frame_time_ns - self.sync_frame_presentation_time_ns;
        let elapsed_release_time_ns = release_time_ns - self.sync_unadjusted_release_time_ns;
        (elapsed_release_time_ns - elapsed_frame_time_ns).abs() > self.max_allowed_drift_ns
    }
}

impl Drop for FrameReleaseTimer {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Vsync instant closest to `release_time_ns`; an exact tie picks the earlier one
pub fn closest_vsync(release_time_ns: i64, sampled_vsync_time_ns: i64, vsync_duration_ns: i64) -> i64 {
    let vsync_count = (release_time_ns - sampled_vsync_time_ns) / vsync_duration_ns;
    let snapped_time_ns = sampled_vsync_time_ns + vsync_duration_ns * vsync_count;
    let (snapped_before_ns, snapped_after_ns) = if release_time_ns <= snapped_time_ns {
        (snapped_time_ns - vsync_duration_ns, snapped_time_ns)
    } else {
        (snapped_time_ns, snapped_time_ns + vsync_duration_ns)
    };
    let snapped_after_diff = snapped_after_ns - release_time_ns;
    let snapped_before_diff = release_time_ns - snapped_before_ns;
    if snapped_after_diff < snapped_before_diff {
        snapped_after_ns
    } else {
        snapped_before_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::ManualVsyncSource;
    use std::sync::Arc;
    use std::time::Duration;

    const FRAME_US: i64 = 33_333;
    const OFFSET_NS: i64 = 5_000_000_000;

    fn timer_without_vsync() -> FrameReleaseTimer {
        FrameReleaseTimer::new(None, &SyncTuning::default())
    }

    #[test]
    fn test_closest_vsync_picks_nearer_boundary() {
        assert_eq!(closest_vsync(25_000_000, 0, 16_666_667), 16_666_667);
        assert_eq!(closest_vsync(26_000_000, 0, 16_666_667), 33_333_334);
        assert_eq!(closest_vsync(16_666_667, 0, 16_666_667), 16_666_667);
        assert_eq!(closest_vsync(1_000, 10_000, 1_000), 1_000);
    }

    #[test]
    fn test_closest_vsync_tie_prefers_earlier() {
        assert_eq!(closest_vsync(15, 0, 10), 10);
        assert_eq!(closest_vsync(25, 0, 10), 20);
    }

    #[test]
    fn test_constant_rate_converges_to_projection() {
        let mut timer = timer_without_vsync();
        timer.enable();
        for i in 0..20 {
            let frame_us = i * FRAME_US;
            let release = OFFSET_NS + time::us_to_ns(frame_us);
            let adjusted = timer.adjust_release_time(frame_us, release);
            let expected = timer.sync_unadjusted_release_time_ns
                + (time::us_to_ns(frame_us) - timer.sync_frame_presentation_time_ns);
            assert_eq!(adjusted, expected, "frame {}", i);
        }
        assert_eq!(timer.frame_count(), 19);
        assert_eq!(timer.resync_count(), 0);
    }

    #[test]
    fn test_jitter_is_smoothed_after_min_frames() {
        let mut timer = timer_without_vsync();
        for i in 0..10 {
            let frame_us = i * FRAME_US;
            timer.adjust_release_time(frame_us, OFFSET_NS + time::us_to_ns(frame_us));
        }
        // 3 ms of release jitter is within the drift budget and gets projected away.
        let frame_us = 10 * FRAME_US;
        let adjusted = timer.adjust_release_time(frame_us, OFFSET_NS + time::us_to_ns(frame_us) + 3_000_000);
        assert_eq!(adjusted, OFFSET_NS + time::us_to_ns(frame_us));
    }

    #[test]
    fn test_timing_jump_triggers_single_resync() {
        let mut timer = timer_without_vsync();
        for i in 0..10 {
            let frame_us = i * FRAME_US;
            timer.adjust_release_time(frame_us, OFFSET_NS + time::us_to_ns(frame_us));
        }
        assert_eq!(timer.frame_count(), 9);

        let jumped_offset = OFFSET_NS + 25_000_000;
        let frame_us = 10 * FRAME_US;
        let release = jumped_offset + time::us_to_ns(frame_us);
        assert_eq!(timer.adjust_release_time(frame_us, release), release);
        assert_eq!(timer.resync_count(), 1);
        assert_eq!(timer.frame_count(), 0);

        for i in 11..30 {
            let frame_us = i * FRAME_US;
            timer.adjust_release_time(frame_us, jumped_offset + time::us_to_ns(frame_us));
        }
        assert_eq!(timer.resync_count(), 1);
    }

    #[test]
    fn test_backwards_jump_also_resyncs() {
        let mut timer = timer_without_vsync();
        for i in 0..3 {
            let frame_us = i * FRAME_US;
            timer.adjust_release_time(frame_us, OFFSET_NS + time::us_to_ns(frame_us));
        }
        let frame_us = 3 * FRAME_US;
        timer.adjust_release_time(frame_us, OFFSET_NS - 25_000_000 + time::us_to_ns(frame_us));
        assert_eq!(timer.resync_count(), 1);
        assert_eq!(timer.frame_count(), 0);
    }

    #[test]
    fn test_repeated_frame_does_not_count() {
        let mut timer = timer_without_vsync();
        timer.adjust_release_time(0, OFFSET_NS);
        timer.adjust_release_time(FRAME_US, OFFSET_NS + time::us_to_ns(FRAME_US));
        timer.adjust_release_time(FRAME_US, OFFSET_NS + time::us_to_ns(FRAME_US));
        assert_eq!(timer.frame_count(), 1);
    }

    #[test]
    fn test_release_time_snaps_to_sampled_vsync() {
        let source = Arc::new(ManualVsyncSource::new(Some(60.0)));
        let sampler = VsyncSampler::new(source.clone(), Duration::from_millis(500));
        let mut timer = FrameReleaseTimer::new(Some(sampler.clone()), &SyncTuning::default());
        assert_eq!(timer.vsync_duration_ns(), 16_666_666);

        // Enabled but nothing sampled yet: unsnapped.
        timer.enable();
        assert_eq!(sampler.observer_count(), 1);
        assert_eq!(timer.adjust_release_time(0, 1_025_000_000), 1_025_000_000);

        source.fire(1_000_000_000);
        let snapped = timer.adjust_release_time(FRAME_US, 1_025_000_000 + time::us_to_ns(FRAME_US));
        assert_eq!((snapped - 1_000_000_000) % 16_666_666, 0);
        assert!((snapped - (1_025_000_000 + time::us_to_ns(FRAME_US))).abs() <= 8_333_333);

        timer.disable();
        assert_eq!(sampler.observer_count(), 0);
        assert_eq!(sampler.sampled_vsync_time_ns(), 0);
    }

    #[test]
    fn test_enable_is_balanced() {
        let source = Arc::new(ManualVsyncSource::new(Some(60.0)));
        let sampler = VsyncSampler::new(source, Duration::from_millis(500));
        {
            let mut timer = FrameReleaseTimer::new(Some(sampler.clone()), &SyncTuning::default());
            timer.enable();
            timer.enable();
            assert_eq!(sampler.observer_count(), 1);
        }
        assert_eq!(sampler.observer_count(), 0);
    }
}
