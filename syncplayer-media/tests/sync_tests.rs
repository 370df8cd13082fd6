//! Tests for vsync sampling and frame release timing on a software vsync

use std::sync::Arc;
use std::time::{Duration, Instant};
use syncplayer_core::{time, VsyncSource};
use syncplayer_media::*;

fn wait_for_sample(sampler: &VsyncSampler) -> i64 {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let sampled = sampler.sampled_vsync_time_ns();
        if sampled != 0 {
            return sampled;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("no vsync sampled within two seconds");
}

// ============================================================================
// TIMER VSYNC TESTS
// ============================================================================

#[tokio::test]
async fn test_timer_vsync_source_rejects_bad_rate() {
    assert!(TimerVsyncSource::new(0.0).is_err());
    assert!(TimerVsyncSource::new(-30.0).is_err());
}

#[tokio::test]
async fn test_sampler_on_timer_source() {
    let source = Arc::new(TimerVsyncSource::new(60.0).unwrap());
    assert_eq!(source.refresh_rate(), Some(60.0));

    let sampler = VsyncSampler::new(source, Duration::from_millis(100));
    assert_eq!(sampler.vsync_duration_ns(), Some(16_666_666));

    sampler.add_observer();
    let first = wait_for_sample(&sampler);
    assert!(first <= time::monotonic_now_ns());

    sampler.remove_observer();
    assert_eq!(sampler.observer_count(), 0);
    assert_eq!(sampler.sampled_vsync_time_ns(), 0);
}

// ============================================================================
// RELEASE TIMER TESTS
// ============================================================================

#[tokio::test]
async fn test_release_times_land_on_vsync_grid() {
    let tuning = SyncTuning::default();
    let source = Arc::new(TimerVsyncSource::new(60.0).unwrap());
    let sampler = VsyncSampler::new(source, tuning.vsync_resample_delay);
    let mut timer = FrameReleaseTimer::new(Some(sampler.clone()), &tuning);
    assert_eq!(timer.vsync_duration_ns(), 16_666_666);

    timer.enable();
    assert_eq!(sampler.observer_count(), 1);
    wait_for_sample(&sampler);

    let start_ns = time::monotonic_now_ns() + 50_000_000;
    for frame in 0..10 {
        let frame_us = frame * 40_000;
        let sampled = sampler.sampled_vsync_time_ns();
        let release = timer.adjust_release_time(frame_us, start_ns + time::us_to_ns(frame_us));
        assert_eq!((release - sampled).rem_euclid(16_666_666), 0);
        assert!((release - (start_ns + time::us_to_ns(frame_us))).abs() <= 8_333_333);
    }
    assert_eq!(timer.resync_count(), 0);

    timer.disable();
    assert_eq!(sampler.observer_count(), 0);
}

#[tokio::test]
async fn test_release_timer_without_vsync_passes_times_through() {
    let tuning = SyncTuning::default();
    let mut timer = FrameReleaseTimer::new(None, &tuning);
    timer.enable();
    assert_eq!(timer.vsync_duration_ns(), 0);
    assert_eq!(timer.adjust_release_time(0, 5_000_000), 5_000_000);
    assert_eq!(timer.adjust_release_time(33_333, 38_333_000), 38_333_000);
}
