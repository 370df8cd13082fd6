//! Tests for the audio and video decoder orchestrators
//!
//! Decoders run against the simulated platform: synthetic containers, a
//! passthrough decoder and audio outputs whose play-head the test controls.

use std::sync::Arc;
use syncplayer_core::{time, DisplaySurface, RenderRequest, TrackKind};
use syncplayer_media::*;
use tokio_test::{assert_err, assert_ok};

const AUDIO_MIME: &str = "audio/mp4a-latm";
const VIDEO_MIME: &str = "video/avc";

fn av_container() -> SimulatedContainer {
    SimulatedContainer::new()
        .with_track(SimulatedTrack::audio(AUDIO_MIME, 48_000, 2, 200_000, 1_200))
        .with_track(SimulatedTrack::video(VIDEO_MIME, 640, 360, 150_000, 40, 2))
}

fn platform_with(container: SimulatedContainer) -> Arc<SimulatedPlatform> {
    Arc::new(
        SimulatedPlatform::new()
            .with_manual_audio(1 << 20)
            .with_container("test.mp4", container),
    )
}

fn on_time_clock() -> ScriptedClock {
    // Every frame is due immediately.
    ScriptedClock {
        monotonic_now_us: 1_000_000_000,
        vsync_duration_ns: 16_666_666,
        ..ScriptedClock::default()
    }
}

/// Plays media time one to one against the monotonic clock
struct WallClock {
    origin_us: i64,
}

impl WallClock {
    fn start() -> Self {
        Self {
            origin_us: time::monotonic_now_us(),
        }
    }
}

impl MediaTimeProvider for WallClock {
    fn now_us(&mut self) -> i64 {
        time::monotonic_now_us() - self.origin_us
    }

    fn real_time_us_for_media_time(&mut self, media_time_us: i64) -> i64 {
        self.origin_us + media_time_us
    }

    fn vsync_duration_ns(&self) -> i64 {
        16_666_666
    }
}

// ============================================================================
// PREPARE TESTS
// ============================================================================

#[tokio::test]
async fn test_prepare_selects_tracks_by_kind() {
    let container = av_container()
        .with_track(SimulatedTrack::audio("audio/opus", 48_000, 1, 5_000_000, 960));
    let platform = platform_with(container);

    let mut audio = AudioDecoder::new(platform.clone(), SyncTuning::default());
    audio.set_data_source("test.mp4");
    audio.prepare().unwrap();
    assert!(audio.is_prepared());
    assert_eq!(audio.track_count(), 2);
    assert!(audio.track(0).is_some());
    assert!(audio.track(2).is_some());
    assert_eq!(audio.duration_us(), Some(5_000_000));

    let mut video = VideoDecoder::new(platform.clone(), SyncTuning::default());
    video.set_data_source("test.mp4");
    video.prepare().unwrap();
    assert_eq!(video.track_count(), 1);
    assert_eq!(video.track(1).unwrap().format().mime(), VIDEO_MIME);
    assert_eq!(video.duration_us(), Some(150_000));

    assert_eq!(platform.decoders_for(AUDIO_MIME).len(), 1);
    assert_eq!(platform.decoders_for("audio/opus").len(), 1);
}

#[tokio::test]
async fn test_prepare_binds_video_decoders_to_surface() {
    let platform = platform_with(av_container());
    let mut video = VideoDecoder::new(platform.clone(), SyncTuning::default());
    video.set_surface(Some(DisplaySurface::new(9)));
    video.set_data_source("test.mp4");
    assert_ok!(video.prepare());

    let mut audio = AudioDecoder::new(platform.clone(), SyncTuning::default());
    audio.set_data_source("test.mp4");
    assert_ok!(audio.prepare());

    assert_eq!(
        platform.decoders_for(VIDEO_MIME)[0].log().surface,
        Some(DisplaySurface::new(9))
    );
    assert_eq!(platform.decoders_for(AUDIO_MIME)[0].log().surface, None);
}

#[tokio::test]
async fn test_prepare_without_data_source() {
    let platform = platform_with(av_container());
    let mut audio = AudioDecoder::new(platform, SyncTuning::default());

    let error = audio.prepare().unwrap_err();
    assert!(matches!(error, MediaError::DataSourceNotSet));
    assert!(!audio.is_prepared());
}

#[tokio::test]
async fn test_prepare_unknown_source() {
    let platform = platform_with(av_container());
    let mut video = VideoDecoder::new(platform, SyncTuning::default());
    video.set_data_source("missing.mp4");

    let error = video.prepare().unwrap_err();
    assert!(matches!(error, MediaError::Platform { .. }));
    assert_eq!(error.category(), ErrorCategory::Platform);
}

#[tokio::test]
async fn test_prepare_fails_without_decoder() {
    let platform = Arc::new(
        SimulatedPlatform::new()
            .with_container("test.mp4", av_container())
            .without_decoder(VIDEO_MIME),
    );
    let mut video = VideoDecoder::new(platform, SyncTuning::default());
    video.set_data_source("test.mp4");

    match video.prepare() {
        Err(MediaError::DecoderUnavailable { mime }) => assert_eq!(mime, VIDEO_MIME),
        other => panic!("Expected DecoderUnavailable, got {:?}", other),
    }
    assert_eq!(video.track_count(), 0);
}

#[tokio::test]
async fn test_prepare_fails_when_configure_rejected() {
    let platform = Arc::new(
        SimulatedPlatform::new()
            .with_container("test.mp4", av_container())
            .with_decoder_script(
                AUDIO_MIME,
                DecoderScript {
                    fail_configure: true,
                    ..DecoderScript::default()
                },
            ),
    );
    let mut audio = AudioDecoder::new(platform, SyncTuning::default());
    audio.set_data_source("test.mp4");

    let error = audio.prepare().unwrap_err();
    assert!(matches!(error, MediaError::CodecConfiguration { track: 0, .. }));
}

#[tokio::test]
async fn test_decoder_without_matching_tracks_is_ended() {
    let container = SimulatedContainer::new()
        .with_track(SimulatedTrack::audio(AUDIO_MIME, 44_100, 2, 1_000_000, 1_024));
    let platform = platform_with(container);
    let mut video = VideoDecoder::new(platform, SyncTuning::default());
    video.set_data_source("test.mp4");
    video.prepare().unwrap();

    assert_eq!(video.track_count(), 0);
    assert_eq!(video.duration_us(), None);
    assert!(video.is_ended());
    assert_eq!(video.current_position_us(), 0);
}

// ============================================================================
// DECODE TESTS
// ============================================================================

#[tokio::test]
async fn test_audio_decodes_to_end_of_stream() {
    let platform = platform_with(av_container());
    let mut audio = AudioDecoder::new(platform.clone(), SyncTuning::default());
    audio.set_data_source("test.mp4");
    audio.prepare().unwrap();
    audio.start().unwrap();

    let mut clock = on_time_clock();
    for _ in 0..100 {
        if audio.is_ended() {
            break;
        }
        audio.do_some_work(&mut clock).unwrap();
        audio.process().unwrap();
    }
    assert!(audio.is_ended());

    // Eight 25 ms buffers of 1200 stereo frames.
    let outputs = platform.audio_outputs();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].sample_rate(), 48_000);
    assert_eq!(outputs[0].channel_count(), 2);
    assert_eq!(outputs[0].written_data().len(), 8 * 4_800);

    let stats = audio.stats();
    assert_eq!(stats.audio_buffers_queued, 8);
    assert_eq!(stats.audio_bytes_written, 8 * 4_800);
    assert!(audio.audio_time_us().is_some());
}

#[tokio::test]
async fn test_video_follows_wall_clock() {
    let container = SimulatedContainer::new()
        .with_track(SimulatedTrack::video(VIDEO_MIME, 320, 240, 100_000, 40, 1));
    let platform = platform_with(container);
    let mut video = VideoDecoder::new(platform.clone(), SyncTuning::default());
    video.set_data_source("test.mp4");
    video.prepare().unwrap();
    video.start().unwrap();

    let mut clock = WallClock::start();
    for _ in 0..400 {
        if video.is_ended() {
            break;
        }
        video.do_some_work(&mut clock).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    assert!(video.is_ended());

    let handles = platform.decoders_for(VIDEO_MIME);
    let log = handles[0].log();
    let rendered: Vec<i64> = log
        .released_outputs
        .iter()
        .filter(|(_, request)| matches!(request, RenderRequest::RenderAt(_)))
        .map(|(pts, _)| *pts)
        .collect();
    assert_eq!(rendered, vec![0, 25_000, 50_000, 75_000]);
    assert_eq!(video.current_position_us(), 75_000);
    assert_eq!(video.stats().frames_rendered, 4);
}

#[tokio::test]
async fn test_video_seek_maps_position_to_container_time() {
    let container = SimulatedContainer::new().with_track(
        SimulatedTrack::video(VIDEO_MIME, 320, 240, 200_000, 40, 2).with_start_time_us(1_000_000),
    );
    let platform = platform_with(container);
    let mut video = VideoDecoder::new(platform.clone(), SyncTuning::default());
    video.set_data_source("test.mp4");
    video.prepare().unwrap();
    video.start().unwrap();

    let mut clock = on_time_clock();
    for _ in 0..3 {
        video.do_some_work(&mut clock).unwrap();
    }
    video.pause().unwrap();

    // Sync samples sit every 50 ms; 60 ms lands on the one at 50 ms.
    video.seek_to(60_000).unwrap();
    assert_eq!(video.current_position_us(), 60_000);

    video.do_some_work(&mut clock).unwrap();
    let handles = platform.decoders_for(VIDEO_MIME);
    assert_eq!(handles[0].queued_input_times().last(), Some(&50_000));
    assert_eq!(handles[0].log().flushes, 1);
    assert_eq!(video.current_position_us(), 50_000);
}

#[tokio::test]
async fn test_decode_error_surfaces_as_track_failure() {
    let platform = Arc::new(
        SimulatedPlatform::new()
            .with_container("test.mp4", av_container())
            .with_decoder_script(
                VIDEO_MIME,
                DecoderScript {
                    fail_after_outputs: Some(2),
                    ..DecoderScript::default()
                },
            ),
    );
    let mut video = VideoDecoder::new(platform, SyncTuning::default());
    video.set_data_source("test.mp4");
    video.prepare().unwrap();
    video.start().unwrap();

    let mut clock = on_time_clock();
    let error = (0..20)
        .find_map(|_| video.do_some_work(&mut clock).err())
        .expect("decoder should fail");
    assert!(!error.is_recoverable());
    assert!(error.to_string().contains("video track 1 failed"));
}

#[tokio::test]
async fn test_audio_write_error_surfaces_as_track_failure() {
    let platform = platform_with(av_container());
    let mut audio = AudioDecoder::new(platform.clone(), SyncTuning::default());
    audio.set_data_source("test.mp4");
    assert_ok!(audio.prepare());
    assert_ok!(audio.start());

    // The first step only reports the output format; the second queues PCM.
    let mut clock = on_time_clock();
    assert_ok!(audio.do_some_work(&mut clock));
    assert_ok!(audio.do_some_work(&mut clock));
    assert!(audio.stats().audio_buffers_queued > 0);

    platform.audio_outputs()[0].fail_writes(true);
    let error = assert_err!(audio.process());
    assert!(matches!(
        error,
        MediaError::TrackFailed {
            track: 0,
            kind: TrackKind::Audio,
            source: syncplayer_core::PlayerError::AudioOutput { .. },
        }
    ));
    assert_eq!(error.category(), ErrorCategory::Decode);
    assert!(!error.is_recoverable());
}

#[tokio::test]
async fn test_release_frees_decoders_and_outputs() {
    let platform = platform_with(av_container());
    let mut audio = AudioDecoder::new(platform.clone(), SyncTuning::default());
    audio.set_data_source("test.mp4");
    audio.prepare().unwrap();
    audio.start().unwrap();

    let mut clock = on_time_clock();
    audio.do_some_work(&mut clock).unwrap();
    audio.release();

    assert!(!audio.is_prepared());
    assert_eq!(audio.track_count(), 0);
    assert!(platform.decoders_for(AUDIO_MIME)[0].log().released);
    assert!(platform.audio_outputs()[0].is_released());
}
