//! Synchronized audio/video player
//!
//! [`SyncPlayer`] owns one audio and one video decoder over the same media
//! source and a dedicated polling thread that drives them. The audio output's
//! play-head is the master clock: video frames are released at the real time
//! that corresponds to their presentation time on that clock, then smoothed
//! and snapped to vsync by the [`FrameReleaseTimer`].
//!
//! Control operations may be called from any thread. They and the polling
//! thread share one lock around the player's state, and a condition variable
//! wakes the thread early when a control operation changes something.

use crate::config::PlayerConfig;
use crate::event::{PlayerEvent, PlayerEvents};
use crate::state::PlayerState;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use syncplayer_core::{time, DisplaySurface, MediaPlatform, PlayerError, PlayerResult, VsyncSource};
use syncplayer_media::{
    AudioDecoder, FrameReleaseTimer, MediaResult, MediaTimeProvider, SyncStats, VideoDecoder,
    VsyncSampler,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Which clock the current Delta Time was measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockSource {
    Audio,
    Monotonic,
}

/// Mapping from media time to real time, rebuilt on every play
#[derive(Debug)]
struct TimingState {
    timer: FrameReleaseTimer,
    delta_time_us: Option<(i64, ClockSource)>,
}

/// Media time provider handed to the decoders for one poll tick
struct SyncClock<'a> {
    timing: &'a mut TimingState,
    audio: Option<&'a mut AudioDecoder>,
}

impl SyncClock<'_> {
    fn read(&mut self) -> (i64, ClockSource) {
        // An ended audio stream stops advancing its play-head.
        let audio_time = self
            .audio
            .as_deref_mut()
            .filter(|audio| !audio.is_ended())
            .and_then(AudioDecoder::audio_time_us);
        match audio_time {
            Some(now_us) => (now_us, ClockSource::Audio),
            None => (time::monotonic_now_us(), ClockSource::Monotonic),
        }
    }
}

impl MediaTimeProvider for SyncClock<'_> {
    fn now_us(&mut self) -> i64 {
        self.read().0
    }

    fn real_time_us_for_media_time(&mut self, media_time_us: i64) -> i64 {
        let (now_us, source) = self.read();
        let delta_time_us = match self.timing.delta_time_us {
            Some((delta, measured_on)) if measured_on == source => delta,
            _ => {
                let delta = now_us - media_time_us;
                debug!(delta_us = delta, ?source, "Media clock anchored");
                self.timing.delta_time_us = Some((delta, source));
                delta
            }
        };

        let early_us = delta_time_us + media_time_us - now_us;
        let unadjusted_release_ns = time::monotonic_now_ns() + time::us_to_ns(early_us);
        let adjusted_release_ns = self
            .timing
            .timer
            .adjust_release_time(delta_time_us + media_time_us, unadjusted_release_ns);
        time::ns_to_us(adjusted_release_ns)
    }

    fn vsync_duration_ns(&self) -> i64 {
        self.timing.timer.vsync_duration_ns()
    }
}

/// Everything the control operations and the polling thread share
struct PlayerCore {
    state: PlayerState,
    audio: AudioDecoder,
    video: VideoDecoder,
    timing: TimingState,
    duration_us: Option<i64>,
    worker_running: bool,
    /// Bumped on every spawn; a worker exits once it no longer matches
    worker_generation: u64,
    worker: Option<JoinHandle<()>>,
    failure: Option<String>,
    ended_notified: bool,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerCore {
    fn emit(&self, event: PlayerEvent) {
        // No subscriber is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, to: PlayerState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(%from, %to, "Player state changed");
        self.emit(PlayerEvent::StateChanged { from, to });
    }

    fn start_decoders(&mut self) -> MediaResult<()> {
        self.audio.start()?;
        self.video.start()
    }

    fn pause_decoders(&mut self) -> MediaResult<()> {
        self.audio.pause()?;
        self.video.pause()
    }

    fn flush_decoders(&mut self) -> MediaResult<()> {
        self.audio.flush()?;
        self.video.flush()
    }

    fn do_some_work(&mut self) -> MediaResult<()> {
        let Self {
            audio,
            video,
            timing,
            ..
        } = self;
        audio.do_some_work(&mut SyncClock {
            timing: &mut *timing,
            audio: None,
        })?;
        video.do_some_work(&mut SyncClock {
            timing: &mut *timing,
            audio: Some(&mut *audio),
        })?;
        audio.process()
    }

    /// One poll tick while Playing
    fn tick(&mut self) {
        if let Err(e) = self.do_some_work() {
            let message = e.to_string();
            error!(error = %message, "Track failed, pausing playback");
            self.failure = Some(message.clone());
            self.emit(PlayerEvent::Error { message });
            if let Err(pause_error) = self.pause_decoders() {
                warn!(error = %pause_error, "Failed to pause decoders after track failure");
            }
            self.set_state(PlayerState::Paused);
            return;
        }

        if !self.ended_notified && self.audio.is_ended() && self.video.is_ended() {
            self.ended_notified = true;
            info!("Playback reached end of stream");
            self.emit(PlayerEvent::Ended);
        }
    }

    fn stats(&self) -> SyncStats {
        let mut stats = self.audio.stats();
        stats += self.video.stats();
        stats.resyncs += self.timing.timer.resync_count();
        stats
    }
}

struct Shared {
    core: Mutex<PlayerCore>,
    wake: Condvar,
    config: PlayerConfig,
}

fn run_worker(shared: Arc<Shared>, generation: u64) {
    debug!(generation, "Playback worker started");
    let mut core = shared.core.lock();
    while core.worker_running && core.worker_generation == generation {
        if core.state == PlayerState::Playing {
            core.tick();
        }
        shared.wake.wait_for(&mut core, shared.config.poll_interval);
    }
    debug!(generation, "Playback worker stopped");
}

/// Builder for [`SyncPlayer`]
pub struct SyncPlayerBuilder {
    platform: Arc<dyn MediaPlatform>,
    config: PlayerConfig,
    vsync_sampler: Option<VsyncSampler>,
    vsync_source: Option<Arc<dyn VsyncSource>>,
    surface: Option<DisplaySurface>,
}

impl SyncPlayerBuilder {
    /// Use a custom configuration
    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Snap release times to vsync from `source`, resampled per the configured tuning
    pub fn vsync_source(mut self, source: Arc<dyn VsyncSource>) -> Self {
        self.vsync_source = Some(source);
        self
    }

    /// Snap release times to the vsync sampled by an existing `sampler`.
    ///
    /// The sampler keeps its own resample delay and takes precedence over
    /// [`vsync_source`](Self::vsync_source).
    pub fn vsync_sampler(mut self, sampler: VsyncSampler) -> Self {
        self.vsync_sampler = Some(sampler);
        self
    }

    /// Render video into `surface`
    pub fn surface(mut self, surface: DisplaySurface) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Validate the configuration and create the player
    pub fn build(self) -> PlayerResult<SyncPlayer> {
        self.config.validate()?;
        let tuning = &self.config.tuning;
        let (events, _) = broadcast::channel(self.config.event_capacity);
        let sampler = self.vsync_sampler.or_else(|| {
            self.vsync_source
                .map(|source| VsyncSampler::with_tuning(source, tuning))
        });
        let mut video = VideoDecoder::new(Arc::clone(&self.platform), tuning.clone());
        video.set_surface(self.surface);
        let core = PlayerCore {
            state: PlayerState::Idle,
            audio: AudioDecoder::new(Arc::clone(&self.platform), tuning.clone()),
            video,
            timing: TimingState {
                timer: FrameReleaseTimer::new(sampler, tuning),
                delta_time_us: None,
            },
            duration_us: None,
            worker_running: false,
            worker_generation: 0,
            worker: None,
            failure: None,
            ended_notified: false,
            events,
        };

        Ok(SyncPlayer {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                wake: Condvar::new(),
                config: self.config,
            }),
        })
    }
}

/// Audio/video player synchronised on the audio clock
pub struct SyncPlayer {
    shared: Arc<Shared>,
}

impl SyncPlayer {
    /// Start building a player on `platform`
    pub fn builder(platform: Arc<dyn MediaPlatform>) -> SyncPlayerBuilder {
        SyncPlayerBuilder {
            platform,
            config: PlayerConfig::default(),
            vsync_sampler: None,
            vsync_source: None,
            surface: None,
        }
    }

    /// Player with the default configuration and no vsync snapping
    pub fn new(platform: Arc<dyn MediaPlatform>) -> PlayerResult<Self> {
        Self::builder(platform).build()
    }

    /// Set the media source opened by [`prepare`](Self::prepare); only while Idle
    pub fn set_data_source(&self, path: &str) -> PlayerResult<()> {
        let mut core = self.shared.core.lock();
        if core.state != PlayerState::Idle {
            return Err(PlayerError::invalid_state("set_data_source", core.state));
        }
        info!(path, "Data source set");
        core.audio.set_data_source(path);
        core.video.set_data_source(path);
        Ok(())
    }

    /// Open the source and configure a decoder for every track.
    ///
    /// On success the player is Paused and knows its duration. On failure it
    /// is back to Idle and the error says which part failed.
    pub fn prepare(&self) -> PlayerResult<()> {
        let mut core = self.shared.core.lock();
        if core.state != PlayerState::Idle {
            return Err(PlayerError::invalid_state("prepare", core.state));
        }
        core.set_state(PlayerState::Preparing);

        let prepared = core.audio.prepare().and_then(|_| core.video.prepare());
        if let Err(e) = prepared {
            error!(error = %e, "Prepare failed");
            core.audio.release();
            core.video.release();
            core.set_state(PlayerState::Idle);
            return Err(e.into());
        }

        core.duration_us = match (core.audio.duration_us(), core.video.duration_us()) {
            (Some(audio), Some(video)) => Some(audio.max(video)),
            (audio, video) => audio.or(video),
        };
        info!(
            duration_us = ?core.duration_us,
            audio_tracks = core.audio.track_count(),
            video_tracks = core.video.track_count(),
            "Player prepared"
        );
        core.set_state(PlayerState::Paused);
        let duration_us = core.duration_us;
        core.emit(PlayerEvent::Prepared { duration_us });
        Ok(())
    }

    /// Start or resume playback and make sure the polling thread runs
    pub fn play(&self) -> PlayerResult<()> {
        let mut core = self.shared.core.lock();
        if let Some(reason) = core.failure.clone() {
            return Err(PlayerError::PlaybackFailed { reason });
        }
        core.timing.timer.enable();

        let previous = core.state;
        match previous {
            PlayerState::Playing => return Ok(()),
            PlayerState::Idle | PlayerState::Preparing => core.set_state(PlayerState::Preparing),
            PlayerState::Paused => {}
        }
        if let Err(e) = core.start_decoders() {
            error!(error = %e, "Failed to start decoders");
            core.set_state(previous);
            return Err(e.into());
        }
        core.timing.delta_time_us = None;
        core.ended_notified = false;
        core.set_state(PlayerState::Playing);

        if !core.worker_running {
            let shared = Arc::clone(&self.shared);
            let generation = core.worker_generation + 1;
            let handle = thread::Builder::new()
                .name("syncplayer-worker".to_string())
                .spawn(move || run_worker(shared, generation))
                .map_err(|e| PlayerError::Thread {
                    reason: format!("Failed to spawn playback worker: {}", e),
                })?;
            core.worker_generation = generation;
            core.worker_running = true;
            if core.worker.replace(handle).is_some() {
                debug!("Detached a stopped playback worker");
            }
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Pause playback; a no-op when already Paused
    pub fn pause(&self) -> PlayerResult<()> {
        let mut core = self.shared.core.lock();
        match core.state {
            PlayerState::Playing => {
                core.pause_decoders()?;
                core.set_state(PlayerState::Paused);
                Ok(())
            }
            PlayerState::Paused => Ok(()),
            state => Err(PlayerError::invalid_state("pause", state)),
        }
    }

    /// Drop every in-flight buffer; ignored while Playing or Preparing
    pub fn flush(&self) -> PlayerResult<()> {
        let mut core = self.shared.core.lock();
        if matches!(core.state, PlayerState::Playing | PlayerState::Preparing) {
            debug!(state = %core.state, "Flush ignored");
            return Ok(());
        }
        core.flush_decoders()?;
        Ok(())
    }

    /// Reposition both decoders near `position_us`; only while Paused
    pub fn seek_to(&self, position_us: i64) -> PlayerResult<()> {
        let mut core = self.shared.core.lock();
        if core.state != PlayerState::Paused {
            return Err(PlayerError::invalid_state("seek_to", core.state));
        }
        core.audio.seek_to(position_us)?;
        core.video.seek_to(position_us)?;
        core.timing.delta_time_us = None;
        core.timing.timer.reset();
        core.ended_notified = false;
        info!(position_us, "Seeked");
        Ok(())
    }

    /// Tear the session down, stop the polling thread and return to Idle
    pub fn release(&self) {
        if let Some(handle) = self.stop_session() {
            if handle.join().is_err() {
                warn!("Playback worker panicked");
            }
        }
    }

    /// Reset to Idle and hand back the worker this call stopped
    fn stop_session(&self) -> Option<JoinHandle<()>> {
        let mut core = self.shared.core.lock();
        if core.state == PlayerState::Playing {
            if let Err(e) = core.pause_decoders() {
                warn!(error = %e, "Failed to pause decoders during release");
            }
        }
        core.audio.release();
        core.video.release();
        core.timing.timer.disable();
        core.timing.delta_time_us = None;
        core.duration_us = None;
        core.failure = None;
        core.ended_notified = false;
        core.set_state(PlayerState::Idle);
        core.worker_running = false;
        self.shared.wake.notify_all();
        core.worker.take()
    }

    /// Current lifecycle state
    pub fn state(&self) -> PlayerState {
        self.shared.core.lock().state
    }

    /// Longest track duration, once prepared
    pub fn duration_us(&self) -> Option<i64> {
        self.shared.core.lock().duration_us
    }

    /// Presentation time of the last video frame released for display
    pub fn current_position_us(&self) -> i64 {
        self.shared.core.lock().video.current_position_us()
    }

    /// Master clock: the audio play-head when there is one, else the monotonic clock
    pub fn media_time_us(&self) -> i64 {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;
        SyncClock {
            timing: &mut core.timing,
            audio: Some(&mut core.audio),
        }
        .now_us()
    }

    /// Both decoders reached end of stream
    pub fn is_ended(&self) -> bool {
        let core = self.shared.core.lock();
        core.audio.is_ended() && core.video.is_ended()
    }

    /// Failure that paused playback, until the next release
    pub fn failure(&self) -> Option<String> {
        self.shared.core.lock().failure.clone()
    }

    /// Synchronisation counters for the current session
    pub fn stats(&self) -> SyncStats {
        self.shared.core.lock().stats()
    }

    /// Subscribe to player events sent from now on
    pub fn events(&self) -> PlayerEvents {
        PlayerEvents::new(self.shared.core.lock().events.subscribe())
    }

    /// Configuration the player was built with
    pub fn config(&self) -> &PlayerConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for SyncPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("SyncPlayer")
            .field("state", &core.state)
            .field("duration_us", &core.duration_us)
            .field("audio", &core.audio)
            .field("video", &core.video)
            .finish()
    }
}

impl Drop for SyncPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use syncplayer_media::{SimulatedContainer, SimulatedPlatform, SimulatedTrack};

    const CLIP: &str = "clip.mp4";

    fn player() -> SyncPlayer {
        let container = SimulatedContainer::new()
            .with_track(SimulatedTrack::audio("audio/mp4a-latm", 48_000, 2, 5_000_000, 1_024))
            .with_track(SimulatedTrack::video("video/avc", 1280, 720, 4_800_000, 30, 30));
        let platform = Arc::new(SimulatedPlatform::new().with_container(CLIP, container));
        SyncPlayer::new(platform).unwrap()
    }

    fn start(player: &SyncPlayer) {
        player.set_data_source(CLIP).unwrap();
        player.prepare().unwrap();
        player.play().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_worker_exits_when_play_restarts_first() {
        let player = player();
        start(&player);
        let first_generation = player.shared.core.lock().worker_generation;

        // Restart before the stopped worker is joined.
        let stopped = player.stop_session().expect("worker was running");
        start(&player);
        assert_eq!(
            player.shared.core.lock().worker_generation,
            first_generation + 1
        );

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = done_tx.send(stopped.join().is_ok());
        });
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok(true));

        // The restarted worker is the one release joins.
        assert!(player.shared.core.lock().worker.is_some());
        player.release();
        let core = player.shared.core.lock();
        assert!(core.worker.is_none());
        assert!(!core.worker_running);
    }
}
