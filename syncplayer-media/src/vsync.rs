//! Display vsync sampling
//!
//! [`VsyncSampler`] keeps the most recent vsync timestamp of a
//! [`VsyncSource`] while at least one observer is interested. One sampler is
//! meant to be shared by every release timer in the process: construct it
//! once and hand clones to each player.
//!
//! [`TimerVsyncSource`] is a software vsync for hosts without a display
//! callback.

use crate::tuning::SyncTuning;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use syncplayer_core::{time, PlayerError, PlayerResult, VsyncCallback, VsyncSource};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ObserverState {
    observers: usize,
    /// Bumped whenever sampling (re)starts or stops so stale callbacks retire
    generation: u64,
}

struct SamplerInner {
    source: Arc<dyn VsyncSource>,
    resample_delay: Duration,
    state: Mutex<ObserverState>,
    sampled_vsync_time_ns: AtomicI64,
}

/// Reference-counted vsync sampler shared across release timers
#[derive(Clone)]
pub struct VsyncSampler {
    inner: Arc<SamplerInner>,
}

impl VsyncSampler {
    /// Create a sampler over `source`, re-sampling every `resample_delay` while observed
    pub fn new(source: Arc<dyn VsyncSource>, resample_delay: Duration) -> Self {
        Self {
            inner: Arc::new(SamplerInner {
                source,
                resample_delay,
                state: Mutex::new(ObserverState::default()),
                sampled_vsync_time_ns: AtomicI64::new(0),
            }),
        }
    }

    /// Create a sampler over `source` using the tuned resample delay
    pub fn with_tuning(source: Arc<dyn VsyncSource>, tuning: &SyncTuning) -> Self {
        Self::new(source, tuning.vsync_resample_delay)
    }

    /// Register interest in vsync samples; the first observer starts sampling
    pub fn add_observer(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.observers += 1;
            if state.observers != 1 {
                return;
            }
            state.generation += 1;
            state.generation
        };
        debug!("Starting vsync sampling");
        self.inner
            .source
            .post_frame_callback(frame_callback(&self.inner, generation), Duration::ZERO);
    }

    /// Drop interest; the last observer stops sampling and clears the sample
    pub fn remove_observer(&self) {
        let mut state = self.inner.state.lock();
        if state.observers == 0 {
            warn!("remove_observer called without a matching add_observer");
            return;
        }
        state.observers -= 1;
        if state.observers == 0 {
            // Held across the cancel so a concurrent first observer posts after it.
            state.generation += 1;
            debug!("Stopping vsync sampling");
            self.inner.source.remove_frame_callbacks();
            self.inner.sampled_vsync_time_ns.store(0, Ordering::Release);
        }
    }

    /// Latest sampled vsync time in monotonic nanoseconds, zero when none
    pub fn sampled_vsync_time_ns(&self) -> i64 {
        self.inner.sampled_vsync_time_ns.load(Ordering::Acquire)
    }

    /// Current number of observers
    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers
    }

    /// Vsync period derived from the source's refresh rate
    pub fn vsync_duration_ns(&self) -> Option<i64> {
        self.inner
            .source
            .refresh_rate()
            .filter(|rate| *rate > 0.0)
            .map(|rate| (time::NS_PER_S as f64 / rate) as i64)
    }
}

impl std::fmt::Debug for VsyncSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsyncSampler")
            .field("observers", &self.observer_count())
            .field("sampled_vsync_time_ns", &self.sampled_vsync_time_ns())
            .finish()
    }
}

fn frame_callback(inner: &Arc<SamplerInner>, generation: u64) -> VsyncCallback {
    let weak: Weak<SamplerInner> = Arc::downgrade(inner);
    Box::new(move |vsync_time_ns| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        {
            let state = inner.state.lock();
            if state.observers == 0 || state.generation != generation {
                return;
            }
            inner
                .sampled_vsync_time_ns
                .store(vsync_time_ns, Ordering::Release);
        }
        let delay = inner.resample_delay;
        inner
            .source
            .post_frame_callback(frame_callback(&inner, generation), delay);
    })
}

struct PendingCallback {
    due: Instant,
    callback: VsyncCallback,
}

#[derive(Default)]
struct TimerState {
    pending: Vec<PendingCallback>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Software vsync ticking at a fixed refresh rate on its own thread
pub struct TimerVsyncSource {
    refresh_rate: f64,
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerVsyncSource {
    /// Spawn the tick thread
    pub fn new(refresh_rate: f64) -> PlayerResult<Self> {
        if !(refresh_rate.is_finite() && refresh_rate > 0.0) {
            return Err(PlayerError::Configuration {
                reason: format!("invalid refresh rate {}", refresh_rate),
            });
        }
        let period = Duration::from_secs_f64(1.0 / refresh_rate);
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            wake: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("vsync-timer".to_string())
            .spawn(move || run_timer(thread_shared, period))
            .map_err(|e| PlayerError::Thread {
                reason: e.to_string(),
            })?;

        Ok(Self {
            refresh_rate,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl VsyncSource for TimerVsyncSource {
    fn post_frame_callback(&self, callback: VsyncCallback, delay: Duration) {
        let mut state = self.shared.state.lock();
        state.pending.push(PendingCallback {
            due: Instant::now() + delay,
            callback,
        });
        self.shared.wake.notify_one();
    }

    fn remove_frame_callbacks(&self) {
        self.shared.state.lock().pending.clear();
    }

    fn refresh_rate(&self) -> Option<f64> {
        Some(self.refresh_rate)
    }
}

impl Drop for TimerVsyncSource {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.pending.clear();
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("vsync timer thread panicked");
            }
        }
    }
}

fn run_timer(shared: Arc<TimerShared>, period: Duration) {
    let origin = Instant::now();
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        if state.pending.is_empty() {
            shared.wake.wait(&mut state);
            continue;
        }

        let now = Instant::now();
        let tick = next_tick(origin, period, now);
        if now < tick {
            shared.wake.wait_for(&mut state, tick - now);
            continue;
        }

        let tick_ns = time::monotonic_now_ns();
        let (due, waiting): (Vec<_>, Vec<_>) =
            state.pending.drain(..).partition(|pending| pending.due <= now);
        state.pending = waiting;
        MutexGuard::unlocked(&mut state, || {
            for pending in due {
                (pending.callback)(tick_ns);
            }
        });
        // Skip past the tick just delivered.
        let after = tick + Duration::from_micros(1);
        if Instant::now() < after {
            MutexGuard::unlocked(&mut state, || thread::sleep(after - Instant::now()));
        }
    }
}

/// First tick boundary at or after `now`
fn next_tick(origin: Instant, period: Duration, now: Instant) -> Instant {
    let elapsed = now.saturating_duration_since(origin).as_nanos();
    let period_ns = period.as_nanos().max(1);
    let ticks = elapsed.div_ceil(period_ns);
    origin + Duration::from_nanos((ticks * period_ns) as u64)
}
