//! # Sync Player Media
//!
//! The decode and synchronisation engine of the sync player: per-track decode
//! sessions, the audio and video decoder orchestrators, a non-blocking audio
//! sink whose play-head is the master clock, a display vsync sampler and the
//! frame release timer that snaps video release times onto vsync.
//!
//! The [`simulated`] module provides an in-memory platform for tests and demos.

#![warn(clippy::all)]

pub mod audio_sink;
pub mod clock;
pub mod codec_state;
#[cfg(feature = "cpal-output")]
pub mod cpal_output;
pub mod decoder;
pub mod error;
pub mod release_timer;
pub mod simulated;
pub mod stats;
pub mod tuning;
pub mod vsync;

// Re-export main types
pub use audio_sink::NonBlockingAudioSink;
pub use clock::MediaTimeProvider;
pub use codec_state::{CodecState, DrainOutcome, OutputSink, PcmSink, SurfaceSink};
#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalAudioOutput;
pub use decoder::{AudioDecoder, MediaDecoder, VideoDecoder};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use release_timer::{closest_vsync, FrameReleaseTimer};
pub use simulated::{
    DecoderScript, ManualVsyncSource, ScriptedClock, SimulatedAudioHandle, SimulatedAudioOutput,
    SimulatedContainer, SimulatedDecoderHandle, SimulatedPlatform, SimulatedTrack,
};
pub use stats::SyncStats;
pub use tuning::SyncTuning;
pub use vsync::{TimerVsyncSource, VsyncSampler};
