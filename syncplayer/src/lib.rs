//! # Sync Player - Audio/Video Synchronized Playback
//!
//! Sync Player decodes the audio and video tracks of a media source with
//! platform decoders and presents them in sync. The audio output's play-head
//! is the master clock; video frames are released when their presentation
//! time comes up on that clock, snapped onto the display's vsync grid.
//!
//! ## Key Features
//!
//! - **Audio master clock**: video follows the samples actually played
//! - **Non-blocking audio**: a bounded queue in front of the audio device
//! - **Vsync-aware release**: smoothed frame release times snapped to vsync
//! - **Pluggable platform**: demuxer, decoders, audio output and vsync behind traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncplayer::{SimulatedContainer, SimulatedPlatform, SimulatedTrack, SyncPlayer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     syncplayer::init_logging()?;
//!
//!     let container = SimulatedContainer::new()
//!         .with_track(SimulatedTrack::audio("audio/mp4a-latm", 48_000, 2, 2_000_000, 1_024))
//!         .with_track(SimulatedTrack::video("video/avc", 1280, 720, 2_000_000, 30, 30));
//!     let platform = Arc::new(SimulatedPlatform::new().with_container("clip.mp4", container));
//!
//!     let player = SyncPlayer::new(platform)?;
//!     let mut events = player.events();
//!     player.set_data_source("clip.mp4")?;
//!     player.prepare()?;
//!     player.play()?;
//!
//!     while let Some(event) = events.next().await {
//!         println!("Player event: {:?}", event);
//!         if event == syncplayer::PlayerEvent::Ended {
//!             break;
//!         }
//!     }
//!     player.release();
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use syncplayer_core::{
    keys, time, AudioOutput, AudioPlayState, AudioTimestamp, BufferFlags, BufferInfo, Decoder,
    Demuxer, DisplaySurface, MediaFormat, MediaPlatform, OutputEvent, PlayerError, PlayerResult, RenderRequest,
    SeekMode, TrackInfo, TrackKind, VsyncCallback, VsyncSource,
};

pub use syncplayer_media::{
    DecoderScript, FrameReleaseTimer, ManualVsyncSource, MediaTimeProvider, SimulatedAudioHandle,
    SimulatedContainer, SimulatedDecoderHandle, SimulatedPlatform, SimulatedTrack, SyncStats,
    SyncTuning, TimerVsyncSource, VsyncSampler,
};

#[cfg(feature = "cpal-output")]
pub use syncplayer_media::CpalAudioOutput;

// Public API modules
pub mod config;
pub mod event;
pub mod logging;
pub mod player;
pub mod state;

// Re-export main API types
pub use config::PlayerConfig;
pub use event::{PlayerEvent, PlayerEvents};
pub use logging::{init_logging, init_logging_with};
pub use player::{SyncPlayer, SyncPlayerBuilder};
pub use state::PlayerState;
