//! # Sync Player Core
//!
//! Foundational types for the synchronized audio/video player: the error
//! type, time unit helpers, the media format model, and the traits through
//! which the engine drives a platform's demultiplexer, decoders, audio output
//! and display vsync.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod format;
pub mod platform;
pub mod time;

// Re-export main types
pub use error::{PlayerError, PlayerResult};
pub use format::{keys, FormatValue, MediaFormat, TrackInfo, TrackKind};
pub use platform::{
    AudioOutput, AudioPlayState, AudioTimestamp, BufferFlags, BufferInfo, Decoder, Demuxer,
    DisplaySurface, MediaPlatform, OutputEvent, RenderRequest, SeekMode, VsyncCallback, VsyncSource,
};
