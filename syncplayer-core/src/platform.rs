//! External collaborator interfaces
//!
//! The player does not demultiplex, decode, play sound or observe the display
//! itself. It drives these capabilities through the traits below, which a
//! platform layer implements on top of its native media stack.
//!
//! Every method is non-blocking: "nothing available right now" is reported
//! through `Option`/[`OutputEvent::TryAgainLater`], never by waiting.

use crate::error::PlayerResult;
use crate::format::MediaFormat;
use std::time::Duration;

/// Per-buffer flags shared by demuxed samples and decoder buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags
    pub const NONE: Self = Self(0);
    /// Sample is a sync (key) frame
    pub const KEY_FRAME: Self = Self(1);
    /// Buffer marks the end of the stream
    pub const END_OF_STREAM: Self = Self(1 << 2);

    /// Raw bit value
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Flags of `self` that are not in `other`
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Whether the end-of-stream bit is set
    pub const fn is_end_of_stream(&self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Seek positioning relative to sync samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Closest sync sample at or before the target
    PreviousSync,
    /// Closest sync sample at or after the target
    NextSync,
    /// Closest sync sample in either direction
    ClosestSync,
}

/// Container demultiplexer bound to one media source
pub trait Demuxer: Send {
    /// Number of tracks in the container
    fn track_count(&self) -> usize;

    /// Format of a track
    fn track_format(&self, index: usize) -> PlayerResult<MediaFormat>;

    /// Select a track; only selected tracks produce samples
    fn select_track(&mut self, index: usize) -> PlayerResult<()>;

    /// Track index of the current sample, `None` once all selected tracks are exhausted
    fn sample_track_index(&self) -> Option<usize>;

    /// Presentation time of the current sample in microseconds
    fn sample_time_us(&self) -> Option<i64>;

    /// Flags of the current sample
    fn sample_flags(&self) -> BufferFlags;

    /// Copy the current sample into `buffer`, replacing its contents.
    ///
    /// Returns the sample size, or `None` when there is no current sample.
    fn read_sample_data(&mut self, buffer: &mut Vec<u8>) -> Option<usize>;

    /// Move to the next sample; returns `false` when no samples remain
    fn advance(&mut self) -> bool;

    /// Reposition every selected track near `time_us`
    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> PlayerResult<()>;
}

/// Metadata of a decoded output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Offset of valid data inside the buffer
    pub offset: usize,
    /// Number of valid bytes
    pub size: usize,
    /// Presentation time in microseconds
    pub presentation_time_us: i64,
    /// Buffer flags
    pub flags: BufferFlags,
}

impl BufferInfo {
    /// Whether this buffer marks the end of the stream
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_end_of_stream()
    }
}

/// Result of polling a decoder for output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// A decoded buffer is ready
    Buffer {
        /// Decoder-owned buffer index
        index: usize,
        /// Buffer metadata
        info: BufferInfo,
    },
    /// The output format changed; subsequent buffers use the new format
    FormatChanged(MediaFormat),
    /// Output buffer set was reallocated; indices stay valid
    BuffersChanged,
    /// No output available yet
    TryAgainLater,
}

/// What to do with a decoded buffer when handing it back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRequest {
    /// Return the buffer without displaying it
    Discard,
    /// Display the buffer at the given monotonic time in nanoseconds
    RenderAt(i64),
}

/// Opaque handle of the display surface a video decoder renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplaySurface(u64);

impl DisplaySurface {
    /// Wrap a platform window or surface id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Platform id of the surface
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Hardware or software decoder for one track
pub trait Decoder: Send {
    /// Configure for a track format, rendering into `surface` when one is given
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<DisplaySurface>,
    ) -> PlayerResult<()>;

    /// Start accepting input
    fn start(&mut self) -> PlayerResult<()>;

    /// Stop decoding; the decoder can be configured again
    fn stop(&mut self) -> PlayerResult<()>;

    /// Discard every queued input and pending output buffer
    fn flush(&mut self) -> PlayerResult<()>;

    /// Free decoder resources
    fn release(&mut self);

    /// Claim a free input buffer index, if any
    fn dequeue_input_buffer(&mut self) -> PlayerResult<Option<usize>>;

    /// Mutable access to a claimed input buffer
    fn input_buffer(&mut self, index: usize) -> PlayerResult<&mut Vec<u8>>;

    /// Submit a filled input buffer
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> PlayerResult<()>;

    /// Poll for decoded output
    fn dequeue_output_buffer(&mut self) -> PlayerResult<OutputEvent>;

    /// Read access to a dequeued output buffer
    fn output_buffer(&self, index: usize) -> PlayerResult<&[u8]>;

    /// Hand a dequeued output buffer back to the decoder
    fn release_output_buffer(&mut self, index: usize, request: RenderRequest) -> PlayerResult<()>;
}

/// Play state reported by an audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPlayState {
    /// Not started, or stopped
    Stopped,
    /// Paused with data retained
    Paused,
    /// Actively consuming data
    Playing,
}

/// Hardware timestamp pairing a frame position with a monotonic time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTimestamp {
    /// Frames presented at `nano_time`
    pub frame_position: i64,
    /// Monotonic time in nanoseconds
    pub nano_time: i64,
}

/// Platform audio output stream
pub trait AudioOutput: Send {
    /// Write as much of `data` as fits without blocking; returns bytes accepted
    fn write_non_blocking(&mut self, data: &[u8], timestamp_ns: i64) -> PlayerResult<usize>;

    /// Start or resume playback
    fn play(&mut self) -> PlayerResult<()>;

    /// Pause playback, keeping buffered data
    fn pause(&mut self) -> PlayerResult<()>;

    /// Stop playback once buffered data has been played
    fn stop(&mut self) -> PlayerResult<()>;

    /// Drop buffered data
    fn flush(&mut self) -> PlayerResult<()>;

    /// Free the stream
    fn release(&mut self);

    /// Current play state
    fn play_state(&self) -> AudioPlayState;

    /// Frames played since the stream started
    fn playback_head_position(&self) -> i64;

    /// Latest hardware timestamp, when the platform provides one
    fn timestamp(&self) -> Option<AudioTimestamp> {
        None
    }

    /// Output latency in milliseconds, when the platform can report it
    fn latency_ms(&self) -> Option<u32> {
        None
    }
}

/// Callback invoked with a vsync time in monotonic nanoseconds
pub type VsyncCallback = Box<dyn FnOnce(i64) + Send>;

/// Display vertical sync source
pub trait VsyncSource: Send + Sync {
    /// Run `callback` at the first vsync after `delay` has elapsed
    fn post_frame_callback(&self, callback: VsyncCallback, delay: Duration);

    /// Cancel every pending callback
    fn remove_frame_callbacks(&self);

    /// Display refresh rate in Hz, when known
    fn refresh_rate(&self) -> Option<f64>;
}

/// Factory for the platform collaborators of one playback session
pub trait MediaPlatform: Send + Sync {
    /// Open a demultiplexer on a file path or URI
    fn open_demuxer(&self, source: &str) -> PlayerResult<Box<dyn Demuxer>>;

    /// Create a decoder able to handle `mime`, if the platform has one
    fn create_decoder(&self, mime: &str) -> Option<Box<dyn Decoder>>;

    /// Open an audio output for 16-bit PCM at the given layout
    fn open_audio_output(
        &self,
        sample_rate: u32,
        channel_count: u16,
    ) -> PlayerResult<Box<dyn AudioOutput>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::END_OF_STREAM;
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(flags.is_end_of_stream());
        assert!(!BufferFlags::NONE.is_end_of_stream());
        assert_eq!(BufferFlags::default(), BufferFlags::NONE);
        assert_eq!(flags.bits(), 5);
        assert_eq!(
            flags.difference(BufferFlags::END_OF_STREAM),
            BufferFlags::KEY_FRAME
        );
    }

    #[test]
    fn test_display_surface_id() {
        let surface = DisplaySurface::new(42);
        assert_eq!(surface.id(), 42);
        assert_eq!(surface, DisplaySurface::new(42));
    }

    #[test]
    fn test_buffer_info_end_of_stream() {
        let info = BufferInfo {
            offset: 0,
            size: 0,
            presentation_time_us: 0,
            flags: BufferFlags::END_OF_STREAM,
        };
        assert!(info.is_end_of_stream());
    }
}
