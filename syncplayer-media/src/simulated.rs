//! In-memory platform
//!
//! Everything the engine needs from a platform, simulated without hardware:
//! a container/demuxer over synthetic samples, a passthrough decoder that can
//! be scripted to change format or fail, an audio output with controllable
//! capacity and play-head, a manually fired vsync source and a scripted
//! media clock. Handles expose what each collaborator observed so tests can
//! assert on it.

use crate::clock::MediaTimeProvider;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncplayer_core::format::{MIME_AUDIO_RAW, MIME_VIDEO_RAW};
use syncplayer_core::{
    time, AudioOutput, AudioPlayState, AudioTimestamp, BufferFlags, BufferInfo, Decoder, Demuxer,
    DisplaySurface, MediaFormat, MediaPlatform, OutputEvent, PlayerError, PlayerResult,
    RenderRequest, SeekMode, TrackKind, VsyncCallback, VsyncSource,
};

/// Bytes per interleaved 16-bit PCM frame
fn bytes_per_frame(channel_count: u16) -> usize {
    2 * usize::from(channel_count.max(1))
}

// ============================================================================
// Container and demuxer
// ============================================================================

/// One compressed sample of a simulated track
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSample {
    /// Presentation time in microseconds
    pub time_us: i64,
    /// Payload
    pub data: Vec<u8>,
    /// Sample flags
    pub flags: BufferFlags,
}

/// A track of a simulated container
#[derive(Debug, Clone)]
pub struct SimulatedTrack {
    format: MediaFormat,
    samples: Vec<SimulatedSample>,
}

impl SimulatedTrack {
    /// Track with explicit samples
    pub fn new(format: MediaFormat, samples: Vec<SimulatedSample>) -> Self {
        Self { format, samples }
    }

    /// PCM-sized audio samples of `buffer_frames` frames each, covering `duration_us`
    pub fn audio(
        mime: &str,
        sample_rate: u32,
        channel_count: u16,
        duration_us: i64,
        buffer_frames: usize,
    ) -> Self {
        let format =
            MediaFormat::audio(mime, sample_rate, channel_count).with_duration_us(duration_us);
        let buffer_us = (buffer_frames as i64 * time::US_PER_S / i64::from(sample_rate)).max(1);
        let sample_size = buffer_frames * bytes_per_frame(channel_count);
        let samples = (0..)
            .map(|i: i64| i * buffer_us)
            .take_while(|time_us| *time_us < duration_us)
            .enumerate()
            .map(|(i, time_us)| SimulatedSample {
                time_us,
                data: vec![(i % 251) as u8; sample_size],
                flags: BufferFlags::KEY_FRAME,
            })
            .collect();
        Self::new(format, samples)
    }

    /// Video samples at `frame_rate`, with a key frame every `key_interval` frames
    pub fn video(
        mime: &str,
        width: u32,
        height: u32,
        duration_us: i64,
        frame_rate: u32,
        key_interval: usize,
    ) -> Self {
        let format = MediaFormat::video(mime, width, height).with_duration_us(duration_us);
        let frame_us = (time::US_PER_S / i64::from(frame_rate.max(1))).max(1);
        let key_interval = key_interval.max(1);
        let samples = (0..)
            .map(|i: i64| i * frame_us)
            .take_while(|time_us| *time_us < duration_us)
            .enumerate()
            .map(|(i, time_us)| SimulatedSample {
                time_us,
                data: vec![(i % 251) as u8; 64],
                flags: if i % key_interval == 0 {
                    BufferFlags::KEY_FRAME
                } else {
                    BufferFlags::NONE
                },
            })
            .collect();
        Self::new(format, samples)
    }

    /// Shift every sample time by `offset_us`
    pub fn with_start_time_us(mut self, offset_us: i64) -> Self {
        for sample in &mut self.samples {
            sample.time_us += offset_us;
        }
        self
    }

    /// Track format
    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    /// Samples in decode order
    pub fn samples(&self) -> &[SimulatedSample] {
        &self.samples
    }
}

/// A simulated media file
#[derive(Debug, Clone, Default)]
pub struct SimulatedContainer {
    tracks: Vec<SimulatedTrack>,
}

impl SimulatedContainer {
    /// Empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track
    pub fn with_track(mut self, track: SimulatedTrack) -> Self {
        self.tracks.push(track);
        self
    }

    /// Tracks in container order
    pub fn tracks(&self) -> &[SimulatedTrack] {
        &self.tracks
    }
}

/// Demuxer interleaving the selected tracks of a [`SimulatedContainer`] by time
#[derive(Debug)]
pub struct SimulatedDemuxer {
    tracks: Vec<SimulatedTrack>,
    selected: Vec<bool>,
    cursors: Vec<usize>,
}

impl SimulatedDemuxer {
    /// Open a container
    pub fn new(container: SimulatedContainer) -> Self {
        let count = container.tracks.len();
        Self {
            tracks: container.tracks,
            selected: vec![false; count],
            cursors: vec![0; count],
        }
    }

    fn current(&self) -> Option<(usize, &SimulatedSample)> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(index, _)| self.selected[*index])
            .filter_map(|(index, track)| {
                track
                    .samples
                    .get(self.cursors[index])
                    .map(|sample| (index, sample))
            })
            .min_by_key(|(index, sample)| (sample.time_us, *index))
    }
}

impl Demuxer for SimulatedDemuxer {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> PlayerResult<MediaFormat> {
        self.tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| PlayerError::Demuxer {
                reason: format!("no track {}", index),
            })
    }

    fn select_track(&mut self, index: usize) -> PlayerResult<()> {
        match self.selected.get_mut(index) {
            Some(selected) => {
                *selected = true;
                Ok(())
            }
            None => Err(PlayerError::Demuxer {
                reason: format!("no track {}", index),
            }),
        }
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(index, _)| index)
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.current().map(|(_, sample)| sample.time_us)
    }

    fn sample_flags(&self) -> BufferFlags {
        self.current()
            .map_or(BufferFlags::NONE, |(_, sample)| sample.flags)
    }

    fn read_sample_data(&mut self, buffer: &mut Vec<u8>) -> Option<usize> {
        let (_, sample) = self.current()?;
        buffer.clear();
        buffer.extend_from_slice(&sample.data);
        Some(sample.data.len())
    }

    fn advance(&mut self) -> bool {
        let Some((index, _)) = self.current() else {
            return false;
        };
        self.cursors[index] += 1;
        self.current().is_some()
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> PlayerResult<()> {
        for (index, track) in self.tracks.iter().enumerate() {
            if !self.selected[index] {
                continue;
            }
            let sync_points = track
                .samples
                .iter()
                .enumerate()
                .filter(|(_, sample)| sample.flags.contains(BufferFlags::KEY_FRAME));
            let before = sync_points
                .clone()
                .filter(|(_, sample)| sample.time_us <= time_us)
                .last();
            let after = sync_points
                .clone()
                .find(|(_, sample)| sample.time_us >= time_us);
            let chosen = match mode {
                SeekMode::PreviousSync => before.or(after),
                SeekMode::NextSync => after.or(before),
                SeekMode::ClosestSync => match (before, after) {
                    (Some(b), Some(a)) => {
                        if time_us - b.1.time_us <= a.1.time_us - time_us {
                            Some(b)
                        } else {
                            Some(a)
                        }
                    }
                    (b, a) => b.or(a),
                },
            };
            self.cursors[index] = chosen.map_or(track.samples.len(), |(i, _)| i);
        }
        Ok(())
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Scripted behaviour of a [`SimulatedDecoder`]
#[derive(Debug, Clone)]
pub struct DecoderScript {
    /// Number of input buffer slots
    pub input_slots: usize,
    /// Output format announced before the first buffer; derived from the input format when unset
    pub output_format: Option<MediaFormat>,
    /// Fail `dequeue_output_buffer` once this many buffers have been produced
    pub fail_after_outputs: Option<usize>,
    /// Reject `configure`
    pub fail_configure: bool,
}

impl Default for DecoderScript {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_format: None,
            fail_after_outputs: None,
            fail_configure: false,
        }
    }
}

/// What a simulated decoder observed
#[derive(Debug, Clone, Default)]
pub struct DecoderLog {
    /// Presentation time and flags of every queued input buffer
    pub queued_inputs: Vec<(i64, BufferFlags)>,
    /// Presentation time and render request of every released output buffer
    pub released_outputs: Vec<(i64, RenderRequest)>,
    /// Number of flushes
    pub flushes: usize,
    /// Number of starts
    pub starts: usize,
    /// Whether release was called
    pub released: bool,
    /// Surface passed to the last `configure`
    pub surface: Option<DisplaySurface>,
}

/// Shared view of a simulated decoder's log
#[derive(Debug, Clone, Default)]
pub struct SimulatedDecoderHandle {
    log: Arc<Mutex<DecoderLog>>,
}

impl SimulatedDecoderHandle {
    /// Snapshot of the log
    pub fn log(&self) -> DecoderLog {
        self.log.lock().clone()
    }

    /// Presentation times of queued inputs, end-of-stream markers excluded
    pub fn queued_input_times(&self) -> Vec<i64> {
        self.log
            .lock()
            .queued_inputs
            .iter()
            .filter(|(_, flags)| !flags.is_end_of_stream())
            .map(|(pts, _)| *pts)
            .collect()
    }

    /// Presentation times of released outputs
    pub fn released_output_times(&self) -> Vec<i64> {
        self.log
            .lock()
            .released_outputs
            .iter()
            .map(|(pts, _)| *pts)
            .collect()
    }
}

struct PendingInput {
    slot: usize,
    size: usize,
    presentation_time_us: i64,
    flags: BufferFlags,
}

/// Passthrough decoder: every input buffer comes back out unchanged
pub struct SimulatedDecoder {
    script: DecoderScript,
    log: Arc<Mutex<DecoderLog>>,
    output_format: Option<MediaFormat>,
    started: bool,
    format_change_pending: bool,
    slots: Vec<Vec<u8>>,
    free_slots: VecDeque<usize>,
    pending: VecDeque<PendingInput>,
    outputs: HashMap<usize, (i64, usize)>,
    outputs_produced: usize,
}

impl SimulatedDecoder {
    /// Create a decoder following `script`
    pub fn new(script: DecoderScript) -> Self {
        let slots = script.input_slots.max(1);
        Self {
            script,
            log: Arc::new(Mutex::new(DecoderLog::default())),
            output_format: None,
            started: false,
            format_change_pending: false,
            slots: vec![Vec::new(); slots],
            free_slots: (0..slots).collect(),
            pending: VecDeque::new(),
            outputs: HashMap::new(),
            outputs_produced: 0,
        }
    }

    /// Handle onto this decoder's log
    pub fn handle(&self) -> SimulatedDecoderHandle {
        SimulatedDecoderHandle {
            log: Arc::clone(&self.log),
        }
    }

    fn ensure_started(&self) -> PlayerResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(PlayerError::MediaProcessing {
                reason: "decoder not started".to_string(),
            })
        }
    }

    fn reset_slots(&mut self) {
        self.pending.clear();
        self.outputs.clear();
        self.free_slots = (0..self.slots.len()).collect();
    }
}

fn raw_output_format(format: &MediaFormat) -> MediaFormat {
    match format.kind() {
        TrackKind::Audio => MediaFormat::audio(
            MIME_AUDIO_RAW,
            format.sample_rate().max(0) as u32,
            format.channel_count().max(0) as u16,
        ),
        TrackKind::Video => MediaFormat::video(
            MIME_VIDEO_RAW,
            format.integer_or_zero(syncplayer_core::keys::WIDTH).max(0) as u32,
            format.integer_or_zero(syncplayer_core::keys::HEIGHT).max(0) as u32,
        ),
        TrackKind::Other => MediaFormat::new(format.mime()),
    }
}

impl Decoder for SimulatedDecoder {
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<DisplaySurface>,
    ) -> PlayerResult<()> {
        self.log.lock().surface = surface;
        if self.script.fail_configure {
            return Err(PlayerError::MediaProcessing {
                reason: format!("unsupported format {}", format),
            });
        }
        self.output_format = Some(
            self.script
                .output_format
                .clone()
                .unwrap_or_else(|| raw_output_format(format)),
        );
        self.format_change_pending = true;
        Ok(())
    }

    fn start(&mut self) -> PlayerResult<()> {
        if self.output_format.is_none() {
            return Err(PlayerError::MediaProcessing {
                reason: "decoder not configured".to_string(),
            });
        }
        self.started = true;
        self.log.lock().starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> PlayerResult<()> {
        self.started = false;
        self.reset_slots();
        Ok(())
    }

    fn flush(&mut self) -> PlayerResult<()> {
        self.reset_slots();
        self.log.lock().flushes += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.reset_slots();
        self.log.lock().released = true;
    }

    fn dequeue_input_buffer(&mut self) -> PlayerResult<Option<usize>> {
        self.ensure_started()?;
        Ok(self.free_slots.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> PlayerResult<&mut Vec<u8>> {
        self.slots
            .get_mut(index)
            .ok_or_else(|| PlayerError::MediaProcessing {
                reason: format!("no input slot {}", index),
            })
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> PlayerResult<()> {
        self.ensure_started()?;
        if index >= self.slots.len() {
            return Err(PlayerError::MediaProcessing {
                reason: format!("no input slot {}", index),
            });
        }
        self.log
            .lock()
            .queued_inputs
            .push((presentation_time_us, flags));
        self.pending.push_back(PendingInput {
            slot: index,
            size,
            presentation_time_us,
            flags,
        });
        Ok(())
    }

    fn dequeue_output_buffer(&mut self) -> PlayerResult<OutputEvent> {
        self.ensure_started()?;
        if self.format_change_pending {
            if let Some(format) = self.output_format.clone() {
                self.format_change_pending = false;
                return Ok(OutputEvent::FormatChanged(format));
            }
        }
        if let Some(limit) = self.script.fail_after_outputs {
            if self.outputs_produced >= limit && !self.pending.is_empty() {
                return Err(PlayerError::Decoder {
                    track: 0,
                    reason: "simulated decode failure".to_string(),
                });
            }
        }
        let Some(input) = self.pending.pop_front() else {
            return Ok(OutputEvent::TryAgainLater);
        };
        self.outputs_produced += 1;
        self.outputs
            .insert(input.slot, (input.presentation_time_us, input.size));
        Ok(OutputEvent::Buffer {
            index: input.slot,
            info: BufferInfo {
                offset: 0,
                size: input.size,
                presentation_time_us: input.presentation_time_us,
                flags: input.flags,
            },
        })
    }

    fn output_buffer(&self, index: usize) -> PlayerResult<&[u8]> {
        let (_, size) = self
            .outputs
            .get(&index)
            .ok_or_else(|| PlayerError::MediaProcessing {
                reason: format!("output buffer {} not dequeued", index),
            })?;
        let slot = &self.slots[index];
        Ok(&slot[..(*size).min(slot.len())])
    }

    fn release_output_buffer(&mut self, index: usize, request: RenderRequest) -> PlayerResult<()> {
        let (presentation_time_us, _) =
            self.outputs
                .remove(&index)
                .ok_or_else(|| PlayerError::MediaProcessing {
                    reason: format!("output buffer {} not dequeued", index),
                })?;
        self.log
            .lock()
            .released_outputs
            .push((presentation_time_us, request));
        self.free_slots.push_back(index);
        Ok(())
    }
}

// ============================================================================
// Audio output
// ============================================================================

#[derive(Debug)]
struct AudioOutputState {
    sample_rate: u32,
    channel_count: u16,
    capacity_bytes: usize,
    buffered_bytes: usize,
    head_frames: i64,
    play_state: AudioPlayState,
    timestamp: Option<AudioTimestamp>,
    latency_ms: Option<u32>,
    written: Vec<u8>,
    total_written_bytes: u64,
    fail_writes: bool,
    released: bool,
    real_time: bool,
    playing_since: Option<Instant>,
    head_at_resume: i64,
}

impl AudioOutputState {
    fn frame_bytes(&self) -> usize {
        bytes_per_frame(self.channel_count)
    }

    fn consume_frames(&mut self, frames: i64) {
        let available = (self.buffered_bytes / self.frame_bytes()) as i64;
        let frames = frames.clamp(0, available);
        self.head_frames += frames;
        self.buffered_bytes -= frames as usize * self.frame_bytes();
    }

    /// Let a real-time device consume what it would have played by now
    fn catch_up(&mut self) {
        if !self.real_time || self.play_state != AudioPlayState::Playing {
            return;
        }
        let Some(since) = self.playing_since else {
            return;
        };
        let elapsed_us = since.elapsed().as_micros() as i64;
        let target = self.head_at_resume + elapsed_us * i64::from(self.sample_rate) / time::US_PER_S;
        let due = target - self.head_frames;
        self.consume_frames(due);
        if self.buffered_bytes < self.frame_bytes() && self.head_frames < target {
            // Underrun: the device restarts from what it has.
            self.head_at_resume = self.head_frames;
            self.playing_since = Some(Instant::now());
        }
    }
}

/// Shared control and observation handle of a [`SimulatedAudioOutput`]
#[derive(Debug, Clone)]
pub struct SimulatedAudioHandle {
    state: Arc<Mutex<AudioOutputState>>,
}

impl SimulatedAudioHandle {
    /// Let the device play `frames` buffered frames
    pub fn consume_frames(&self, frames: i64) {
        self.state.lock().consume_frames(frames);
    }

    /// Change the device buffer size
    pub fn set_capacity(&self, capacity_bytes: usize) {
        self.state.lock().capacity_bytes = capacity_bytes;
    }

    /// Report a hardware timestamp
    pub fn set_timestamp(&self, timestamp: Option<AudioTimestamp>) {
        self.state.lock().timestamp = timestamp;
    }

    /// Report an output latency
    pub fn set_latency_ms(&self, latency_ms: Option<u32>) {
        self.state.lock().latency_ms = latency_ms;
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Current play state
    pub fn play_state(&self) -> AudioPlayState {
        self.state.lock().play_state
    }

    /// Frames played
    pub fn head_position(&self) -> i64 {
        let mut state = self.state.lock();
        state.catch_up();
        state.head_frames
    }

    /// Bytes accepted but not yet played
    pub fn buffered_bytes(&self) -> usize {
        self.state.lock().buffered_bytes
    }

    /// Every byte accepted, in order; only recorded by manual outputs
    pub fn written_data(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Total bytes accepted
    pub fn total_written_bytes(&self) -> u64 {
        self.state.lock().total_written_bytes
    }

    /// Whether release was called
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    /// Output channel count
    pub fn channel_count(&self) -> u16 {
        self.state.lock().channel_count
    }
}

/// Audio output with a bounded device buffer
#[derive(Debug)]
pub struct SimulatedAudioOutput {
    state: Arc<Mutex<AudioOutputState>>,
}

impl SimulatedAudioOutput {
    fn with_mode(sample_rate: u32, channel_count: u16, capacity_bytes: usize, real_time: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(AudioOutputState {
                sample_rate,
                channel_count,
                capacity_bytes,
                buffered_bytes: 0,
                head_frames: 0,
                play_state: AudioPlayState::Stopped,
                timestamp: None,
                latency_ms: None,
                written: Vec::new(),
                total_written_bytes: 0,
                fail_writes: false,
                released: false,
                real_time,
                playing_since: None,
                head_at_resume: 0,
            })),
        }
    }

    /// Output whose device only plays when told to through its handle
    pub fn manual(sample_rate: u32, channel_count: u16, capacity_bytes: usize) -> Self {
        Self::with_mode(sample_rate, channel_count, capacity_bytes, false)
    }

    /// Output whose device plays at the sample rate while playing
    pub fn real_time(sample_rate: u32, channel_count: u16, capacity_bytes: usize) -> Self {
        Self::with_mode(sample_rate, channel_count, capacity_bytes, true)
    }

    /// Control and observation handle
    pub fn handle(&self) -> SimulatedAudioHandle {
        SimulatedAudioHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl AudioOutput for SimulatedAudioOutput {
    fn write_non_blocking(&mut self, data: &[u8], _timestamp_ns: i64) -> PlayerResult<usize> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(PlayerError::AudioOutput {
                reason: "simulated write failure".to_string(),
            });
        }
        state.catch_up();
        let free = state.capacity_bytes.saturating_sub(state.buffered_bytes);
        let accepted = free.min(data.len());
        state.buffered_bytes += accepted;
        state.total_written_bytes += accepted as u64;
        if !state.real_time {
            state.written.extend_from_slice(&data[..accepted]);
        }
        Ok(accepted)
    }

    fn play(&mut self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        if state.play_state != AudioPlayState::Playing {
            state.play_state = AudioPlayState::Playing;
            state.playing_since = Some(Instant::now());
            state.head_at_resume = state.head_frames;
        }
        Ok(())
    }

    fn pause(&mut self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        state.catch_up();
        state.play_state = AudioPlayState::Paused;
        state.playing_since = None;
        Ok(())
    }

    fn stop(&mut self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        state.catch_up();
        state.play_state = AudioPlayState::Stopped;
        state.playing_since = None;
        Ok(())
    }

    fn flush(&mut self) -> PlayerResult<()> {
        self.state.lock().buffered_bytes = 0;
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.released = true;
        state.play_state = AudioPlayState::Stopped;
        state.playing_since = None;
    }

    fn play_state(&self) -> AudioPlayState {
        self.state.lock().play_state
    }

    fn playback_head_position(&self) -> i64 {
        let mut state = self.state.lock();
        state.catch_up();
        state.head_frames
    }

    fn timestamp(&self) -> Option<AudioTimestamp> {
        self.state.lock().timestamp
    }

    fn latency_ms(&self) -> Option<u32> {
        self.state.lock().latency_ms
    }
}

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioMode {
    Manual,
    RealTime,
    #[cfg(feature = "cpal-output")]
    Device,
}

struct PlatformInner {
    containers: HashMap<String, SimulatedContainer>,
    unsupported_mimes: HashSet<String>,
    scripts: HashMap<String, DecoderScript>,
    decoders: Vec<(String, SimulatedDecoderHandle)>,
    audio_outputs: Vec<SimulatedAudioHandle>,
    audio_mode: AudioMode,
    audio_capacity_bytes: usize,
}

/// [`MediaPlatform`] over simulated collaborators
pub struct SimulatedPlatform {
    inner: Mutex<PlatformInner>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    /// Platform with real-time audio outputs and a 32 KiB device buffer
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PlatformInner {
                containers: HashMap::new(),
                unsupported_mimes: HashSet::new(),
                scripts: HashMap::new(),
                decoders: Vec::new(),
                audio_outputs: Vec::new(),
                audio_mode: AudioMode::RealTime,
                audio_capacity_bytes: 32 * 1024,
            }),
        }
    }

    /// Serve `container` under `path`
    pub fn with_container(self, path: &str, container: SimulatedContainer) -> Self {
        self.inner
            .lock()
            .containers
            .insert(path.to_string(), container);
        self
    }

    /// Report no decoder for `mime`
    pub fn without_decoder(self, mime: &str) -> Self {
        self.inner.lock().unsupported_mimes.insert(mime.to_string());
        self
    }

    /// Script decoders created for `mime`
    pub fn with_decoder_script(self, mime: &str, script: DecoderScript) -> Self {
        self.inner.lock().scripts.insert(mime.to_string(), script);
        self
    }

    /// Audio outputs only play when driven through their handles
    pub fn with_manual_audio(self, capacity_bytes: usize) -> Self {
        {
            let mut inner = self.inner.lock();
            inner.audio_mode = AudioMode::Manual;
            inner.audio_capacity_bytes = capacity_bytes;
        }
        self
    }

    /// Audio is played on the host's default output device
    #[cfg(feature = "cpal-output")]
    pub fn with_device_audio(self) -> Self {
        self.inner.lock().audio_mode = AudioMode::Device;
        self
    }

    /// Handles of every decoder created for `mime`
    pub fn decoders_for(&self, mime: &str) -> Vec<SimulatedDecoderHandle> {
        self.inner
            .lock()
            .decoders
            .iter()
            .filter(|(decoder_mime, _)| decoder_mime == mime)
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Handles of every audio output opened so far
    pub fn audio_outputs(&self) -> Vec<SimulatedAudioHandle> {
        self.inner.lock().audio_outputs.clone()
    }
}

impl MediaPlatform for SimulatedPlatform {
    fn open_demuxer(&self, source: &str) -> PlayerResult<Box<dyn Demuxer>> {
        let container = self
            .inner
            .lock()
            .containers
            .get(source)
            .cloned()
            .ok_or_else(|| PlayerError::DataSource {
                path: source.to_string(),
                reason: "no such container".to_string(),
            })?;
        Ok(Box::new(SimulatedDemuxer::new(container)))
    }

    fn create_decoder(&self, mime: &str) -> Option<Box<dyn Decoder>> {
        let mut inner = self.inner.lock();
        if inner.unsupported_mimes.contains(mime) {
            return None;
        }
        let script = inner.scripts.get(mime).cloned().unwrap_or_default();
        let decoder = SimulatedDecoder::new(script);
        inner.decoders.push((mime.to_string(), decoder.handle()));
        Some(Box::new(decoder))
    }

    fn open_audio_output(
        &self,
        sample_rate: u32,
        channel_count: u16,
    ) -> PlayerResult<Box<dyn AudioOutput>> {
        let mut inner = self.inner.lock();
        let capacity = inner.audio_capacity_bytes;
        let output = match inner.audio_mode {
            AudioMode::Manual => SimulatedAudioOutput::manual(sample_rate, channel_count, capacity),
            AudioMode::RealTime => {
                SimulatedAudioOutput::real_time(sample_rate, channel_count, capacity)
            }
            #[cfg(feature = "cpal-output")]
            AudioMode::Device => {
                let output = crate::cpal_output::CpalAudioOutput::open_default(
                    sample_rate,
                    channel_count,
                )?;
                return Ok(Box::new(output));
            }
        };
        inner.audio_outputs.push(output.handle());
        Ok(Box::new(output))
    }
}

// ============================================================================
// Vsync and clock
// ============================================================================

/// Vsync source whose callbacks run only when [`fire`](Self::fire) is called
pub struct ManualVsyncSource {
    refresh_rate: Option<f64>,
    pending: Mutex<Vec<VsyncCallback>>,
    last_delay: Mutex<Option<Duration>>,
}

impl ManualVsyncSource {
    /// Source reporting `refresh_rate`
    pub fn new(refresh_rate: Option<f64>) -> Self {
        Self {
            refresh_rate,
            pending: Mutex::new(Vec::new()),
            last_delay: Mutex::new(None),
        }
    }

    /// Deliver a vsync at `vsync_time_ns` to every pending callback
    pub fn fire(&self, vsync_time_ns: i64) {
        for callback in self.take_pending() {
            callback(vsync_time_ns);
        }
    }

    /// Remove the pending callbacks without running them
    pub fn take_pending(&self) -> Vec<VsyncCallback> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of callbacks waiting for a vsync
    pub fn pending_callbacks(&self) -> usize {
        self.pending.lock().len()
    }

    /// Delay requested by the latest post
    pub fn last_delay(&self) -> Option<Duration> {
        *self.last_delay.lock()
    }
}

impl VsyncSource for ManualVsyncSource {
    fn post_frame_callback(&self, callback: VsyncCallback, delay: Duration) {
        self.pending.lock().push(callback);
        *self.last_delay.lock() = Some(delay);
    }

    fn remove_frame_callbacks(&self) {
        self.pending.lock().clear();
    }

    fn refresh_rate(&self) -> Option<f64> {
        self.refresh_rate
    }
}

/// Media clock with every reading set by hand
#[derive(Debug, Clone, Default)]
pub struct ScriptedClock {
    /// Value returned by `now_us`
    pub now_us: i64,
    /// Value returned by `monotonic_now_us`
    pub monotonic_now_us: i64,
    /// Added to a media time to obtain its real release time
    pub real_time_offset_us: i64,
    /// Display vsync period
    pub vsync_duration_ns: i64,
}

impl MediaTimeProvider for ScriptedClock {
    fn now_us(&mut self) -> i64 {
        self.now_us
    }

    fn real_time_us_for_media_time(&mut self, media_time_us: i64) -> i64 {
        media_time_us + self.real_time_offset_us
    }

    fn vsync_duration_ns(&self) -> i64 {
        self.vsync_duration_ns
    }

    fn monotonic_now_us(&self) -> i64 {
        self.monotonic_now_us
    }
}
