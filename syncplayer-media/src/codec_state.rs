//! Per-track decode session
//!
//! A [`CodecState`] moves one demuxed track through its decoder in small,
//! non-blocking steps. Where decoded output goes is decided by its
//! [`OutputSink`]: [`PcmSink`] queues audio into a [`NonBlockingAudioSink`],
//! [`SurfaceSink`] schedules video frames for display against a
//! [`MediaTimeProvider`].

use crate::audio_sink::NonBlockingAudioSink;
use crate::clock::MediaTimeProvider;
use crate::error::{MediaError, MediaResult};
use crate::stats::SyncStats;
use crate::tuning::SyncTuning;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use syncplayer_core::{
    keys, time, AudioPlayState, BufferFlags, BufferInfo, Decoder, Demuxer, MediaFormat,
    MediaPlatform, OutputEvent, PlayerResult, RenderRequest, TrackKind,
};
use tracing::{debug, info, warn};

/// Outcome of offering the head output buffer to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The buffer went back to the decoder; move on to the next one
    Released,
    /// The buffer must stay at the head and be offered again later
    Deferred,
}

/// Destination of a track's decoded output
pub trait OutputSink: Send {
    /// Media type this sink consumes
    const KIND: TrackKind;

    /// Create the sink for a newly added track
    fn for_track(platform: Arc<dyn MediaPlatform>) -> Self;

    /// Whether input timestamps are rebased so that the first sample is at zero
    fn normalizes_timestamps(&self) -> bool {
        false
    }

    /// Decoded bytes waiting downstream, used for input back-pressure
    fn queued_bytes(&self) -> usize {
        0
    }

    /// React to a decoder output format change
    fn on_output_format_changed(
        &mut self,
        format: &MediaFormat,
        tuning: &SyncTuning,
    ) -> PlayerResult<()>;

    /// Consume or schedule the output buffer at the head of the queue
    fn drain(
        &mut self,
        decoder: &mut dyn Decoder,
        index: usize,
        info: &BufferInfo,
        clock: &mut dyn MediaTimeProvider,
        tuning: &SyncTuning,
        stats: &mut SyncStats,
    ) -> PlayerResult<DrainOutcome>;

    /// Decoding (re)started
    fn start(&mut self) -> PlayerResult<()> {
        Ok(())
    }

    /// Decoding paused
    fn pause(&mut self) -> PlayerResult<()> {
        Ok(())
    }

    /// Decode pipeline flushed
    fn flush(&mut self) -> PlayerResult<()> {
        Ok(())
    }

    /// Drain downstream queues; returns bytes delivered
    fn process(&mut self) -> PlayerResult<usize> {
        Ok(0)
    }

    /// Playback clock of the sink, when it has one
    fn audio_time_us(&mut self) -> Option<i64> {
        None
    }

    /// Free downstream resources
    fn release(&mut self) {}
}

/// Audio output strategy: decoded PCM goes through a non-blocking sink
pub struct PcmSink {
    platform: Arc<dyn MediaPlatform>,
    sink: Option<NonBlockingAudioSink>,
}

impl PcmSink {
    /// The audio sink, once the decoder has reported a usable format
    pub fn audio_sink(&self) -> Option<&NonBlockingAudioSink> {
        self.sink.as_ref()
    }
}

impl fmt::Debug for PcmSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmSink").field("sink", &self.sink).finish()
    }
}

impl OutputSink for PcmSink {
    const KIND: TrackKind = TrackKind::Audio;

    fn for_track(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            platform,
            sink: None,
        }
    }

    fn queued_bytes(&self) -> usize {
        self.sink.as_ref().map_or(0, NonBlockingAudioSink::queued_bytes)
    }

    fn on_output_format_changed(
        &mut self,
        format: &MediaFormat,
        tuning: &SyncTuning,
    ) -> PlayerResult<()> {
        let sample_rate = format.sample_rate();
        let channel_count = format.channel_count();
        info!(sample_rate, channel_count, "Audio output format changed");

        // Some demuxers report zero channels or a zero rate; such output stays silent.
        if !tuning.accepts_audio_format(sample_rate, channel_count) {
            let error = MediaError::InvalidAudioFormat {
                sample_rate,
                channels: channel_count,
            };
            warn!(%error, "Skipping audio sink creation");
            return Ok(());
        }

        if let Some(mut previous) = self.sink.take() {
            previous.release();
        }
        let output = self
            .platform
            .open_audio_output(sample_rate as u32, channel_count as u16)?;
        let mut sink = NonBlockingAudioSink::new(
            output,
            sample_rate as u32,
            channel_count as u16,
            tuning.audio_timestamp_resample,
        );
        sink.play()?;
        self.sink = Some(sink);
        Ok(())
    }

    fn drain(
        &mut self,
        decoder: &mut dyn Decoder,
        index: usize,
        info: &BufferInfo,
        _clock: &mut dyn MediaTimeProvider,
        _tuning: &SyncTuning,
        stats: &mut SyncStats,
    ) -> PlayerResult<DrainOutcome> {
        if let Some(sink) = self.sink.as_mut() {
            let data = decoder.output_buffer(index)?;
            let end = info.offset.saturating_add(info.size).min(data.len());
            let start = info.offset.min(end);
            sink.write(
                Bytes::copy_from_slice(&data[start..end]),
                time::us_to_ns(info.presentation_time_us),
            );
            stats.audio_buffers_queued += 1;
        }
        decoder.release_output_buffer(index, RenderRequest::Discard)?;
        Ok(DrainOutcome::Released)
    }

    fn start(&mut self) -> PlayerResult<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.play(),
            None => Ok(()),
        }
    }

    fn pause(&mut self) -> PlayerResult<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.pause(),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> PlayerResult<()> {
        match self.sink.as_mut() {
            Some(sink) if sink.play_state() != AudioPlayState::Playing => sink.flush(),
            _ => Ok(()),
        }
    }

    fn process(&mut self) -> PlayerResult<usize> {
        match self.sink.as_mut() {
            Some(sink) => sink.process(),
            None => Ok(0),
        }
    }

    fn audio_time_us(&mut self) -> Option<i64> {
        self.sink.as_mut().map(NonBlockingAudioSink::audio_time_us)
    }

    fn release(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.release();
        }
    }
}

/// Video output strategy: frames are released to the display surface at their real time
#[derive(Debug, Default)]
pub struct SurfaceSink {
    width: i64,
    height: i64,
}

impl SurfaceSink {
    /// Output frame size reported by the decoder, zero until known
    pub fn dimensions(&self) -> (i64, i64) {
        (self.width, self.height)
    }
}

impl OutputSink for SurfaceSink {
    const KIND: TrackKind = TrackKind::Video;

    fn for_track(_platform: Arc<dyn MediaPlatform>) -> Self {
        Self::default()
    }

    fn normalizes_timestamps(&self) -> bool {
        true
    }

    fn on_output_format_changed(
        &mut self,
        format: &MediaFormat,
        _tuning: &SyncTuning,
    ) -> PlayerResult<()> {
        self.width = format.integer_or_zero(keys::WIDTH);
        self.height = format.integer_or_zero(keys::HEIGHT);
        info!(width = self.width, height = self.height, "Video output format changed");
        Ok(())
    }

    fn drain(
        &mut self,
        decoder: &mut dyn Decoder,
        index: usize,
        info: &BufferInfo,
        clock: &mut dyn MediaTimeProvider,
        tuning: &SyncTuning,
        stats: &mut SyncStats,
    ) -> PlayerResult<DrainOutcome> {
        let early_threshold_us =
            tuning.early_release_vsyncs * time::ns_to_us(clock.vsync_duration_ns());
        let real_time_us = clock.real_time_us_for_media_time(info.presentation_time_us);
        let late_us = clock.monotonic_now_us() - real_time_us;

        if late_us < -early_threshold_us {
            stats.early_deferrals += 1;
            return Ok(DrainOutcome::Deferred);
        }
        if late_us > tuning.late_render_threshold_us {
            debug!(
                late_us,
                pts_us = info.presentation_time_us,
                "Video frame late, rendering anyway"
            );
            stats.late_frames += 1;
        }

        decoder.release_output_buffer(index, RenderRequest::RenderAt(time::us_to_ns(real_time_us)))?;
        stats.frames_rendered += 1;
        Ok(DrainOutcome::Released)
    }
}

/// Decode session of one track
pub struct CodecState<S: OutputSink> {
    track_index: usize,
    format: MediaFormat,
    decoder: Box<dyn Decoder>,
    sink: S,
    tuning: SyncTuning,
    started: bool,
    available_input_buffers: VecDeque<usize>,
    available_output_buffers: VecDeque<(usize, BufferInfo)>,
    presentation_time_us: i64,
    sample_base_time_us: Option<i64>,
    saw_input_eos: bool,
    saw_output_eos: bool,
    output_format: Option<MediaFormat>,
    stats: SyncStats,
}

impl<S: OutputSink> CodecState<S> {
    /// Wrap a configured decoder for `track_index`
    pub fn new(
        track_index: usize,
        format: MediaFormat,
        decoder: Box<dyn Decoder>,
        sink: S,
        tuning: SyncTuning,
    ) -> Self {
        Self {
            track_index,
            format,
            decoder,
            sink,
            tuning,
            started: false,
            available_input_buffers: VecDeque::new(),
            available_output_buffers: VecDeque::new(),
            presentation_time_us: 0,
            sample_base_time_us: None,
            saw_input_eos: false,
            saw_output_eos: false,
            output_format: None,
            stats: SyncStats::default(),
        }
    }

    /// Start the decoder (once) and resume the sink
    pub fn start(&mut self) -> MediaResult<()> {
        if !self.started {
            self.decoder.start().map_err(|e| self.track_error(e))?;
            self.started = true;
        }
        self.sink.start().map_err(|e| self.track_error(e))
    }

    /// One non-blocking decode step: feed what input we can, drain what output is ready
    pub fn do_some_work(
        &mut self,
        demuxer: &mut dyn Demuxer,
        clock: &mut dyn MediaTimeProvider,
    ) -> MediaResult<()> {
        self.work(demuxer, clock).map_err(|e| self.track_error(e))
    }

    fn work(
        &mut self,
        demuxer: &mut dyn Demuxer,
        clock: &mut dyn MediaTimeProvider,
    ) -> PlayerResult<()> {
        if let Some(index) = self.decoder.dequeue_input_buffer()? {
            self.available_input_buffers.push_back(index);
        }
        while self.feed_input_buffer(demuxer)? {}

        match self.decoder.dequeue_output_buffer()? {
            OutputEvent::Buffer { index, info } => {
                self.available_output_buffers.push_back((index, info));
            }
            OutputEvent::FormatChanged(format) => {
                debug!(track = self.track_index, %format, "Output format changed");
                self.sink.on_output_format_changed(&format, &self.tuning)?;
                self.output_format = Some(format);
            }
            OutputEvent::BuffersChanged | OutputEvent::TryAgainLater => {}
        }
        while self.drain_output_buffer(clock)? {}
        Ok(())
    }

    /// Returns true if more input could be fed
    fn feed_input_buffer(&mut self, demuxer: &mut dyn Demuxer) -> PlayerResult<bool> {
        if self.saw_input_eos {
            return Ok(false);
        }
        let Some(&index) = self.available_input_buffers.front() else {
            return Ok(false);
        };
        // Bound memory while the audio output cannot keep up.
        if self.sink.queued_bytes() > self.tuning.max_queued_audio_bytes {
            return Ok(false);
        }

        match demuxer.sample_track_index() {
            Some(track) if track == self.track_index => {
                let size = {
                    let input = self.decoder.input_buffer(index)?;
                    demuxer.read_sample_data(input).unwrap_or(0)
                };
                let mut sample_time_us = demuxer.sample_time_us().unwrap_or(0);
                let flags = demuxer.sample_flags();
                if size == 0 {
                    debug!(
                        track = self.track_index,
                        sample_time_us, "Empty sample, treating as end of input"
                    );
                    self.queue_end_of_stream(index)?;
                    return Ok(false);
                }

                if self.sink.normalizes_timestamps() {
                    let base = *self.sample_base_time_us.get_or_insert(sample_time_us);
                    sample_time_us -= base;
                }

                self.decoder.queue_input_buffer(
                    index,
                    size,
                    sample_time_us,
                    flags.difference(BufferFlags::END_OF_STREAM),
                )?;
                self.available_input_buffers.pop_front();
                demuxer.advance();
                Ok(true)
            }
            None => {
                debug!(track = self.track_index, "Saw input EOS");
                self.queue_end_of_stream(index)?;
                Ok(false)
            }
            // Another selected track's sample is next; its own state will consume it.
            Some(_) => Ok(false),
        }
    }

    fn queue_end_of_stream(&mut self, index: usize) -> PlayerResult<()> {
        self.saw_input_eos = true;
        self.decoder
            .queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)?;
        self.available_input_buffers.pop_front();
        Ok(())
    }

    /// Returns true if more output could be drained
    fn drain_output_buffer(&mut self, clock: &mut dyn MediaTimeProvider) -> PlayerResult<bool> {
        if self.saw_output_eos {
            return Ok(false);
        }
        let Some(&(index, info)) = self.available_output_buffers.front() else {
            return Ok(false);
        };

        if info.is_end_of_stream() {
            debug!(track = self.track_index, "Saw output EOS");
            self.saw_output_eos = true;
            self.available_output_buffers.pop_front();
            self.decoder
                .release_output_buffer(index, RenderRequest::Discard)?;
            return Ok(false);
        }

        let outcome = self.sink.drain(
            self.decoder.as_mut(),
            index,
            &info,
            clock,
            &self.tuning,
            &mut self.stats,
        )?;
        match outcome {
            DrainOutcome::Released => {
                self.presentation_time_us = info.presentation_time_us;
                self.available_output_buffers.pop_front();
                Ok(true)
            }
            DrainOutcome::Deferred => Ok(false),
        }
    }

    /// Pause the sink; the decoder itself has no paused state
    pub fn pause(&mut self) -> MediaResult<()> {
        self.sink.pause().map_err(|e| self.track_error(e))
    }

    /// Drop all in-flight buffers and end-of-stream state
    pub fn flush(&mut self) -> MediaResult<()> {
        self.available_input_buffers.clear();
        self.available_output_buffers.clear();
        self.saw_input_eos = false;
        self.saw_output_eos = false;
        self.sink.flush().map_err(|e| self.track_error(e))?;
        self.decoder.flush().map_err(|e| self.track_error(e))
    }

    /// Flush and rewind the reported position to `position_us`
    pub fn seek_to(&mut self, position_us: i64) -> MediaResult<()> {
        self.flush()?;
        self.presentation_time_us = position_us;
        Ok(())
    }

    /// Drain the sink's queue into the output
    pub fn process(&mut self) -> MediaResult<()> {
        let written = self.sink.process().map_err(|e| self.track_error(e))?;
        self.stats.audio_bytes_written += written as u64;
        Ok(())
    }

    /// Stop and free the decoder and sink
    pub fn release(&mut self) {
        if self.started {
            if let Err(error) = self.decoder.stop() {
                warn!(track = self.track_index, %error, "Decoder stop failed");
            }
            self.started = false;
        }
        self.available_input_buffers.clear();
        self.available_output_buffers.clear();
        self.decoder.release();
        self.sink.release();
    }

    /// Both input and output end of stream observed
    pub fn is_ended(&self) -> bool {
        self.saw_input_eos && self.saw_output_eos
    }

    /// Presentation time of the last released buffer
    pub fn current_position_us(&self) -> i64 {
        self.presentation_time_us
    }

    /// Sink playback clock, if this track has one
    pub fn audio_time_us(&mut self) -> Option<i64> {
        self.sink.audio_time_us()
    }

    /// Offset subtracted from input timestamps, once the first sample was seen
    pub fn sample_base_time_us(&self) -> Option<i64> {
        self.sample_base_time_us
    }

    /// Container track index
    pub fn track_index(&self) -> usize {
        self.track_index
    }

    /// Track format reported by the demuxer
    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    /// Latest decoder output format
    pub fn output_format(&self) -> Option<&MediaFormat> {
        self.output_format.as_ref()
    }

    /// Output strategy
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Counters accumulated by this track
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    fn track_error(&self, error: syncplayer_core::PlayerError) -> MediaError {
        MediaError::track(self.track_index, S::KIND, error)
    }
}

impl<S: OutputSink + fmt::Debug> fmt::Debug for CodecState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecState")
            .field("track_index", &self.track_index)
            .field("mime", &self.format.mime())
            .field("sink", &self.sink)
            .field("pending_inputs", &self.available_input_buffers.len())
            .field("pending_outputs", &self.available_output_buffers.len())
            .field("position_us", &self.presentation_time_us)
            .field("saw_input_eos", &self.saw_input_eos)
            .field("saw_output_eos", &self.saw_output_eos)
            .finish()
    }
}
