//! Audio and video decoder orchestrators
//!
//! A [`MediaDecoder`] owns one demuxer opened on the media source, selects
//! every track of its media type, and runs one [`CodecState`] per selected
//! track. [`AudioDecoder`] and [`VideoDecoder`] are its two instantiations.

use crate::clock::MediaTimeProvider;
use crate::codec_state::{CodecState, OutputSink, PcmSink, SurfaceSink};
use crate::error::{MediaError, MediaResult};
use crate::stats::SyncStats;
use crate::tuning::SyncTuning;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use syncplayer_core::{
    keys, Demuxer, DisplaySurface, MediaFormat, MediaPlatform, SeekMode, TrackKind,
};
use tracing::{debug, error, info};

/// Decoder for every audio track of a source
pub type AudioDecoder = MediaDecoder<PcmSink>;

/// Decoder for every video track of a source
pub type VideoDecoder = MediaDecoder<SurfaceSink>;

/// Per-media-type decode orchestrator
pub struct MediaDecoder<S: OutputSink> {
    platform: Arc<dyn MediaPlatform>,
    tuning: SyncTuning,
    source: Option<String>,
    demuxer: Option<Box<dyn Demuxer>>,
    states: BTreeMap<usize, CodecState<S>>,
    duration_us: Option<i64>,
    surface: Option<DisplaySurface>,
}

impl<S: OutputSink> MediaDecoder<S> {
    /// Create an unprepared decoder
    pub fn new(platform: Arc<dyn MediaPlatform>, tuning: SyncTuning) -> Self {
        Self {
            platform,
            tuning,
            source: None,
            demuxer: None,
            states: BTreeMap::new(),
            duration_us: None,
            surface: None,
        }
    }

    /// Surface handed to every decoder configured by the next [`prepare`](Self::prepare)
    pub fn set_surface(&mut self, surface: Option<DisplaySurface>) {
        self.surface = surface;
    }

    /// Remember the media source opened by the next [`prepare`](Self::prepare)
    pub fn set_data_source(&mut self, path: &str) {
        self.source = Some(path.to_string());
    }

    /// Open the source, select matching tracks and configure a decoder for each.
    ///
    /// Fails if any selected track cannot get a configured decoder.
    pub fn prepare(&mut self) -> MediaResult<()> {
        let source = self.source.clone().ok_or(MediaError::DataSourceNotSet)?;
        self.release_states();
        self.duration_us = None;

        let mut demuxer = self.platform.open_demuxer(&source)?;
        for index in (0..demuxer.track_count()).rev() {
            let format = demuxer.track_format(index)?;
            if format.kind() != S::KIND {
                continue;
            }
            log_track(index, &format);

            demuxer.select_track(index)?;
            if let Err(e) = self.add_track(index, format.clone()) {
                error!(track = index, error = %e, "Failed to add {} track", S::KIND);
                self.release_states();
                return Err(e);
            }
            if let Some(duration_us) = format.duration_us() {
                if self.duration_us.map_or(true, |current| duration_us > current) {
                    self.duration_us = Some(duration_us);
                }
            }
        }

        info!(
            kind = %S::KIND,
            tracks = self.states.len(),
            duration_us = ?self.duration_us,
            "Decoder prepared"
        );
        self.demuxer = Some(demuxer);
        Ok(())
    }

    fn add_track(&mut self, index: usize, format: MediaFormat) -> MediaResult<()> {
        let mut decoder = self.platform.create_decoder(format.mime()).ok_or_else(|| {
            MediaError::DecoderUnavailable {
                mime: format.mime().to_string(),
            }
        })?;
        decoder
            .configure(&format, self.surface)
            .map_err(|e| MediaError::CodecConfiguration {
                track: index,
                reason: e.to_string(),
            })?;

        let sink = S::for_track(Arc::clone(&self.platform));
        let state = CodecState::new(index, format, decoder, sink, self.tuning.clone());
        self.states.insert(index, state);
        Ok(())
    }

    /// Start every track
    pub fn start(&mut self) -> MediaResult<()> {
        for state in self.states.values_mut() {
            state.start()?;
        }
        Ok(())
    }

    /// One non-blocking decode step on every track
    pub fn do_some_work(&mut self, clock: &mut dyn MediaTimeProvider) -> MediaResult<()> {
        let Some(demuxer) = self.demuxer.as_mut() else {
            return Ok(());
        };
        for state in self.states.values_mut() {
            state.do_some_work(demuxer.as_mut(), clock)?;
        }
        Ok(())
    }

    /// Drain queued audio of every track into its output
    pub fn process(&mut self) -> MediaResult<()> {
        for state in self.states.values_mut() {
            state.process()?;
        }
        Ok(())
    }

    /// Pause every track
    pub fn pause(&mut self) -> MediaResult<()> {
        for state in self.states.values_mut() {
            state.pause()?;
        }
        Ok(())
    }

    /// Flush every track
    pub fn flush(&mut self) -> MediaResult<()> {
        for state in self.states.values_mut() {
            state.flush()?;
        }
        Ok(())
    }

    /// Flush every track and reposition the demuxer near `position_us`.
    ///
    /// `position_us` is on the playback timeline; video tracks map it back to
    /// container time through their sample base time.
    pub fn seek_to(&mut self, position_us: i64) -> MediaResult<()> {
        let Some(demuxer) = self.demuxer.as_mut() else {
            return Ok(());
        };
        let mut base_time_us = 0;
        for state in self.states.values_mut() {
            state.seek_to(position_us)?;
            if let Some(base) = state.sample_base_time_us() {
                base_time_us = base;
            }
        }
        demuxer.seek_to(position_us + base_time_us, SeekMode::PreviousSync)?;
        debug!(kind = %S::KIND, position_us, "Seeked");
        Ok(())
    }

    /// Release every track and close the demuxer
    pub fn release(&mut self) {
        self.release_states();
        self.demuxer = None;
        self.duration_us = None;
    }

    fn release_states(&mut self) {
        for state in self.states.values_mut() {
            state.release();
        }
        self.states.clear();
    }

    /// True when every track has seen end of stream on input and output
    pub fn is_ended(&self) -> bool {
        self.states.values().all(CodecState::is_ended)
    }

    /// Longest declared duration across selected tracks
    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    /// Position of the first track
    pub fn current_position_us(&self) -> i64 {
        self.states
            .values()
            .next()
            .map_or(0, CodecState::current_position_us)
    }

    /// Clock of the first track that owns an audio sink
    pub fn audio_time_us(&mut self) -> Option<i64> {
        self.states
            .values_mut()
            .find_map(|state| state.audio_time_us())
    }

    /// Whether prepare opened the source
    pub fn is_prepared(&self) -> bool {
        self.demuxer.is_some()
    }

    /// Number of selected tracks
    pub fn track_count(&self) -> usize {
        self.states.len()
    }

    /// Decode session of a track
    pub fn track(&self, index: usize) -> Option<&CodecState<S>> {
        self.states.get(&index)
    }

    /// Counters summed over every track
    pub fn stats(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for state in self.states.values() {
            total += state.stats();
        }
        total
    }
}

impl<S: OutputSink> fmt::Debug for MediaDecoder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDecoder")
            .field("kind", &S::KIND)
            .field("source", &self.source)
            .field("tracks", &self.states.keys().collect::<Vec<_>>())
            .field("duration_us", &self.duration_us)
            .finish()
    }
}

impl<S: OutputSink> Drop for MediaDecoder<S> {
    fn drop(&mut self) {
        self.release_states();
    }
}

fn log_track(index: usize, format: &MediaFormat) {
    match format.kind() {
        TrackKind::Audio => debug!(
            track = index,
            %format,
            is_adts = format.integer_or_zero(keys::IS_ADTS),
            sample_rate = format.sample_rate(),
            channel_count = format.channel_count(),
            "Selecting audio track"
        ),
        _ => debug!(
            track = index,
            %format,
            width = format.integer_or_zero(keys::WIDTH),
            height = format.integer_or_zero(keys::HEIGHT),
            "Selecting video track"
        ),
    }
}
