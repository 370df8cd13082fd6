//! Non-blocking PCM sink
//!
//! Decoded audio is queued here and drained into the platform
//! [`AudioOutput`] as capacity allows, so the shared decode thread never waits
//! on hardware. The sink also synthesises the audio clock that paces video.

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use syncplayer_core::{time, AudioOutput, AudioPlayState, AudioTimestamp, PlayerResult};
use tracing::{debug, trace};

/// A PCM buffer waiting to be written to the output
struct QueuedAudioBuffer {
    /// Unwritten remainder of the buffer
    data: Bytes,
    /// Presentation time in nanoseconds
    pts_ns: i64,
}

/// Queue-backed audio sink driven from the polling loop
pub struct NonBlockingAudioSink {
    output: Option<Box<dyn AudioOutput>>,
    sample_rate: i64,
    channel_count: u16,
    queue: VecDeque<QueuedAudioBuffer>,
    queued_bytes: usize,
    total_bytes_written: u64,
    stop_pending: bool,
    latency_us: i64,
    timestamp: Option<AudioTimestamp>,
    last_timestamp_sample_us: Option<i64>,
    timestamp_resample_us: i64,
}

impl NonBlockingAudioSink {
    /// Wrap an opened audio output
    pub fn new(
        output: Box<dyn AudioOutput>,
        sample_rate: u32,
        channel_count: u16,
        timestamp_resample: Duration,
    ) -> Self {
        debug!(sample_rate, channel_count, "Created non-blocking audio sink");
        Self {
            output: Some(output),
            sample_rate: i64::from(sample_rate),
            channel_count,
            queue: VecDeque::new(),
            queued_bytes: 0,
            total_bytes_written: 0,
            stop_pending: false,
            latency_us: 0,
            timestamp: None,
            last_timestamp_sample_us: None,
            timestamp_resample_us: timestamp_resample.as_micros() as i64,
        }
    }

    /// Enqueue a PCM buffer. Never blocks and never writes partially.
    pub fn write(&mut self, data: Bytes, pts_ns: i64) {
        self.queued_bytes += data.len();
        self.queue.push_back(QueuedAudioBuffer { data, pts_ns });
    }

    /// Drain as much of the queue as the output accepts right now.
    ///
    /// Returns the number of bytes the output accepted. A partially accepted
    /// head buffer stays at the head of the queue.
    pub fn process(&mut self) -> PlayerResult<usize> {
        let Some(output) = self.output.as_mut() else {
            return Ok(0);
        };

        let mut written_total = 0;
        while let Some(head) = self.queue.front_mut() {
            if !head.data.is_empty() {
                let written = output
                    .write_non_blocking(&head.data, head.pts_ns)?
                    .min(head.data.len());
                head.data.advance(written);
                self.queued_bytes -= written;
                written_total += written;
            }
            if !head.data.is_empty() {
                break;
            }
            self.queue.pop_front();
        }
        self.total_bytes_written += written_total as u64;

        if self.stop_pending && self.queue.is_empty() {
            debug!("Audio queue drained, performing deferred stop");
            output.stop()?;
            self.queued_bytes = 0;
            self.stop_pending = false;
        }
        Ok(written_total)
    }

    /// Playback clock in microseconds
    pub fn audio_time_us(&mut self) -> i64 {
        self.audio_time_us_at(time::monotonic_now_ns())
    }

    /// Playback clock in microseconds as seen at monotonic time `now_ns`
    pub fn audio_time_us_at(&mut self, now_ns: i64) -> i64 {
        let Some(output) = self.output.as_ref() else {
            return 0;
        };
        if self.sample_rate <= 0 {
            return 0;
        }

        let now_us = time::ns_to_us(now_ns);
        let due = self
            .last_timestamp_sample_us
            .map_or(true, |last| now_us - last >= self.timestamp_resample_us);
        if due {
            self.timestamp = output.timestamp();
            if let Some(latency_ms) = output.latency_ms() {
                self.latency_us = (i64::from(latency_ms) * time::US_PER_MS / 2).max(0);
            }
            self.last_timestamp_sample_us = Some(now_us);
        }

        match self.timestamp {
            Some(timestamp) => {
                let elapsed_us = now_us - time::ns_to_us(timestamp.nano_time);
                let elapsed_frames = elapsed_us * self.sample_rate / time::US_PER_S;
                let frames = timestamp.frame_position + elapsed_frames;
                frames * time::US_PER_S / self.sample_rate
            }
            None => {
                let frames_played = output.playback_head_position();
                frames_played * time::US_PER_S / self.sample_rate - self.latency_us
            }
        }
    }

    /// Start or resume the output
    pub fn play(&mut self) -> PlayerResult<()> {
        self.stop_pending = false;
        match self.output.as_mut() {
            Some(output) => output.play(),
            None => Ok(()),
        }
    }

    /// Pause the output, keeping queued data
    pub fn pause(&mut self) -> PlayerResult<()> {
        match self.output.as_mut() {
            Some(output) => output.pause(),
            None => Ok(()),
        }
    }

    /// Stop now if nothing is queued, otherwise once [`process`](Self::process) drains the queue
    pub fn stop(&mut self) -> PlayerResult<()> {
        if self.queue.is_empty() {
            if let Some(output) = self.output.as_mut() {
                output.stop()?;
            }
            self.queued_bytes = 0;
        } else {
            trace!(buffers = self.queue.len(), "Deferring audio stop");
            self.stop_pending = true;
        }
        Ok(())
    }

    /// Drop queued data. No-op while playing.
    pub fn flush(&mut self) -> PlayerResult<()> {
        if self.play_state() == AudioPlayState::Playing {
            return Ok(());
        }
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
        }
        self.queue.clear();
        self.queued_bytes = 0;
        self.stop_pending = false;
        Ok(())
    }

    /// Release the output; the sink is inert afterwards
    pub fn release(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
        self.latency_us = 0;
        self.last_timestamp_sample_us = None;
        self.timestamp = None;
        self.stop_pending = false;
        if let Some(mut output) = self.output.take() {
            output.release();
        }
    }

    /// Play state of the output, `Stopped` once released
    pub fn play_state(&self) -> AudioPlayState {
        self.output
            .as_ref()
            .map_or(AudioPlayState::Stopped, |output| output.play_state())
    }

    /// Bytes queued but not yet accepted by the output
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Number of buffers in the queue, including a partially written head
    pub fn queued_buffers(&self) -> usize {
        self.queue.len()
    }

    /// Bytes accepted by the output since creation
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Whether a stop is waiting for the queue to drain
    pub fn is_stop_pending(&self) -> bool {
        self.stop_pending
    }

    /// Output sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate as u32
    }

    /// Output channel count
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }
}

impl fmt::Debug for NonBlockingAudioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonBlockingAudioSink")
            .field("sample_rate", &self.sample_rate)
            .field("channel_count", &self.channel_count)
            .field("queued_buffers", &self.queue.len())
            .field("queued_bytes", &self.queued_bytes)
            .field("stop_pending", &self.stop_pending)
            .field("released", &self.output.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedAudioHandle, SimulatedAudioOutput};

    fn sink_with_capacity(capacity: usize) -> (NonBlockingAudioSink, SimulatedAudioHandle) {
        let output = SimulatedAudioOutput::manual(48_000, 2, capacity);
        let handle = output.handle();
        let sink = NonBlockingAudioSink::new(
            Box::new(output),
            48_000,
            2,
            Duration::from_millis(250),
        );
        (sink, handle)
    }

    #[test]
    fn test_partial_head_is_not_skipped() {
        let (mut sink, handle) = sink_with_capacity(600);
        sink.write(Bytes::from(vec![1u8; 400]), 0);
        sink.write(Bytes::from(vec![2u8; 400]), 1_000);
        assert_eq!(sink.queued_bytes(), 800);

        assert_eq!(sink.process().unwrap(), 600);
        assert_eq!(sink.queued_bytes(), 200);
        assert_eq!(sink.queued_buffers(), 1);

        // Nothing fits until the device consumes data.
        assert_eq!(sink.process().unwrap(), 0);
        assert_eq!(sink.queued_bytes(), 200);

        handle.consume_frames(100);
        assert_eq!(sink.process().unwrap(), 200);
        assert_eq!(sink.queued_bytes(), 0);
        assert_eq!(sink.queued_buffers(), 0);

        let written = handle.written_data();
        assert_eq!(written.len(), 800);
        assert!(written[..400].iter().all(|&b| b == 1));
        assert!(written[400..].iter().all(|&b| b == 2));
        assert_eq!(sink.total_bytes_written(), 800);
    }

    #[test]
    fn test_queued_bytes_only_drop_by_accepted_bytes() {
        let (mut sink, handle) = sink_with_capacity(64);
        sink.write(Bytes::from(vec![0u8; 1_000]), 0);

        let mut previous = sink.queued_bytes();
        for _ in 0..5 {
            let written = sink.process().unwrap();
            assert!(written <= 64);
            assert_eq!(sink.queued_bytes(), previous - written);
            previous = sink.queued_bytes();
            handle.consume_frames(16);
        }
        assert_eq!(sink.queued_buffers(), 1);
    }

    #[test]
    fn test_deferred_stop_waits_for_queue_to_drain() {
        let (mut sink, handle) = sink_with_capacity(0);
        sink.play().unwrap();
        for i in 0..3 {
            sink.write(Bytes::from(vec![0u8; 256]), i * 5_000_000);
        }

        sink.stop().unwrap();
        assert!(sink.is_stop_pending());
        assert_eq!(sink.queued_bytes(), 768);
        assert_eq!(handle.play_state(), AudioPlayState::Playing);

        sink.process().unwrap();
        assert_eq!(sink.queued_bytes(), 768);
        assert_eq!(handle.play_state(), AudioPlayState::Playing);

        handle.set_capacity(4_096);
        sink.process().unwrap();
        assert_eq!(sink.queued_bytes(), 0);
        assert!(!sink.is_stop_pending());
        assert_eq!(handle.play_state(), AudioPlayState::Stopped);
    }

    #[test]
    fn test_stop_with_empty_queue_is_immediate() {
        let (mut sink, handle) = sink_with_capacity(1_024);
        sink.play().unwrap();
        sink.stop().unwrap();
        assert!(!sink.is_stop_pending());
        assert_eq!(handle.play_state(), AudioPlayState::Stopped);
    }

    #[test]
    fn test_flush_is_ignored_while_playing() {
        let (mut sink, _handle) = sink_with_capacity(0);
        sink.write(Bytes::from(vec![0u8; 128]), 0);
        sink.play().unwrap();

        sink.flush().unwrap();
        assert_eq!(sink.queued_bytes(), 128);

        sink.pause().unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.queued_bytes(), 0);
        assert_eq!(sink.queued_buffers(), 0);
    }

    #[test]
    fn test_clock_from_playback_head_minus_latency() {
        let (mut sink, handle) = sink_with_capacity(1 << 20);
        handle.set_latency_ms(Some(40));
        sink.write(Bytes::from(vec![0u8; 48_000 * 4]), 0);
        sink.play().unwrap();
        sink.process().unwrap();

        handle.consume_frames(48_000);
        // One second played, half the reported latency subtracted.
        assert_eq!(sink.audio_time_us_at(time::s_to_ns(10)), 1_000_000 - 20_000);
    }

    #[test]
    fn test_clock_from_hardware_timestamp() {
        let (mut sink, handle) = sink_with_capacity(1 << 20);
        handle.set_timestamp(Some(AudioTimestamp {
            frame_position: 24_000,
            nano_time: time::s_to_ns(5),
        }));

        // 100 ms after the timestamp: 0.5 s + 0.1 s.
        let now_ns = time::s_to_ns(5) + 100_000_000;
        assert_eq!(sink.audio_time_us_at(now_ns), 600_000);

        // A newer timestamp is ignored until the resample interval elapses.
        handle.set_timestamp(Some(AudioTimestamp {
            frame_position: 0,
            nano_time: time::s_to_ns(5),
        }));
        assert_eq!(sink.audio_time_us_at(now_ns + 100_000_000), 700_000);
        assert_eq!(sink.audio_time_us_at(now_ns + 300_000_000), 400_000);
    }

    #[test]
    fn test_release_makes_sink_inert() {
        let (mut sink, handle) = sink_with_capacity(1_024);
        sink.write(Bytes::from(vec![0u8; 128]), 0);
        sink.release();
        assert!(handle.is_released());
        assert_eq!(sink.queued_bytes(), 0);
        assert_eq!(sink.process().unwrap(), 0);
        assert_eq!(sink.play_state(), AudioPlayState::Stopped);
        assert_eq!(sink.audio_time_us(), 0);
    }
}
