//! Audio output on the host's default sound device
//!
//! The cpal stream is not `Send` on every host, so it lives on a dedicated
//! thread for its whole life. The output talks to the device callback through
//! a bounded sample ring; the ring size is the device buffer the sink sees.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use syncplayer_core::{AudioOutput, AudioPlayState, PlayerError, PlayerResult};
use tracing::{debug, error, warn};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Default ring size: a quarter second of audio
const DEFAULT_BUFFER_MS: u32 = 250;

struct RingState {
    samples: VecDeque<i16>,
    capacity_samples: usize,
    frames_played: i64,
    channel_count: usize,
    playing: bool,
}

impl RingState {
    /// Fill one device callback, returning how many samples came from the ring
    fn fill<T>(&mut self, data: &mut [T], convert: impl Fn(i16) -> T, silence: T) -> usize
    where
        T: Copy,
    {
        if !self.playing {
            data.fill(silence);
            return 0;
        }
        let frames = (data.len().min(self.samples.len())) / self.channel_count;
        let available = frames * self.channel_count;
        for (slot, sample) in data.iter_mut().zip(self.samples.drain(..available)) {
            *slot = convert(sample);
        }
        data[available..].fill(silence);
        self.frames_played += frames as i64;
        available
    }

    /// Queue as many whole little-endian samples of `data` as fit, returning bytes consumed.
    ///
    /// A trailing odd byte is consumed with the last whole sample and dropped.
    fn push(&mut self, data: &[u8]) -> usize {
        let free = self.capacity_samples.saturating_sub(self.samples.len());
        let whole = data.len() / 2;
        let samples = free.min(whole);
        self.samples.extend(
            data[..samples * 2]
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        if samples == whole && data.len() % 2 == 1 {
            debug!("Dropping trailing half sample");
            data.len()
        } else {
            samples * 2
        }
    }
}

/// [`AudioOutput`] playing 16-bit PCM on the default output device
pub struct CpalAudioOutput {
    ring: Arc<Mutex<RingState>>,
    play_state: AudioPlayState,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CpalAudioOutput {
    /// Open the default device with a ring of [`DEFAULT_BUFFER_MS`]
    pub fn open_default(sample_rate: u32, channel_count: u16) -> PlayerResult<Self> {
        Self::open(sample_rate, channel_count, DEFAULT_BUFFER_MS)
    }

    /// Open the default device with a ring holding `buffer_ms` of audio
    pub fn open(sample_rate: u32, channel_count: u16, buffer_ms: u32) -> PlayerResult<Self> {
        let channels = usize::from(channel_count.max(1));
        let capacity_samples =
            (sample_rate as usize * channels * buffer_ms as usize / 1_000).max(channels);
        let ring = Arc::new(Mutex::new(RingState {
            samples: VecDeque::with_capacity(capacity_samples),
            capacity_samples,
            frames_played: 0,
            channel_count: channels,
            playing: false,
        }));

        let (ready_tx, ready_rx) = mpsc::sync_channel::<PlayerResult<()>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stream_ring = Arc::clone(&ring);
        let thread = std::thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match build_stream(stream_ring, sample_rate, channel_count) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until the output is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Audio device stream closed");
            })
            .map_err(|e| PlayerError::Thread {
                reason: format!("Failed to spawn audio device thread: {}", e),
            })?;

        let ready = ready_rx.recv().map_err(|_| PlayerError::AudioOutput {
            reason: "Audio device thread exited during setup".to_string(),
        })?;
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        Ok(Self {
            ring,
            play_state: AudioPlayState::Stopped,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            sample_rate,
        })
    }

    /// Sample rate the device was opened with
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn build_stream(
    ring: Arc<Mutex<RingState>>,
    sample_rate: u32,
    channel_count: u16,
) -> PlayerResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::AudioOutput {
            reason: "No default output device".to_string(),
        })?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlayerError::AudioOutput {
            reason: format!("Failed to get default output config: {}", e),
        })?;

    let config = cpal::StreamConfig {
        channels: channel_count as cpal::ChannelCount,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let on_error = |err: cpal::StreamError| error!(error = %err, "Audio device stream error");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                ring.lock().fill(data, |s| s, 0);
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                ring.lock()
                    .fill(data, |s| (i32::from(s) + 32_768) as u16, u16::MAX / 2);
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                ring.lock()
                    .fill(data, |s| f32::from(s) / f32::from(i16::MAX), 0.0);
            },
            on_error,
            None,
        ),
        sample_format => {
            return Err(PlayerError::AudioOutput {
                reason: format!("Unsupported sample format: {:?}", sample_format),
            });
        }
    }
    .map_err(|e| PlayerError::AudioOutput {
        reason: format!("Failed to build output stream: {}", e),
    })?;

    stream.play().map_err(|e| PlayerError::AudioOutput {
        reason: format!("Failed to start stream: {}", e),
    })?;
    Ok(stream)
}

impl AudioOutput for CpalAudioOutput {
    fn write_non_blocking(&mut self, data: &[u8], _timestamp_ns: i64) -> PlayerResult<usize> {
        Ok(self.ring.lock().push(data))
    }

    fn play(&mut self) -> PlayerResult<()> {
        self.ring.lock().playing = true;
        self.play_state = AudioPlayState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> PlayerResult<()> {
        self.ring.lock().playing = false;
        self.play_state = AudioPlayState::Paused;
        Ok(())
    }

    fn stop(&mut self) -> PlayerResult<()> {
        // Buffered samples keep playing out; only the reported state changes.
        self.play_state = AudioPlayState::Stopped;
        Ok(())
    }

    fn flush(&mut self) -> PlayerResult<()> {
        self.ring.lock().samples.clear();
        Ok(())
    }

    fn release(&mut self) {
        {
            let mut ring = self.ring.lock();
            ring.playing = false;
            ring.samples.clear();
        }
        self.play_state = AudioPlayState::Stopped;
        // Dropping the sender wakes the device thread.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio device thread panicked");
            }
        }
    }

    fn play_state(&self) -> AudioPlayState {
        self.play_state
    }

    fn playback_head_position(&self) -> i64 {
        self.ring.lock().frames_played
    }
}

impl Drop for CpalAudioOutput {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_fill_whole_frames_only() {
        let mut ring = RingState {
            samples: (1..=5).collect(),
            capacity_samples: 16,
            frames_played: 0,
            channel_count: 2,
            playing: true,
        };
        let mut data = [9i16; 8];
        assert_eq!(ring.fill(&mut data, |s| s, 0), 4);
        assert_eq!(data, [1, 2, 3, 4, 0, 0, 0, 0]);
        assert_eq!(ring.frames_played, 2);
        assert_eq!(ring.samples.len(), 1);

        ring.playing = false;
        assert_eq!(ring.fill(&mut data, |s| s, 0), 0);
        assert_eq!(data, [0; 8]);
    }

    #[test]
    fn test_ring_push_drops_trailing_odd_byte() {
        let mut ring = RingState {
            samples: VecDeque::new(),
            capacity_samples: 3,
            frames_played: 0,
            channel_count: 1,
            playing: true,
        };
        // Two whole samples and a stray byte all fit.
        assert_eq!(ring.push(&[1, 0, 2, 0, 9]), 5);
        assert_eq!(ring.samples, [1, 2]);

        // Only one sample fits; the remainder stays with the caller.
        assert_eq!(ring.push(&[3, 0, 4, 0, 9]), 2);
        assert_eq!(ring.samples, [1, 2, 3]);
        assert_eq!(ring.push(&[9]), 1);
        assert_eq!(ring.push(&[4, 0]), 0);
    }
}
