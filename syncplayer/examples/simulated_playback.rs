//! Simulated playback example for Sync Player
//!
//! Plays a synthetic two-second clip through the simulated platform and prints
//! the player's events and sync statistics. Pass `--device` to hear the audio
//! track (a tone of sample bytes) on the default output device.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use syncplayer::{
    PlayerConfig, PlayerEvent, SimulatedContainer, SimulatedPlatform, SimulatedTrack, SyncPlayer,
    TimerVsyncSource,
};

const CLIP: &str = "clip.mp4";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    syncplayer::init_logging()?;

    let container = SimulatedContainer::new()
        .with_track(SimulatedTrack::audio("audio/mp4a-latm", 48_000, 2, 2_000_000, 1_024))
        .with_track(SimulatedTrack::video("video/avc", 1280, 720, 2_000_000, 30, 30));
    let platform = SimulatedPlatform::new().with_container(CLIP, container);
    let platform = if std::env::args().any(|arg| arg == "--device") {
        println!("🔊 Playing audio on the default output device");
        platform.with_device_audio()
    } else {
        platform
    };

    let vsync = TimerVsyncSource::new(60.0).context("Failed to start vsync source")?;
    let config = PlayerConfig::from_json_str(r#"{ "poll_interval": 4 }"#)?;

    let player = SyncPlayer::builder(Arc::new(platform))
        .config(config)
        .vsync_source(Arc::new(vsync))
        .build()?;
    let mut events = player.events();

    player.set_data_source(CLIP)?;
    player.prepare()?;
    println!("🎬 Prepared, duration {:?} us", player.duration_us());
    player.play()?;

    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.next().await {
            println!("📣 {:?}", event);
            match event {
                PlayerEvent::Ended => return Ok(()),
                PlayerEvent::Error { message } => anyhow::bail!("Playback failed: {}", message),
                _ => {}
            }
        }
        Ok(())
    })
    .await
    .context("Playback did not finish in time")?;
    outcome?;

    let stats = player.stats();
    println!("📊 Frames rendered: {}", stats.frames_rendered);
    println!(
        "📊 Late frames: {} ({:.1}%)",
        stats.late_frames,
        stats.late_frame_percentage()
    );
    println!("📊 Audio bytes written: {}", stats.audio_bytes_written);
    println!("📊 Release timer resyncs: {}", stats.resyncs);

    player.release();
    println!("✅ Released, state {}", player.state());
    Ok(())
}
