use anyhow::{anyhow, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use std::fs::File;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::frame_buffer::FrameBuffer;
use super::session::Session;
use super::sink::FrameSink;
use super::source::{FrameSource, Strategy};
use crate::decoder::FrameDemuxer;
use crate::renderer::Display;
use crate::shared::{constants, PlaybackConfig, SourceFormat};
use crate::storage::Storage;

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSummary {
    pub frames_produced: u64,
    pub frames_flushed: u64,
    pub bytes_read: u64,
    pub elapsed: Duration,
}

impl PlaybackSummary {
    /// Frames overwritten before the sink got to them.
    pub fn frames_superseded(&self) -> u64 {
        self.frames_produced.saturating_sub(self.frames_flushed)
    }

    pub fn average_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_flushed as f64 / secs
        } else {
            0.0
        }
    }

    pub fn average_bps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_read as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print(&self) {
        println!("\n=== Playback Complete ===");
        println!("Frames produced:   {}", self.frames_produced);
        println!("Frames flushed:    {}", self.frames_flushed);
        println!("Frames superseded: {}", self.frames_superseded());
        println!("Bytes read:        {}", self.bytes_read);
        println!("Elapsed:           {:.2}s", self.elapsed.as_secs_f64());
        println!("Average:           {:.1} FPS, {:.1} kBPS", self.average_fps(), self.average_bps() / 1000.0);
    }
}

/// Backbuffer and shared state for `config`'s panel.
pub fn new_session(config: &PlaybackConfig) -> Session {
    let frame = FrameBuffer::new(config.display_width, config.display_height, constants::DISPLAY_DEPTH);
    info!("Back buffer: {}x{}x{}", frame.width(), frame.height(), frame.depth());
    Session::new(frame)
}

/// Mount storage and open the configured stream.
///
/// Failures are logged once and the session continues without a stream.
fn open_stream(config: &PlaybackConfig) -> Option<File> {
    let storage = match Storage::mount(&config.mount) {
        Ok(storage) => {
            info!("Storage mounted at {:?}", storage.root());
            storage
        }
        Err(e) => {
            error!("{}", e);
            Storage::unmounted(&config.mount)
        }
    };

    match storage.open(&config.input) {
        Ok(file) => {
            info!("Successfully opened {:?}", config.input);
            Some(file)
        }
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

fn strategy_for(config: &PlaybackConfig) -> Strategy {
    match config.format {
        SourceFormat::Raw => Strategy::Raw {
            frame_bytes: config.raw_frame_bytes(),
            offset_y: config.offset_y,
        },
        SourceFormat::Mjpeg => Strategy::Mjpeg {
            demuxer: FrameDemuxer::new(config.chunk_size, config.max_frame_bytes),
            offset_y: config.offset_y,
        },
    }
}

/// Low-priority unit that reports the rates once per period.
fn spawn_overlay(session: Session, period: Duration) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("info".into())
        .spawn(move || {
            let ticker = crossbeam_channel::tick(period);
            while session.is_running() {
                match ticker.recv_timeout(Duration::from_millis(100)) {
                    Ok(_) => info!("{}", session.telemetry.status_line()),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("Failed to spawn overlay thread")
}

/// Run one playback session until `session` is stopped or `limit` passes.
pub fn play<D: Display + 'static>(
    config: &PlaybackConfig,
    session: &Session,
    display: D,
    limit: Option<Duration>,
) -> Result<PlaybackSummary> {
    config.validate()?;

    let stream = open_stream(config);
    let source = FrameSource::new(stream, strategy_for(config), session.clone(), config.rate_smoothing)
        .with_replay(config.replay)
        .with_vsync_delay(config.vsync_delay());
    let sink = FrameSink::new(display, session.clone(), config.flush_timeout());

    let start = Instant::now();

    let flush_handle = thread::Builder::new()
        .name("flush".into())
        .spawn(move || sink.run())
        .context("Failed to spawn flush thread")?;
    let video_handle = thread::Builder::new()
        .name("video".into())
        .spawn(move || source.run())
        .context("Failed to spawn video thread")?;
    let overlay_handle = spawn_overlay(session.clone(), constants::OVERLAY_PERIOD)?;

    while session.is_running() {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            info!("Time limit reached");
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    session.stop();

    video_handle.join().map_err(|_| anyhow!("Video thread panicked"))?;
    let display = flush_handle.join().map_err(|_| anyhow!("Flush thread panicked"))?;
    overlay_handle.join().map_err(|_| anyhow!("Overlay thread panicked"))?;
    drop(display);

    let telemetry = &session.telemetry;
    let summary = PlaybackSummary {
        frames_produced: telemetry.frames_produced(),
        frames_flushed: telemetry.frames_flushed(),
        bytes_read: telemetry.bytes_read(),
        elapsed: start.elapsed(),
    };
    info!("Session ended: {:?}", summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sink::tests::RecordingDisplay;
    use std::io::Write;

    fn config_in(dir: &std::path::Path, input: &str) -> PlaybackConfig {
        PlaybackConfig {
            mount: dir.to_path_buf(),
            input: input.to_string(),
            display_width: 320,
            display_height: 240,
            video_width: 320,
            video_height: 180,
            offset_y: 30,
            vsync_us: 1000,
            flush_timeout_ms: 10,
            ..Default::default()
        }
    }

    #[test]
    fn raw_stream_plays_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let frame_bytes = 320 * 180 * 2;
        let mut file = File::create(dir.path().join("clip.raw")).unwrap();
        for shade in [0x10u8, 0x20, 0x30, 0x40] {
            file.write_all(&vec![shade; frame_bytes]).unwrap();
        }
        drop(file);

        let config = config_in(dir.path(), "clip.raw");
        let session = new_session(&config);
        let display = RecordingDisplay::default();

        let summary = play(&config, &session, display.clone(), Some(Duration::from_millis(400))).unwrap();

        assert_eq!(summary.frames_produced, 4);
        assert_eq!(summary.bytes_read, 4 * frame_bytes as u64);
        assert!(summary.frames_flushed >= 1 && summary.frames_flushed <= 4);
        assert_eq!(display.count() as u64, summary.frames_flushed);

        // The last frame sits below the 30-row band, which stays untouched.
        let pixels = session.frame.snapshot();
        let pitch = session.frame.pitch();
        assert!(pixels[..30 * pitch].iter().all(|&b| b == 0));
        assert!(pixels[30 * pitch..210 * pitch].iter().all(|&b| b == 0x40));
        assert!(pixels[210 * pitch..].iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_stream_degrades_without_flushing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), "absent.raw");
        let session = new_session(&config);
        let display = RecordingDisplay::default();

        let summary = play(&config, &session, display.clone(), Some(Duration::from_millis(100))).unwrap();

        assert_eq!(summary.frames_produced, 0);
        assert_eq!(display.count(), 0);
    }

    #[test]
    fn invalid_geometry_is_rejected_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlaybackConfig { video_width: 640, ..config_in(dir.path(), "clip.raw") };
        let session = new_session(&config);
        assert!(play(&config, &session, RecordingDisplay::default(), None).is_err());
    }

    #[test]
    fn summary_counts_superseded_frames() {
        let summary = PlaybackSummary {
            frames_produced: 30,
            frames_flushed: 24,
            bytes_read: 3_000_000,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(summary.frames_superseded(), 6);
        assert_eq!(summary.average_fps(), 12.0);
        assert_eq!(summary.average_bps(), 1_500_000.0);
    }
}
