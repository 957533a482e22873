mod core;
mod decoder;
mod renderer;
mod shared;
mod storage;
mod sync;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::core::player::{self, PlaybackSummary};
use crate::core::Session;
use crate::decoder::FrameDemuxer;
use crate::renderer::{DisplayMode, NullDisplay, TerminalDisplay};
use crate::shared::{PlaybackConfig, SourceFormat};
use crate::storage::Storage;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream video from storage onto the terminal
    Play {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(short, long, value_enum, default_value_t = DisplayMode::Rgb)]
        mode: DisplayMode,
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Run the pipeline against a null display and report throughput
    Bench {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },
    /// List the JPEG frame boundaries of an MJPEG stream
    Scan {
        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Overrides applied on top of the config file.
#[derive(Args, Default)]
struct SourceArgs {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Stream file, relative to the mount point
    #[arg(short, long)]
    input: Option<String>,
    #[arg(long)]
    mount: Option<PathBuf>,
    #[arg(short, long, value_enum)]
    format: Option<SourceFormat>,
    /// Video width in pixels
    #[arg(long)]
    width: Option<u32>,
    /// Video height in pixels
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    display_width: Option<u32>,
    #[arg(long)]
    display_height: Option<u32>,
    /// First backbuffer row of the video
    #[arg(long)]
    offset_y: Option<u32>,
    /// Demultiplexer read size in bytes
    #[arg(long)]
    chunk: Option<usize>,
    #[arg(long)]
    flush_timeout_ms: Option<u64>,
    /// Pause after each produced frame, in microseconds
    #[arg(long)]
    vsync_us: Option<u64>,
    /// Rewind at end of stream instead of idling
    #[arg(long)]
    replay: bool,
}

impl SourceArgs {
    fn resolve(&self) -> Result<PlaybackConfig> {
        let mut config = PlaybackConfig::load(self.config.as_deref())?;

        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(mount) = &self.mount {
            config.mount = mount.clone();
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(width) = self.width {
            config.video_width = width;
        }
        if let Some(height) = self.height {
            config.video_height = height;
        }
        if let Some(width) = self.display_width {
            config.display_width = width;
        }
        if let Some(height) = self.display_height {
            config.display_height = height;
        }
        if let Some(offset_y) = self.offset_y {
            config.offset_y = offset_y;
        }
        if let Some(chunk) = self.chunk {
            config.chunk_size = chunk;
        }
        if let Some(timeout) = self.flush_timeout_ms {
            config.flush_timeout_ms = timeout;
        }
        if let Some(vsync) = self.vsync_us {
            config.vsync_us = vsync;
        }
        config.replay |= self.replay;

        config.validate()?;
        Ok(config)
    }
}

/// Stop the session on Ctrl+C. Raw mode swallows SIGINT, so the display
/// also watches for `q`.
fn install_interrupt(session: &Session) -> Result<()> {
    let session = session.clone();
    ctrlc::set_handler(move || session.stop()).context("Error setting Ctrl-C handler")
}

/// One compressed frame located by `scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameSpan {
    offset: usize,
    len: usize,
    /// Ends with an end-of-image marker rather than at end of stream.
    complete: bool,
}

fn frame_spans(config: &PlaybackConfig) -> Result<Vec<FrameSpan>> {
    let storage = Storage::mount(&config.mount)?;
    let mut file = storage.open(&config.input)?;
    let mut demuxer = FrameDemuxer::new(config.chunk_size, config.max_frame_bytes);

    let mut spans = Vec::new();
    let mut offset = 0usize;
    while let Some(len) = demuxer.next_span(&mut file)? {
        spans.push(FrameSpan { offset, len, complete: demuxer.at_boundary() });
        offset += len;
    }
    Ok(spans)
}

fn scan(config: &PlaybackConfig) -> Result<()> {
    let spans = frame_spans(config)?;
    for (index, span) in spans.iter().enumerate() {
        let note = if span.complete { "" } else { "  (no end marker)" };
        println!("{:6}  offset {:10}  length {:8}{}", index, span.offset, span.len, note);
    }
    let total: usize = spans.iter().map(|span| span.len).sum();
    println!("{} frames, {} bytes", spans.len(), total);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_path = crate::utils::logger::init(cli.verbose)?;

    // A previous crash may have left the terminal in raw mode.
    let _ = crossterm::terminal::disable_raw_mode();
    let _ = crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen);

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Logging to {:?}", log_path);

    let summary: PlaybackSummary = match &cli.command {
        Commands::Play { source, mode, duration_secs } => {
            let config = source.resolve()?;
            let session = player::new_session(&config);
            install_interrupt(&session)?;
            let display = TerminalDisplay::new(
                *mode,
                config.display_width,
                config.display_height,
                Some(session.telemetry.clone()),
            )?;
            player::play(&config, &session, display, duration_secs.map(Duration::from_secs))?
        }
        Commands::Bench { source, duration_secs } => {
            let config = source.resolve()?;
            let session = player::new_session(&config);
            install_interrupt(&session)?;
            println!("Benchmarking {:?} for {}s...", config.input, duration_secs);
            player::play(&config, &session, NullDisplay::default(), Some(Duration::from_secs(*duration_secs)))?
        }
        Commands::Scan { source } => {
            let mut config = source.resolve()?;
            config.format = SourceFormat::Mjpeg;
            return scan(&config);
        }
    };

    summary.print();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli::parse_from([
            "framestream", "play", "--input", "clip.mjpeg", "--format", "mjpeg", "--chunk", "512", "--replay",
        ]);
        let Commands::Play { source, .. } = cli.command else {
            panic!("expected play");
        };
        let config = source.resolve().unwrap();
        assert_eq!(config.input, "clip.mjpeg");
        assert_eq!(config.format, SourceFormat::Mjpeg);
        assert_eq!(config.chunk_size, 512);
        assert!(config.replay);
        assert_eq!(config.offset_y, 30);
    }

    #[test]
    fn overrides_are_validated() {
        let args = SourceArgs { offset_y: Some(100), ..Default::default() };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn scan_finds_each_frame_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = vec![0u8; 98];
        data.extend_from_slice(&[0xFF, 0xD9]);
        data.extend_from_slice(&[0u8; 48]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data.extend_from_slice(&[0u8; 7]);
        std::fs::write(dir.path().join("clip.mjpeg"), data).unwrap();

        let config = PlaybackConfig {
            mount: dir.path().to_path_buf(),
            input: "clip.mjpeg".to_string(),
            chunk_size: 64,
            ..Default::default()
        };
        let spans = frame_spans(&config).unwrap();
        assert_eq!(
            spans,
            vec![
                FrameSpan { offset: 0, len: 100, complete: true },
                FrameSpan { offset: 100, len: 50, complete: true },
                FrameSpan { offset: 150, len: 7, complete: false },
            ]
        );
    }
}
