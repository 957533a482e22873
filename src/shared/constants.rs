use std::time::Duration;

pub const APP_NAME: &str = "framestream";

pub const LOG_FILE: &str = "framestream.log";
pub const DEFAULT_LOG_FILTER: &str = "framestream=info";
pub const VERBOSE_LOG_FILTER: &str = "framestream=debug";

// Backbuffer of a 320x240 16-bit panel.
pub const DISPLAY_WIDTH: u32 = 320;
pub const DISPLAY_HEIGHT: u32 = 240;
pub const DISPLAY_DEPTH: u32 = 16;

// 16:9 video centred vertically on the panel.
pub const VIDEO_WIDTH: u32 = 320;
pub const VIDEO_HEIGHT: u32 = 180;
pub const VERTICAL_OFFSET: u32 = 30;

pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(40);
pub const VSYNC_DELAY: Duration = Duration::from_micros(5000);
pub const OVERLAY_PERIOD: Duration = Duration::from_secs(1);

/// Idle pause when the source has nothing to deliver (missing stream or EOF).
pub const IDLE_DELAY: Duration = Duration::from_millis(10);

pub const DEMUX_CHUNK_SIZE: usize = 4096;
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Weight kept from the previous estimate on every rate update.
pub const RATE_SMOOTHING: f64 = 0.9;

pub const MOUNT_POINT: &str = ".";
pub const DEFAULT_STREAM: &str = "video.raw";
