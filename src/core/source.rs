use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::session::Session;
use crate::decoder::{DemuxError, FrameDemuxer};
use crate::shared::constants;
use crate::storage::MediaStream;
use crate::sync::RateMeter;

/// How bytes on storage turn into pixels in the backbuffer.
pub enum Strategy {
    /// Fixed-size RGB565 frames read straight into the backbuffer at row
    /// `offset_y`.
    Raw { frame_bytes: usize, offset_y: u32 },
    /// JPEG frames demuxed and decoded block by block, each block placed
    /// `offset_y` rows down.
    Mjpeg { demuxer: FrameDemuxer, offset_y: u32 },
}

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::Raw { .. } => "raw",
            Strategy::Mjpeg { .. } => "mjpeg",
        }
    }
}

/// Result of one producer iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was written (a raw read may have been short).
    Produced { bytes: usize },
    /// Bytes were consumed but the frame failed to decode. Whatever blocks
    /// were already placed stay in the backbuffer.
    Failed { bytes: usize },
    /// Nothing to read: no stream, end of stream or a read error.
    NoData,
}

impl FrameOutcome {
    pub fn bytes(&self) -> usize {
        match *self {
            FrameOutcome::Produced { bytes } | FrameOutcome::Failed { bytes } => bytes,
            FrameOutcome::NoData => 0,
        }
    }

    /// Whether the iteration ends with the ready flag set.
    pub fn signals(&self) -> bool {
        !matches!(self, FrameOutcome::NoData)
    }
}

/// Producer half of the pipeline: one frame into the backbuffer per step,
/// then the ready flag.
pub struct FrameSource<S: MediaStream> {
    stream: Option<S>,
    strategy: Strategy,
    session: Session,
    bps: RateMeter,
    fps: RateMeter,
    replay: bool,
    at_end: bool,
    vsync_delay: Duration,
    idle_delay: Duration,
}

impl<S: MediaStream> FrameSource<S> {
    /// `stream` is `None` when opening failed; the source then idles.
    pub fn new(stream: Option<S>, strategy: Strategy, session: Session, smoothing: f64) -> Self {
        Self {
            stream,
            strategy,
            session,
            bps: RateMeter::new(smoothing),
            fps: RateMeter::new(smoothing),
            replay: false,
            at_end: false,
            vsync_delay: constants::VSYNC_DELAY,
            idle_delay: constants::IDLE_DELAY,
        }
    }

    /// Rewind to the start of the stream instead of idling at its end.
    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    pub fn with_vsync_delay(mut self, delay: Duration) -> Self {
        self.vsync_delay = delay;
        self
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.bps.current()
    }

    pub fn frames_per_sec(&self) -> f64 {
        self.fps.current()
    }

    /// Produce one frame, signal it and update the rates.
    pub fn step(&mut self) -> FrameOutcome {
        self.step_at(Instant::now())
    }

    pub(crate) fn step_at(&mut self, now: Instant) -> FrameOutcome {
        let outcome = self.produce();

        if outcome.signals() {
            self.session.ready.set();
        }

        let telemetry = &self.session.telemetry;
        let frames = match outcome {
            FrameOutcome::Produced { .. } => {
                telemetry.record_produced();
                1.0
            }
            _ => 0.0,
        };
        telemetry.record_read(outcome.bytes());
        let bps = self.bps.tick_at(outcome.bytes() as f64, now);
        let fps = self.fps.tick_at(frames, now);
        telemetry.publish_rates(bps, fps);

        outcome
    }

    fn produce(&mut self) -> FrameOutcome {
        let Self { stream, strategy, session, .. } = self;
        let Some(stream) = stream.as_mut() else {
            return FrameOutcome::NoData;
        };

        let outcome = match strategy {
            Strategy::Raw { frame_bytes, offset_y } => {
                match session.frame.write_rows(*offset_y, *frame_bytes, |dst| stream.read_chunk(dst)) {
                    Ok(0) => None,
                    Ok(n) => Some(FrameOutcome::Produced { bytes: n }),
                    Err(e) => {
                        warn!("Frame read failed: {}", e);
                        return FrameOutcome::NoData;
                    }
                }
            }
            Strategy::Mjpeg { demuxer, offset_y } => {
                Self::produce_mjpeg(stream, demuxer, session, *offset_y)
            }
        };

        match outcome {
            Some(outcome) => {
                self.at_end = false;
                outcome
            }
            None => {
                self.end_of_stream();
                FrameOutcome::NoData
            }
        }
    }

    /// `None` at end of stream.
    fn produce_mjpeg(
        stream: &mut S,
        demuxer: &mut FrameDemuxer,
        session: &Session,
        offset_y: u32,
    ) -> Option<FrameOutcome> {
        match demuxer.prepare(stream) {
            Ok(header) => {
                debug!("Frame {}x{}, {} components", header.width, header.height, header.components);
            }
            Err(DemuxError::EndOfStream) => return None,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                Self::resync(stream, demuxer);
                return Some(FrameOutcome::Failed { bytes: demuxer.bytes_consumed() });
            }
        }

        let frame = &session.frame;
        let result = demuxer.decompress(stream, |block| {
            frame.blit(block.left, block.top + offset_y, block)
        });

        let bytes = demuxer.bytes_consumed();
        match result {
            Ok(_) => Some(FrameOutcome::Produced { bytes }),
            Err(e) => {
                warn!("Dropping frame: {}", e);
                Self::resync(stream, demuxer);
                Some(FrameOutcome::Failed { bytes: demuxer.bytes_consumed() })
            }
        }
    }

    fn resync(stream: &mut S, demuxer: &mut FrameDemuxer) {
        if demuxer.at_boundary() {
            return;
        }
        if let Err(e) = demuxer.finish_frame(stream) {
            warn!("Resync after failed frame stopped early: {}", e);
        }
    }

    fn end_of_stream(&mut self) {
        if self.replay {
            if let Some(stream) = self.stream.as_mut() {
                match stream.rewind_to_start() {
                    Ok(()) => {
                        info!("End of stream, replaying from start");
                        return;
                    }
                    Err(e) => warn!("Rewind to start failed: {}", e),
                }
            }
        }
        if !self.at_end {
            info!("End of stream reached");
            self.at_end = true;
        }
    }

    /// Loop until the session stops.
    pub fn run(mut self) {
        info!(
            "Video source started ({}, stream {})",
            self.strategy.name(),
            if self.stream.is_some() { "open" } else { "missing" }
        );

        while self.session.is_running() {
            match self.step() {
                FrameOutcome::NoData => thread::sleep(self.idle_delay),
                _ => {
                    // Head start for the sink before the next frame overwrites this one.
                    if !self.vsync_delay.is_zero() {
                        thread::sleep(self.vsync_delay);
                    }
                }
            }
        }

        info!("Video source stopped");
    }
}
