use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::frame_buffer::FrameBuffer;
use crate::sync::{ReadySignal, Telemetry};

/// State shared by every unit of one playback session.
///
/// Cloning hands out another reference to the same session.
#[derive(Clone)]
pub struct Session {
    pub frame: Arc<FrameBuffer>,
    pub ready: Arc<ReadySignal>,
    pub telemetry: Arc<Telemetry>,
    running: Arc<AtomicBool>,
}

impl Session {
    pub fn new(frame: FrameBuffer) -> Self {
        Self {
            frame: Arc::new(frame),
            ready: Arc::new(ReadySignal::new()),
            telemetry: Arc::new(Telemetry::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask every loop to exit at its next check and release the sink's wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.ready.cancel();
    }
}
