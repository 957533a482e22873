use std::time::Duration;
use tracing::{error, info};

use super::session::Session;
use crate::renderer::Display;

/// Consumer half of the pipeline: flushes the backbuffer once per ready
/// signal and never for a frame it has already shown.
pub struct FrameSink<D: Display> {
    display: D,
    session: Session,
    timeout: Duration,
}

impl<D: Display> FrameSink<D> {
    pub fn new(display: D, session: Session, timeout: Duration) -> Self {
        Self { display, session, timeout }
    }

    /// Wait up to the timeout for a frame and flush it. Returns whether a
    /// flush was issued.
    pub fn step(&mut self) -> bool {
        // The flag is cleared before flushing so a frame finished during the
        // flush is picked up by the next wait.
        if !self.session.ready.wait_and_clear(self.timeout) {
            return false;
        }

        match self.display.flush(&self.session.frame) {
            Ok(()) => self.session.telemetry.record_flushed(),
            Err(e) => error!("Flush failed: {}", e),
        }
        true
    }

    /// Loop until the session stops, then hand the display back.
    pub fn run(mut self) -> D {
        info!("Flush loop started (timeout {:?})", self.timeout);

        while self.session.is_running() {
            self.step();
            if self.display.poll_quit() {
                info!("Quit requested from display");
                self.session.stop();
            }
        }

        info!("Flush loop stopped");
        self.display
    }
}
