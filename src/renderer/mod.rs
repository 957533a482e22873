pub mod display;
pub mod processor;

pub use display::{DisplayMode, TerminalDisplay};

use anyhow::Result;

use crate::core::frame_buffer::FrameBuffer;

/// The presentation side of a playback session.
///
/// Decoded pixels are composited straight into the [`FrameBuffer`]; the
/// display only has to reveal it. Calls come from a single thread.
pub trait Display: Send {
    /// Present the current contents of `frame`.
    fn flush(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// True when the viewer asked to stop.
    fn poll_quit(&mut self) -> bool {
        false
    }
}

/// Discards every frame. Used when measuring the source alone.
#[derive(Debug, Default)]
pub struct NullDisplay {
    pub flushes: u64,
}

impl Display for NullDisplay {
    fn flush(&mut self, _frame: &FrameBuffer) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}
