use std::io;

/// Ways producing one compressed frame can fail. None of them end playback;
/// the source logs the error and moves on to the next frame.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("Stream read failed: {0}")]
    Io(#[from] io::Error),

    #[error("End of stream")]
    EndOfStream,

    #[error("Prepare failed: {0}")]
    Prepare(String),

    #[error("Decompress failed: {0}")]
    Decompress(String),

    #[error("Frame exceeds {limit} bytes without an end-of-image marker")]
    FrameTooLarge { limit: usize },

    #[error("Skipping {0} bytes failed")]
    Skip(usize),

    #[error("Output rejected block at ({left}, {top})")]
    Output { left: u32, top: u32 },
}

impl DemuxError {
    pub fn prepare<S: Into<String>>(msg: S) -> Self {
        Self::Prepare(msg.into())
    }

    pub fn decompress<S: Into<String>>(msg: S) -> Self {
        Self::Decompress(msg.into())
    }
}
