//! Frame boundaries in a raw concatenation of JPEG images.
//!
//! The stream carries no length prefixes, so the only delimiter is the
//! end-of-image marker. Every fill of the read buffer is scanned for it; when
//! found, the stream cursor is moved back so the next fill starts exactly on
//! the byte after the marker.
//!
//! A marker split across two fills is not detected. The frame then runs on
//! into the next one and is usually dropped by the decoder.

use std::io;
use tracing::{debug, warn};

use super::block::DecodedBlock;
use super::error::DemuxError;
use super::jpeg::{BlockDecoder, FrameHeader};
use crate::storage::MediaStream;

pub const SOI_MARKER: [u8; 2] = [0xFF, 0xD8];
pub const EOI_MARKER: [u8; 2] = [0xFF, 0xD9];

/// Offset of the first end-of-image marker in `buf`.
pub fn find_eoi(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == EOI_MARKER)
}

/// Outcome of one [`fill`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fill {
    /// Bytes of `buf` that belong to the current frame.
    pub consumed: usize,
    /// The end-of-image marker was seen; `consumed` ends right after it.
    pub boundary: bool,
}

/// Read up to `buf.len()` bytes and stop the frame at an end-of-image marker.
///
/// With the marker at offset `o` of a read of `n` bytes, the frame ends at
/// `o + 2`, the cursor is moved back by `n - (o + 2)` bytes and the reported
/// count is `o + 2`. Without a marker the full read count is reported. Zero
/// means end of stream.
pub fn fill<S: MediaStream + ?Sized>(stream: &mut S, buf: &mut [u8]) -> io::Result<Fill> {
    let read = stream.read_chunk(buf)?;

    let Some(offset) = find_eoi(&buf[..read]) else {
        return Ok(Fill { consumed: read, boundary: false });
    };

    let end = offset + 2;
    let rewind = end as i64 - read as i64;
    if rewind < 0 {
        if let Err(e) = stream.seek_by(rewind) {
            // Cursor is now past the boundary; the next frame starts misaligned
            // and is expected to fail prepare once before the stream resyncs.
            warn!("Rewind of {} bytes after end-of-image failed: {}", -rewind, e);
        }
    }

    Ok(Fill { consumed: end, boundary: true })
}

/// Seek forward `count` bytes. Reports `count` on success, 0 on failure.
pub fn skip<S: MediaStream + ?Sized>(stream: &mut S, count: usize) -> usize {
    match stream.seek_by(count as i64) {
        Ok(()) => count,
        Err(e) => {
            debug!("Skip of {} bytes failed: {}", count, e);
            0
        }
    }
}

/// Buffered view of the current frame, refilled through [`fill`].
///
/// Reads never cross the end-of-image boundary: once the marker has been
/// consumed, the reader reports end of input until [`ChunkReader::begin_frame`].
pub struct ChunkReader {
    chunk: Vec<u8>,
    pos: usize,
    len: usize,
    boundary: bool,
    consumed: usize,
    max_frame_bytes: usize,
}

impl ChunkReader {
    pub fn new(chunk_size: usize, max_frame_bytes: usize) -> Self {
        Self {
            chunk: vec![0u8; chunk_size.max(2)],
            pos: 0,
            len: 0,
            boundary: false,
            consumed: 0,
            max_frame_bytes,
        }
    }

    pub fn begin_frame(&mut self) {
        self.pos = 0;
        self.len = 0;
        self.boundary = false;
        self.consumed = 0;
    }

    /// Bytes taken from the stream for the current frame, skips included.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn at_boundary(&self) -> bool {
        self.boundary
    }

    fn buffered(&self) -> &[u8] {
        &self.chunk[self.pos..self.len]
    }

    fn account(&mut self, bytes: usize) -> Result<(), DemuxError> {
        self.consumed += bytes;
        if self.consumed > self.max_frame_bytes {
            return Err(DemuxError::FrameTooLarge { limit: self.max_frame_bytes });
        }
        Ok(())
    }

    /// Refill when the window is empty. Returns false at the end of the frame
    /// or of the stream.
    fn refill<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<bool, DemuxError> {
        if self.pos < self.len {
            return Ok(true);
        }
        if self.boundary {
            return Ok(false);
        }

        let filled = fill(stream, &mut self.chunk)?;
        self.pos = 0;
        self.len = filled.consumed;
        self.boundary = filled.boundary;
        self.account(filled.consumed)?;
        Ok(self.len > 0)
    }

    /// Copy up to `out.len()` bytes. 0 means the frame (or stream) has ended.
    pub fn read<S: MediaStream + ?Sized>(
        &mut self,
        stream: &mut S,
        out: &mut [u8],
    ) -> Result<usize, DemuxError> {
        if out.is_empty() || !self.refill(stream)? {
            return Ok(0);
        }
        let available = self.buffered();
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }

    /// Fill `out` completely, or fail with [`DemuxError::EndOfStream`] if
    /// nothing at all was available.
    pub fn read_exact<S: MediaStream + ?Sized>(
        &mut self,
        stream: &mut S,
        out: &mut [u8],
    ) -> Result<(), DemuxError> {
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read(stream, &mut out[filled..])?;
            if n == 0 {
                return Err(if filled == 0 && self.consumed == 0 {
                    DemuxError::EndOfStream
                } else {
                    DemuxError::prepare("truncated frame header")
                });
            }
            filled += n;
        }
        Ok(())
    }

    pub fn read_u8<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<u8, DemuxError> {
        let mut byte = [0u8; 1];
        self.read_exact(stream, &mut byte)?;
        Ok(byte[0])
    }

    pub fn read_u16_be<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<u16, DemuxError> {
        let mut bytes = [0u8; 2];
        self.read_exact(stream, &mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Discard `count` bytes: first from the window, the rest by seeking the
    /// stream without reading it. The seeked bytes are not scanned for the
    /// end-of-image marker.
    pub fn skip<S: MediaStream + ?Sized>(&mut self, stream: &mut S, count: usize) -> Result<(), DemuxError> {
        let from_window = self.buffered().len().min(count);
        self.pos += from_window;

        let rest = count - from_window;
        if rest == 0 {
            return Ok(());
        }
        if self.boundary {
            return Err(DemuxError::prepare("segment runs past end-of-image"));
        }
        if skip(stream, rest) != rest {
            return Err(DemuxError::Skip(rest));
        }
        self.account(rest)
    }

    /// Append everything up to the frame boundary (or end of stream) to `out`.
    pub fn read_to_boundary<S: MediaStream + ?Sized>(
        &mut self,
        stream: &mut S,
        out: &mut Vec<u8>,
    ) -> Result<usize, DemuxError> {
        let mut total = 0;
        while self.refill(stream)? {
            let available = &self.chunk[self.pos..self.len];
            out.extend_from_slice(available);
            total += available.len();
            self.pos = self.len;
        }
        Ok(total)
    }

    /// Throw away the rest of the current frame so the next one starts after
    /// its end-of-image marker. Stops at end of stream.
    pub fn drain<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<usize, DemuxError> {
        let mut drained = self.buffered().len();
        self.pos = self.len;
        while !self.boundary {
            let filled = fill(stream, &mut self.chunk)?;
            self.pos = filled.consumed;
            self.len = filled.consumed;
            self.boundary = filled.boundary;
            self.consumed += filled.consumed;
            drained += filled.consumed;
            if filled.consumed == 0 {
                break;
            }
        }
        Ok(drained)
    }
}

/// Extracts and decodes one JPEG frame at a time from a byte stream.
pub struct FrameDemuxer {
    input: ChunkReader,
    decoder: BlockDecoder,
}

impl FrameDemuxer {
    pub fn new(chunk_size: usize, max_frame_bytes: usize) -> Self {
        Self {
            input: ChunkReader::new(chunk_size, max_frame_bytes),
            decoder: BlockDecoder::new(),
        }
    }

    /// Start a new frame and parse its header up to the start of scan.
    pub fn prepare<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<FrameHeader, DemuxError> {
        self.input.begin_frame();
        self.decoder.prepare(&mut self.input, stream)
    }

    /// Decode the prepared frame, handing each decoded rectangle to `emit`.
    ///
    /// `emit` returning false aborts the frame; blocks already emitted stay
    /// where they were put. Returns the number of blocks emitted.
    pub fn decompress<S, F>(&mut self, stream: &mut S, emit: F) -> Result<usize, DemuxError>
    where
        S: MediaStream + ?Sized,
        F: FnMut(&DecodedBlock<'_>) -> bool,
    {
        self.decoder.decompress(&mut self.input, stream, emit)
    }

    /// Skip whatever remains of the current frame. Used after a failure so
    /// the next prepare starts on a frame boundary.
    pub fn finish_frame<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<usize, DemuxError> {
        self.input.drain(stream)
    }

    /// Locate the next frame without decoding it. Returns its length in
    /// bytes, or `None` at end of stream.
    pub fn next_span<S: MediaStream + ?Sized>(&mut self, stream: &mut S) -> Result<Option<usize>, DemuxError> {
        self.input.begin_frame();
        self.input.drain(stream)?;
        match self.input.consumed() {
            0 => Ok(None),
            n => Ok(Some(n)),
        }
    }

    pub fn bytes_consumed(&self) -> usize {
        self.input.consumed()
    }

    pub fn at_boundary(&self) -> bool {
        self.input.at_boundary()
    }
}
