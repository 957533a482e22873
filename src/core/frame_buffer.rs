use std::sync::{Mutex, MutexGuard};

use crate::decoder::DecodedBlock;

/// The backbuffer shared by the frame source (sole writer) and the frame
/// sink (sole reader).
///
/// Each write operation and each flush holds the lock only for its own
/// duration, so a flush may still land between two writes of the next frame.
/// That tearing window is accepted; the ready signal only guarantees that a
/// signalled frame's writes are visible before its flush.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    depth: u32,
    pitch: usize,
    pixels: Mutex<Vec<u8>>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        let pitch = width as usize * (depth as usize / 8);
        Self {
            width,
            height,
            depth,
            pitch,
            pixels: Mutex::new(vec![0u8; pitch * height as usize]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Bytes per row.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Total bytes of the backing region.
    pub fn size(&self) -> usize {
        self.pitch * self.height as usize
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.pixels.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hand `write` the `len` bytes starting at row `row`, clamped to the end
    /// of the buffer. Lets a reader fill the backbuffer in place.
    ///
    /// The lock is held for the whole of `write`. A raw storage read done
    /// here stays zero-copy, but a flush arriving meanwhile waits for the
    /// read to finish instead of overlapping it.
    pub fn write_rows<R>(&self, row: u32, len: usize, write: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut pixels = self.lock();
        let start = (row as usize * self.pitch).min(pixels.len());
        let end = start.saturating_add(len).min(pixels.len());
        write(&mut pixels[start..end])
    }

    /// Copy `block` to `(x, y)`, clipping at the buffer edges. A block that
    /// lies entirely outside the buffer is clipped to nothing and still
    /// counts as placed.
    ///
    /// Returns false only if the depths differ.
    pub fn blit(&self, x: u32, y: u32, block: &DecodedBlock<'_>) -> bool {
        if block.depth != self.depth {
            return false;
        }
        if x >= self.width || y >= self.height || block.width == 0 || block.height == 0 {
            return true;
        }

        let bpp = self.depth as usize / 8;
        let visible_cols = block.width.min(self.width - x) as usize;
        let visible_rows = block.height.min(self.height - y);
        let copy_len = visible_cols * bpp;

        let mut pixels = self.lock();
        for row in 0..visible_rows {
            let dst = (y + row) as usize * self.pitch + x as usize * bpp;
            pixels[dst..dst + copy_len].copy_from_slice(&block.row(row)[..copy_len]);
        }
        true
    }

    /// Read the whole buffer under the lock.
    pub fn with_pixels<R>(&self, read: impl FnOnce(&[u8]) -> R) -> R {
        let pixels = self.lock();
        read(&pixels)
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.with_pixels(|p| p.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_of_a_16_bit_panel() {
        let fb = FrameBuffer::new(320, 240, 16);
        assert_eq!(fb.pitch(), 640);
        assert_eq!(fb.size(), 153_600);
        assert_eq!(fb.snapshot().len(), fb.size());
    }

    #[test]
    fn write_rows_starts_at_row_offset() {
        let fb = FrameBuffer::new(4, 4, 16);
        let written = fb.write_rows(1, 16, |dst| {
            dst.fill(0xAB);
            dst.len()
        });
        assert_eq!(written, 16);

        let pixels = fb.snapshot();
        assert!(pixels[..8].iter().all(|&b| b == 0));
        assert!(pixels[8..24].iter().all(|&b| b == 0xAB));
        assert!(pixels[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn write_rows_clamps_at_end() {
        let fb = FrameBuffer::new(4, 4, 16);
        assert_eq!(fb.write_rows(3, 100, |dst| dst.len()), 8);
        assert_eq!(fb.write_rows(9, 100, |dst| dst.len()), 0);
    }

    #[test]
    fn blit_places_block_at_offset() {
        let fb = FrameBuffer::new(4, 4, 16);
        let pixels = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let block = DecodedBlock { left: 0, top: 0, width: 2, height: 2, depth: 16, pixels: &pixels };

        assert!(fb.blit(1, 2, &block));
        let out = fb.snapshot();
        assert_eq!(&out[2 * 8 + 2..2 * 8 + 6], &[1, 2, 3, 4]);
        assert_eq!(&out[3 * 8 + 2..3 * 8 + 6], &[5, 6, 7, 8]);
        assert_eq!(out.iter().filter(|&&b| b != 0).count(), 8);
    }

    #[test]
    fn blit_clips_and_rejects() {
        let fb = FrameBuffer::new(4, 4, 16);
        let pixels = [9u8; 3 * 3 * 2];
        let block = DecodedBlock { left: 0, top: 0, width: 3, height: 3, depth: 16, pixels: &pixels };

        assert!(fb.blit(2, 2, &block));
        assert_eq!(fb.snapshot().iter().filter(|&&b| b == 9).count(), 2 * 2 * 2);

        let deep = DecodedBlock { depth: 24, ..block };
        assert!(!fb.blit(0, 0, &deep));
    }

    #[test]
    fn blit_outside_the_buffer_draws_nothing() {
        let fb = FrameBuffer::new(4, 4, 16);
        let pixels = [9u8; 2 * 2 * 2];
        let block = DecodedBlock { left: 0, top: 0, width: 2, height: 2, depth: 16, pixels: &pixels };

        assert!(fb.blit(4, 0, &block));
        assert!(fb.blit(0, 4, &block));
        assert!(fb.blit(0, 200, &block));
        assert!(fb.snapshot().iter().all(|&b| b == 0));
    }

    #[test]
    fn flush_never_sees_half_of_one_write() {
        let fb = std::sync::Arc::new(FrameBuffer::new(64, 64, 16));
        let writer = {
            let fb = std::sync::Arc::clone(&fb);
            std::thread::spawn(move || {
                for value in 1..=50u8 {
                    fb.write_rows(0, fb.size(), |dst| {
                        for chunk in dst.chunks_mut(512) {
                            chunk.fill(value);
                            std::thread::yield_now();
                        }
                    });
                }
            })
        };

        for _ in 0..200 {
            fb.with_pixels(|pixels| {
                let first = pixels[0];
                assert!(pixels.iter().all(|&b| b == first));
            });
        }
        writer.join().unwrap();
    }
}
