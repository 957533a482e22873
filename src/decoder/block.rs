/// A decoded rectangle of pixels, valid only for the duration of the
/// callback it is handed to.
#[derive(Debug, Clone, Copy)]
pub struct DecodedBlock<'a> {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// Bits per pixel.
    pub depth: u32,
    /// `height` rows of `width * depth / 8` bytes, tightly packed.
    pub pixels: &'a [u8],
}

impl<'a> DecodedBlock<'a> {
    pub fn row_bytes(&self) -> usize {
        self.width as usize * (self.depth as usize / 8)
    }

    pub fn row(&self, y: u32) -> &'a [u8] {
        let stride = self.row_bytes();
        let start = y as usize * stride;
        &self.pixels[start..start + stride]
    }
}

/// Pack an RGB888 pixel as big-endian RGB565, the panel's wire order.
#[inline(always)]
pub fn rgb565_be(r: u8, g: u8, b: u8) -> [u8; 2] {
    let value = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
    value.to_be_bytes()
}

/// Expand a big-endian RGB565 pixel back to RGB888.
#[inline(always)]
pub fn rgb888_from_565_be(hi: u8, lo: u8) -> (u8, u8, u8) {
    let value = u16::from_be_bytes([hi, lo]);
    let r = ((value >> 11) & 0x1F) as u8;
    let g = ((value >> 5) & 0x3F) as u8;
    let b = (value & 0x1F) as u8;
    ((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries_survive_565_packing() {
        assert_eq!(rgb565_be(255, 0, 0), [0xF8, 0x00]);
        assert_eq!(rgb565_be(0, 255, 0), [0x07, 0xE0]);
        assert_eq!(rgb565_be(0, 0, 255), [0x00, 0x1F]);

        assert_eq!(rgb888_from_565_be(0xF8, 0x00), (255, 0, 0));
        assert_eq!(rgb888_from_565_be(0xFF, 0xFF), (255, 255, 255));
    }

    #[test]
    fn rows_are_sliced_by_stride() {
        let pixels: Vec<u8> = (0..12).collect();
        let block = DecodedBlock { left: 0, top: 0, width: 3, height: 2, depth: 16, pixels: &pixels };
        assert_eq!(block.row_bytes(), 6);
        assert_eq!(block.row(1), &[6, 7, 8, 9, 10, 11]);
    }
}
