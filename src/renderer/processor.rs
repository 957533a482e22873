use rayon::prelude::*;

use crate::decoder::block::rgb888_from_565_be;

/// One terminal cell: an upper-half block whose foreground is the top pixel
/// and background the bottom pixel.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CellData {
    pub char: char,
    pub fg: (u8, u8, u8),
    pub bg: (u8, u8, u8),
}

impl Default for CellData {
    fn default() -> Self {
        Self { char: ' ', fg: (0, 0, 0), bg: (0, 0, 0) }
    }
}

/// Downsamples an RGB565 backbuffer onto a grid of half-block cells.
pub struct FrameProcessor {
    src_width: usize,
    src_height: usize,
    step: usize,
    pub cols: usize,
    pub rows: usize,
}

impl FrameProcessor {
    /// Pick the smallest integer step that fits the source into
    /// `max_cols` x `max_rows` cells (two pixel rows per cell).
    pub fn new(src_width: usize, src_height: usize, max_cols: usize, max_rows: usize) -> Self {
        let max_cols = max_cols.max(1);
        let max_rows = max_rows.max(1);
        let step_x = src_width.div_ceil(max_cols);
        let step_y = src_height.div_ceil(max_rows * 2);
        let step = step_x.max(step_y).max(1);

        Self {
            src_width,
            src_height,
            step,
            cols: (src_width / step).max(1),
            rows: (src_height / (step * 2)).max(1),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cols * self.rows
    }

    pub fn process_frame_into(&self, pixel_data: &[u8], cells: &mut [CellData]) {
        if cells.len() != self.cell_count() {
            return;
        }

        let cols = self.cols;
        let step = self.step;
        let src_w = self.src_width;
        let src_h = self.src_height;

        let get_pixel = |x: usize, y: usize| -> (u8, u8, u8) {
            if x >= src_w || y >= src_h {
                return (0, 0, 0);
            }
            let offset = (y * src_w + x) * 2;
            if offset + 1 < pixel_data.len() {
                rgb888_from_565_be(pixel_data[offset], pixel_data[offset + 1])
            } else {
                (0, 0, 0)
            }
        };

        cells.par_chunks_mut(cols).enumerate().for_each(|(cy, row)| {
            let py_top = cy * step * 2;
            let py_bottom = py_top + step;
            for (cx, cell) in row.iter_mut().enumerate() {
                let px = cx * step;
                *cell = CellData {
                    char: '▀',
                    fg: get_pixel(px, py_top),
                    bg: get_pixel(px, py_bottom),
                };
            }
        });
    }
}
