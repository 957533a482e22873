use image::ImageFormat;
use tracing::debug;

use super::block::{rgb565_be, DecodedBlock};
use super::demux::{ChunkReader, SOI_MARKER};
use super::error::DemuxError;
use crate::storage::MediaStream;

/// Rows per emitted block: one MCU row at 2x2 chroma subsampling.
pub const BAND_ROWS: u32 = 16;

const SOF0: u8 = 0xC0;
const SOF1: u8 = 0xC1;
const DHT: u8 = 0xC4;
const DAC: u8 = 0xCC;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP14: u8 = 0xEE;
const APP15: u8 = 0xEF;
const COM: u8 = 0xFE;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub components: u8,
}

/// Baseline JPEG decoder fed through a [`ChunkReader`].
///
/// `prepare` walks the marker segments up to the start of scan, keeping the
/// tables the decoder needs and seeking over application data and comments.
/// `decompress` pulls the entropy-coded data up to the end-of-image marker,
/// decodes it and hands the picture out in full-width bands of RGB565.
pub struct BlockDecoder {
    header_bytes: Vec<u8>,
    frame: Vec<u8>,
    band: Vec<u8>,
    header: Option<FrameHeader>,
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self {
            header_bytes: Vec::with_capacity(1024),
            frame: Vec::new(),
            band: Vec::new(),
            header: None,
        }
    }

    pub fn prepare<S: MediaStream + ?Sized>(
        &mut self,
        input: &mut ChunkReader,
        stream: &mut S,
    ) -> Result<FrameHeader, DemuxError> {
        self.header = None;
        self.header_bytes.clear();

        let mut soi = [0u8; 2];
        input.read_exact(stream, &mut soi)?;
        if soi != SOI_MARKER {
            return Err(DemuxError::prepare(format!(
                "expected start-of-image, found {:02X} {:02X}",
                soi[0], soi[1]
            )));
        }
        self.header_bytes.extend_from_slice(&SOI_MARKER);

        let mut header = None;
        loop {
            let marker = Self::next_marker(input, stream)?;

            match marker {
                EOI => return Err(DemuxError::prepare("end-of-image before start of scan")),
                0x01 | 0xD0..=0xD7 => {
                    self.header_bytes.extend_from_slice(&[0xFF, marker]);
                    continue;
                }
                _ => {}
            }

            let length = input.read_u16_be(stream)?;
            if length < 2 {
                return Err(DemuxError::prepare(format!(
                    "segment {:02X} has invalid length {}",
                    marker, length
                )));
            }
            let payload = (length - 2) as usize;

            let keep = matches!(marker, APP0 | APP14);
            if ((APP0..=APP15).contains(&marker) && !keep) || marker == COM {
                debug!("Skipping segment {:02X} ({} bytes)", marker, payload);
                input.skip(stream, payload)?;
                continue;
            }

            let start = self.header_bytes.len();
            self.header_bytes.extend_from_slice(&[0xFF, marker]);
            self.header_bytes.extend_from_slice(&length.to_be_bytes());
            self.header_bytes.resize(start + 4 + payload, 0);
            input.read_exact(stream, &mut self.header_bytes[start + 4..])?;

            match marker {
                SOF0 | SOF1 => {
                    header = Some(Self::parse_frame_header(&self.header_bytes[start + 4..])?);
                }
                0xC2..=0xCF if marker != DHT && marker != DAC => {
                    return Err(DemuxError::prepare(format!(
                        "unsupported frame type {:02X}, only baseline is decoded",
                        marker
                    )));
                }
                SOS => {
                    let header = header
                        .ok_or_else(|| DemuxError::prepare("start of scan before frame header"))?;
                    self.header = Some(header);
                    return Ok(header);
                }
                _ => {}
            }
        }
    }

    fn next_marker<S: MediaStream + ?Sized>(
        input: &mut ChunkReader,
        stream: &mut S,
    ) -> Result<u8, DemuxError> {
        let lead = input.read_u8(stream)?;
        if lead != 0xFF {
            return Err(DemuxError::prepare(format!("expected marker, found {:02X}", lead)));
        }
        let mut marker = input.read_u8(stream)?;
        // Fill bytes before a marker.
        while marker == 0xFF {
            marker = input.read_u8(stream)?;
        }
        Ok(marker)
    }

    fn parse_frame_header(payload: &[u8]) -> Result<FrameHeader, DemuxError> {
        if payload.len() < 6 {
            return Err(DemuxError::prepare("short frame header"));
        }
        let precision = payload[0];
        let height = u16::from_be_bytes([payload[1], payload[2]]) as u32;
        let width = u16::from_be_bytes([payload[3], payload[4]]) as u32;
        let components = payload[5];

        if precision != 8 {
            return Err(DemuxError::prepare(format!("unsupported sample precision {}", precision)));
        }
        if width == 0 || height == 0 {
            return Err(DemuxError::prepare(format!("invalid dimensions {}x{}", width, height)));
        }
        Ok(FrameHeader { width, height, components })
    }

    pub fn decompress<S, F>(
        &mut self,
        input: &mut ChunkReader,
        stream: &mut S,
        mut emit: F,
    ) -> Result<usize, DemuxError>
    where
        S: MediaStream + ?Sized,
        F: FnMut(&DecodedBlock<'_>) -> bool,
    {
        let header = self
            .header
            .take()
            .ok_or_else(|| DemuxError::decompress("no prepared frame"))?;

        self.frame.clear();
        self.frame.extend_from_slice(&self.header_bytes);
        input.read_to_boundary(stream, &mut self.frame)?;

        let image = image::load_from_memory_with_format(&self.frame, ImageFormat::Jpeg)
            .map_err(|e| DemuxError::decompress(e.to_string()))?
            .to_rgb8();
        if image.width() != header.width || image.height() != header.height {
            return Err(DemuxError::decompress(format!(
                "decoded {}x{}, header announced {}x{}",
                image.width(),
                image.height(),
                header.width,
                header.height
            )));
        }

        let width = header.width;
        let rgb = image.as_raw();
        let mut blocks = 0;
        let mut top = 0;
        while top < header.height {
            let rows = BAND_ROWS.min(header.height - top);
            let start = (top * width * 3) as usize;
            let end = start + (rows * width * 3) as usize;

            self.band.clear();
            for px in rgb[start..end].chunks_exact(3) {
                self.band.extend_from_slice(&rgb565_be(px[0], px[1], px[2]));
            }

            let block = DecodedBlock {
                left: 0,
                top,
                width,
                height: rows,
                depth: 16,
                pixels: &self.band,
            };
            if !emit(&block) {
                return Err(DemuxError::Output { left: 0, top });
            }
            blocks += 1;
            top += rows;
        }

        Ok(blocks)
    }
}

impl Default for BlockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decoder::demux::FrameDemuxer;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ExtendedColorType, Rgb, RgbImage};
    use std::io::Cursor;

    /// Baseline JPEG of a single flat colour.
    pub(crate) fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 95)
            .encode(image.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    /// Insert a COM segment right after SOI.
    fn with_comment(jpeg: &[u8], text: &[u8]) -> Vec<u8> {
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, COM]);
        out.extend_from_slice(&((text.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(text);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn close(a: u8, b: u8) -> bool {
        (a as i16 - b as i16).abs() <= 24
    }

    #[test]
    fn prepare_reads_dimensions() {
        let jpeg = solid_jpeg(40, 24, [200, 30, 30]);
        let mut stream = Cursor::new(jpeg);
        let mut demuxer = FrameDemuxer::new(64, 1 << 20);

        let header = demuxer.prepare(&mut stream).unwrap();
        assert_eq!((header.width, header.height, header.components), (40, 24, 3));
    }

    #[test]
    fn decodes_into_full_width_bands() {
        let jpeg = solid_jpeg(40, 24, [0, 0, 255]);
        let total = jpeg.len();
        let mut stream = Cursor::new(jpeg);
        let mut demuxer = FrameDemuxer::new(100, 1 << 20);

        demuxer.prepare(&mut stream).unwrap();
        let mut bands = Vec::new();
        let blocks = demuxer
            .decompress(&mut stream, |block| {
                bands.push((block.top, block.height, block.pixels.to_vec()));
                true
            })
            .unwrap();

        assert_eq!(blocks, 2);
        assert_eq!((bands[0].0, bands[0].1), (0, 16));
        assert_eq!((bands[1].0, bands[1].1), (16, 8));
        assert_eq!(bands[1].2.len(), 40 * 8 * 2);
        assert_eq!(demuxer.bytes_consumed(), total);
        assert!(demuxer.at_boundary());

        let (r, g, b) = crate::decoder::block::rgb888_from_565_be(bands[0].2[0], bands[0].2[1]);
        assert!(close(r, 0) && close(g, 0) && close(b, 255), "got {:?}", (r, g, b));
    }

    #[test]
    fn comment_segments_are_skipped_not_buffered() {
        let jpeg = with_comment(&solid_jpeg(16, 16, [10, 200, 10]), &[b'x'; 300]);
        let total = jpeg.len();
        let mut stream = Cursor::new(jpeg);
        let mut demuxer = FrameDemuxer::new(32, 1 << 20);

        demuxer.prepare(&mut stream).unwrap();
        let blocks = demuxer.decompress(&mut stream, |_| true).unwrap();
        assert_eq!(blocks, 1);
        assert_eq!(demuxer.bytes_consumed(), total);
    }

    #[test]
    fn missing_start_of_image_fails_prepare() {
        let mut stream = Cursor::new(vec![0x00, 0x01, 0x02, 0xFF, 0xD9, 0xAA]);
        let mut demuxer = FrameDemuxer::new(64, 1 << 20);

        let err = demuxer.prepare(&mut stream).unwrap_err();
        assert!(matches!(err, DemuxError::Prepare(_)));

        // Resync lands on the byte after the marker.
        demuxer.finish_frame(&mut stream).unwrap();
        assert_eq!(stream.position(), 5);
    }

    #[test]
    fn empty_stream_is_end_of_stream() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let mut demuxer = FrameDemuxer::new(64, 1 << 20);
        assert!(matches!(demuxer.prepare(&mut stream), Err(DemuxError::EndOfStream)));
    }

    #[test]
    fn rejected_block_aborts_the_frame() {
        let jpeg = solid_jpeg(16, 48, [255, 255, 255]);
        let mut stream = Cursor::new(jpeg);
        let mut demuxer = FrameDemuxer::new(256, 1 << 20);

        demuxer.prepare(&mut stream).unwrap();
        let mut seen = 0;
        let err = demuxer
            .decompress(&mut stream, |_| {
                seen += 1;
                seen < 2
            })
            .unwrap_err();
        assert!(matches!(err, DemuxError::Output { left: 0, top: 16 }));
        assert_eq!(seen, 2);
    }

    #[test]
    fn progressive_frame_fails_prepare_and_stream_resyncs() {
        let good = solid_jpeg(16, 16, [0, 255, 0]);
        // SOI, then a progressive frame header, then end-of-image.
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xC2, 0x00, 0x0B, 8, 0, 16, 0, 16, 1, 1, 0x11, 0, 0xFF, 0xD9];
        data.extend_from_slice(&good);
        let mut stream = Cursor::new(data);
        let mut demuxer = FrameDemuxer::new(128, 1 << 20);

        let err = demuxer.prepare(&mut stream).unwrap_err();
        assert!(matches!(err, DemuxError::Prepare(_)));
        demuxer.finish_frame(&mut stream).unwrap();
        assert_eq!(stream.position(), 17);

        demuxer.prepare(&mut stream).unwrap();
        assert_eq!(demuxer.decompress(&mut stream, |_| true).unwrap(), 1);
    }

    #[test]
    fn truncated_scan_never_leaks_into_the_next_frame() {
        let good = solid_jpeg(16, 16, [0, 255, 0]);
        let mut broken = good.clone();
        let cut = broken.len() - 40;
        broken.drain(cut..broken.len() - 2);

        let mut data = broken;
        data.extend_from_slice(&good);
        let mut stream = Cursor::new(data);
        let mut demuxer = FrameDemuxer::new(128, 1 << 20);

        let first = demuxer
            .prepare(&mut stream)
            .and_then(|_| demuxer.decompress(&mut stream, |_| true));
        if first.is_err() {
            demuxer.finish_frame(&mut stream).unwrap();
        }

        demuxer.prepare(&mut stream).unwrap();
        assert_eq!(demuxer.decompress(&mut stream, |_| true).unwrap(), 1);
    }
}
