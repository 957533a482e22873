use anyhow::Result;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode},
    style::Print,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use std::io::{BufWriter, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::processor::{CellData, FrameProcessor};
use super::Display;
use crate::core::frame_buffer::FrameBuffer;
use crate::sync::Telemetry;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum DisplayMode {
    Ascii,
    Rgb,
}

/// Presents the backbuffer on the controlling terminal with half-block
/// characters, redrawing only the cells that changed since the last flush.
/// Row 0 carries the infobar.
pub struct TerminalDisplay {
    stdout: BufWriter<Stdout>,
    mode: DisplayMode,
    processor: FrameProcessor,
    cells: Vec<CellData>,
    last_cells: Option<Vec<CellData>>,
    render_buffer: Vec<u8>,
    term_cols: u16,
    term_rows: u16,
    telemetry: Option<Arc<Telemetry>>,
}

impl TerminalDisplay {
    pub fn new(
        mode: DisplayMode,
        width: u32,
        height: u32,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Result<Self> {
        let (term_cols, term_rows) = terminal::size()?;
        // Leave the top row for the infobar.
        let processor = FrameProcessor::new(
            width as usize,
            height as usize,
            term_cols as usize,
            term_rows.saturating_sub(1) as usize,
        );
        debug!(
            "Terminal {}x{}, frame {}x{} drawn as {}x{} cells",
            term_cols, term_rows, width, height, processor.cols, processor.rows
        );

        let mut display = Self {
            stdout: BufWriter::with_capacity(1024 * 1024, std::io::stdout()),
            mode,
            cells: vec![CellData::default(); processor.cell_count()],
            processor,
            last_cells: None,
            render_buffer: Vec::with_capacity(1024 * 1024),
            term_cols,
            term_rows,
            telemetry,
        };
        display.initialize_terminal()?;
        Ok(display)
    }

    fn initialize_terminal(&mut self) -> Result<()> {
        terminal::enable_raw_mode()?;
        self.stdout.execute(EnterAlternateScreen)?;
        self.stdout.execute(cursor::Hide)?;
        // No line wrapping at the right edge.
        self.stdout.execute(Print("\x1b[?7l"))?;
        Ok(())
    }

    #[inline(always)]
    fn write_u8_fast(buffer: &mut Vec<u8>, n: u8) {
        if n >= 100 {
            buffer.push(b'0' + n / 100);
        }
        if n >= 10 {
            buffer.push(b'0' + (n / 10) % 10);
        }
        buffer.push(b'0' + n % 10);
    }

    #[inline(always)]
    fn write_u16_fast(buffer: &mut Vec<u8>, n: u16) {
        let mut digits = [0u8; 5];
        let mut len = 0;
        let mut rest = n;
        loop {
            digits[len] = b'0' + (rest % 10) as u8;
            len += 1;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }
        buffer.extend(digits[..len].iter().rev());
    }

    fn move_to(buffer: &mut Vec<u8>, x: u16, y: u16) {
        buffer.extend_from_slice(b"\x1b[");
        Self::write_u16_fast(buffer, y + 1);
        buffer.push(b';');
        Self::write_u16_fast(buffer, x + 1);
        buffer.push(b'H');
    }

    fn write_color(buffer: &mut Vec<u8>, prefix: &[u8], color: (u8, u8, u8)) {
        buffer.extend_from_slice(prefix);
        Self::write_u8_fast(buffer, color.0);
        buffer.push(b';');
        Self::write_u8_fast(buffer, color.1);
        buffer.push(b';');
        Self::write_u8_fast(buffer, color.2);
        buffer.push(b'm');
    }

    fn ascii_for(color: (u8, u8, u8)) -> char {
        const ASCII_CHARS: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];
        let brightness = (color.0 as u32 * 299 + color.1 as u32 * 587 + color.2 as u32 * 114) / 1000;
        ASCII_CHARS[((brightness * (ASCII_CHARS.len() as u32 - 1)) / 255) as usize]
    }

    fn render_diff(&mut self) -> Result<()> {
        self.render_buffer.clear();
        let buffer = &mut self.render_buffer;

        // Synchronized update: the terminal shows the whole frame at once.
        buffer.extend_from_slice(b"\x1b[?2026h");

        let mut force_redraw = false;
        if self.last_cells.as_ref().map(|v| v.len()) != Some(self.cells.len()) {
            buffer.extend_from_slice(b"\x1b[2J");
            self.last_cells = Some(vec![CellData::default(); self.cells.len()]);
            force_redraw = true;
        }
        let Some(last_cells) = self.last_cells.as_mut() else {
            return Ok(());
        };

        if let Some(telemetry) = &self.telemetry {
            Self::move_to(buffer, 0, 0);
            buffer.extend_from_slice(b"\x1b[0m\x1b[32m");
            buffer.extend_from_slice(telemetry.status_line().as_bytes());
            buffer.extend_from_slice(b"\x1b[K\x1b[0m");
        }

        let width = self.processor.cols;
        let offset_x = self.term_cols.saturating_sub(width as u16) / 2;
        let offset_y = 1;

        let mut last_fg: Option<(u8, u8, u8)> = None;
        let mut last_bg: Option<(u8, u8, u8)> = None;
        let mut cursor: Option<(u16, u16)> = None;

        for (i, cell) in self.cells.iter().enumerate() {
            if !force_redraw && *cell == last_cells[i] {
                cursor = None;
                continue;
            }

            let target_x = (i % width) as u16 + offset_x;
            let target_y = (i / width) as u16 + offset_y;
            if target_x >= self.term_cols || target_y >= self.term_rows {
                cursor = None;
                continue;
            }

            if cursor != Some((target_x, target_y)) {
                Self::move_to(buffer, target_x, target_y);
            }

            match self.mode {
                DisplayMode::Rgb => {
                    if Some(cell.fg) != last_fg {
                        Self::write_color(buffer, b"\x1b[38;2;", cell.fg);
                        last_fg = Some(cell.fg);
                    }
                    if Some(cell.bg) != last_bg {
                        Self::write_color(buffer, b"\x1b[48;2;", cell.bg);
                        last_bg = Some(cell.bg);
                    }
                    let mut utf8 = [0u8; 4];
                    buffer.extend_from_slice(cell.char.encode_utf8(&mut utf8).as_bytes());
                }
                DisplayMode::Ascii => {
                    buffer.push(Self::ascii_for(cell.fg) as u8);
                }
            }

            last_cells[i] = *cell;
            cursor = Some((target_x + 1, target_y));
        }

        buffer.extend_from_slice(b"\x1b[0m");
        buffer.extend_from_slice(b"\x1b[?2026l");

        self.stdout.write_all(buffer)?;
        self.stdout.flush()?;
        Ok(())
    }
}

impl Display for TerminalDisplay {
    fn flush(&mut self, frame: &FrameBuffer) -> Result<()> {
        let processor = &self.processor;
        let cells = &mut self.cells;
        frame.with_pixels(|pixels| processor.process_frame_into(pixels, cells));
        self.render_diff()
    }

    fn poll_quit(&mut self) -> bool {
        match event::poll(Duration::from_millis(0)) {
            Ok(true) => matches!(
                event::read(),
                Ok(Event::Key(key)) if key.code == KeyCode::Char('q') || key.code == KeyCode::Esc
            ),
            _ => false,
        }
    }
}

impl Drop for TerminalDisplay {
    fn drop(&mut self) {
        let _ = self.stdout.execute(Print("\x1b[?7h"));
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}
