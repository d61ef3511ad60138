//! Multi-line text rasterisation.
//!
//! Text is split on line breaks and each line is trimmed. Lines that end up
//! empty are skipped entirely: they neither draw nor advance the caret, so
//! `"a\n\nb"` places `b` exactly one `line_step` below `a`.

use crate::{
    buffer::PixelBuffer,
    font::{GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH, glyph_bits},
};

pub const DEFAULT_LINE_STEP: i32 = 15;

/// Bitmap font settings; `intensity` is written to every channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Font {
    pub scale: u32,
    pub intensity: u8,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            scale: 1,
            intensity: 255,
        }
    }
}

impl Font {
    pub fn line_height(&self) -> u32 {
        GLYPH_HEIGHT.saturating_mul(self.scale.max(1))
    }

    pub fn text_width(&self, text: &str) -> u32 {
        let count = text.chars().count() as u32;
        if count == 0 {
            return 0;
        }
        let scale = self.scale.max(1);
        (count - 1)
            .saturating_mul(GLYPH_ADVANCE)
            .saturating_mul(scale)
            .saturating_add(GLYPH_WIDTH.saturating_mul(scale))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextOptions {
    /// Left edge of every line.
    pub x: i32,
    /// Baseline of the first rendered line.
    pub y: i32,
    pub line_step: i32,
    pub font: Font,
    /// Fill the target with black before drawing.
    pub clear: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            line_step: DEFAULT_LINE_STEP,
            font: Font::default(),
            clear: false,
        }
    }
}

/// One line of text and the caret it is drawn at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedLine<'a> {
    pub text: &'a str,
    pub x: i32,
    pub y: i32,
}

pub fn layout_lines(text: &str, x: i32, y: i32, line_step: i32) -> Vec<PlacedLine<'_>> {
    let mut caret = y;
    let mut placed = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        placed.push(PlacedLine {
            text: line,
            x,
            y: caret,
        });
        caret = caret.saturating_add(line_step);
    }
    placed
}

/// Copy `buffer` and composite `text` onto the copy.
pub fn draw_text(buffer: &PixelBuffer, text: &str, options: &TextOptions) -> PixelBuffer {
    let mut out = buffer.clone();
    draw_text_mut(&mut out, text, options);
    out
}

/// Draw `text` into `buffer` in place and return the number of lines drawn.
pub fn draw_text_mut(buffer: &mut PixelBuffer, text: &str, options: &TextOptions) -> usize {
    if options.clear {
        buffer.clear();
    }
    let lines = layout_lines(text, options.x, options.y, options.line_step);
    for line in &lines {
        draw_line(buffer, line, &options.font);
    }
    lines.len()
}

fn draw_line(buffer: &mut PixelBuffer, line: &PlacedLine<'_>, font: &Font) {
    let scale = i64::from(font.scale.max(1));
    let top = i64::from(line.y) - (i64::from(GLYPH_HEIGHT) * scale - 1);
    let (width, height) = (i64::from(buffer.width()), i64::from(buffer.height()));
    let mut origin = i64::from(line.x);
    for ch in line.text.chars() {
        if origin >= width {
            break;
        }
        if let Some(rows) = glyph_bits(ch) {
            for (row, pattern) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = origin + i64::from(col) * scale;
                    let py = top + row as i64 * scale;
                    // Only the part of the enlarged dot inside the buffer is visited.
                    let xs = px.max(0)..(px + scale).min(width);
                    let ys = py.max(0)..(py + scale).min(height);
                    for y in ys {
                        for x in xs.clone() {
                            buffer.set_level(x, y, font.intensity);
                        }
                    }
                }
            }
        }
        origin += i64::from(GLYPH_ADVANCE) * scale;
    }
}
