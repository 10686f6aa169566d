use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use thiserror::Error;

/// Scale applied to the built-in 5x7 glyphs. Scale 1 is the smallest
/// legible size; labels are drawn at twice that.
pub const BUILTIN_SCALE: u32 = 2;
const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SPACING: u32 = 1;

/// Pixel size used with a TrueType font.
pub const TRUETYPE_PX: f32 = 24.0;

#[derive(Debug, Error)]
pub enum FontError {
    #[error("failed to read font file: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a usable font file")]
    Invalid,
}

/// Font used for detection labels.
pub enum LabelFont {
    /// Bitmap font compiled into the crate; always available.
    Builtin,
    TrueType(FontVec),
}

impl std::fmt::Debug for LabelFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelFont::Builtin => f.write_str("LabelFont::Builtin"),
            LabelFont::TrueType(_) => f.write_str("LabelFont::TrueType"),
        }
    }
}

impl LabelFont {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FontError> {
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data).map_err(|_| FontError::Invalid)?;
        Ok(LabelFont::TrueType(font))
    }

    /// Width and height of `text` as it would be drawn.
    pub fn text_size(&self, text: &str) -> (u32, u32) {
        match self {
            LabelFont::Builtin => {
                let chars = text.chars().count() as u32;
                if chars == 0 {
                    return (0, GLYPH_HEIGHT * BUILTIN_SCALE);
                }
                let advance = (GLYPH_WIDTH + GLYPH_SPACING) * BUILTIN_SCALE;
                (
                    chars * advance - GLYPH_SPACING * BUILTIN_SCALE,
                    GLYPH_HEIGHT * BUILTIN_SCALE,
                )
            }
            LabelFont::TrueType(font) => text_size(PxScale::from(TRUETYPE_PX), font, text),
        }
    }

    pub fn draw(&self, canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
        match self {
            LabelFont::Builtin => draw_builtin(canvas, color, x, y, text),
            LabelFont::TrueType(font) => {
                draw_text_mut(canvas, color, x, y, PxScale::from(TRUETYPE_PX), font, text)
            }
        }
    }
}

fn draw_builtin(canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
    let (width, height) = (canvas.width() as i32, canvas.height() as i32);
    let scale = BUILTIN_SCALE as i32;
    let advance = ((GLYPH_WIDTH + GLYPH_SPACING) * BUILTIN_SCALE) as i32;

    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as i32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH as i32 {
                if bits & (1 << (GLYPH_WIDTH as i32 - 1 - col)) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = origin_x + col * scale + dx;
                        let py = y + row as i32 * scale + dy;
                        if px >= 0 && py >= 0 && px < width && py < height {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
    }
}

/// Rows of a 5x7 glyph, most significant of the low five bits is the
/// leftmost column. Lowercase letters share the uppercase shapes.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ' ' => [0; 7],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        // unknown characters render as a hollow box
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_text_size_is_doubled() {
        let font = LabelFont::Builtin;
        assert_eq!(font.text_size("a"), (10, 14));
        assert_eq!(font.text_size("ab"), (22, 14));
        assert_eq!(font.text_size(""), (0, 14));
    }

    #[test]
    fn builtin_draw_stays_inside_canvas() {
        let mut canvas = RgbImage::new(12, 12);
        LabelFont::Builtin.draw(&mut canvas, Rgb([255, 255, 255]), -4, -4, "dog 0.99");
        assert!(canvas.pixels().any(|p| p.0 == [255, 255, 255]));
    }

    #[test]
    fn glyph_rows_use_five_bits() {
        for c in "abcdefghijklmnopqrstuvwxyz0123456789 -_.:?".chars() {
            assert!(glyph(c).iter().all(|row| *row < 32), "{c}");
        }
    }
}
