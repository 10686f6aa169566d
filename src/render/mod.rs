//! Draws detections onto a copy of an image.

pub mod font;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detection::{BoundingBox, Detection};
use crate::error::ErrorKind;
use crate::palette::{ClassPalette, FALLBACK_COLOR};

pub use font::LabelFont;

#[derive(Debug, Clone, Copy)]
pub struct RenderStyle {
    pub stroke_width: u32,
    pub text_color: Rgb<u8>,
    pub fallback_color: Rgb<u8>,
    pub label_padding: u32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            stroke_width: 4,
            text_color: Rgb([255, 255, 255]),
            fallback_color: FALLBACK_COLOR,
            label_padding: 3,
        }
    }
}

/// A detection whose class id has no palette entry. It is still drawn,
/// with the fallback color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassIdOutOfRange {
    pub index: usize,
    pub class_id: usize,
    pub palette_len: usize,
}

impl ClassIdOutOfRange {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ClassIdOutOfRange
    }
}

impl std::fmt::Display for ClassIdOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "detection {} has class id {} but the palette only has {} classes",
            self.index, self.class_id, self.palette_len
        )
    }
}

#[derive(Debug, Clone)]
pub struct Rendered {
    pub image: RgbImage,
    pub warnings: Vec<ClassIdOutOfRange>,
}

/// Pixel rectangle `[x0, y0, x1, y1]` (inclusive) covered by a box, or
/// `None` if it falls outside the image. A box is half open in pixel
/// coordinates, so `[99.0, 100.0)` covers the last column of a 100 px image.
/// Boxes thinner than a pixel still cover one.
fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<[u32; 4]> {
    let span = |lo: f32, hi: f32, len: u32| -> Option<(u32, u32)> {
        if len == 0 || !lo.is_finite() || !hi.is_finite() || hi < lo {
            return None;
        }
        if hi <= 0.0 || lo >= len as f32 {
            return None;
        }
        let last = (len - 1) as f32;
        let start = lo.floor().clamp(0.0, last);
        let end = (hi.ceil() - 1.0).clamp(start, last);
        Some((start as u32, end as u32))
    };
    let (x0, x1) = span(bbox.x_min, bbox.x_max, width)?;
    let (y0, y1) = span(bbox.y_min, bbox.y_max, height)?;
    Some([x0, y0, x1, y1])
}

/// Top-left corner of a `label_w x label_h` background for a box: directly
/// above it when there is room, otherwise directly below, otherwise
/// inside along the top edge. Always within the image.
pub fn label_origin(
    rect: [u32; 4],
    label_w: u32,
    label_h: u32,
    width: u32,
    height: u32,
) -> (u32, u32) {
    let [x0, y0, _, y1] = rect;
    let x = x0.min(width.saturating_sub(label_w));
    let y = if y0 >= label_h {
        y0 - label_h
    } else if y1 + 1 + label_h <= height {
        y1 + 1
    } else {
        y0.min(height.saturating_sub(label_h))
    };
    (x, y)
}

pub struct Renderer {
    style: RenderStyle,
    font: LabelFont,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(RenderStyle::default(), LabelFont::Builtin)
    }
}

impl Renderer {
    pub fn new(style: RenderStyle, font: LabelFont) -> Self {
        Self { style, font }
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Draw every detection in order onto a copy of `image`.
    pub fn render(
        &self,
        image: &DynamicImage,
        detections: &[Detection],
        palette: &ClassPalette,
    ) -> Rendered {
        let mut canvas = image.to_rgb8();
        let mut warnings = Vec::new();

        for (index, detection) in detections.iter().enumerate() {
            let (name, color) = match palette.get(detection.class_id) {
                Some(entry) => (entry.name.clone(), entry.color.rgb()),
                None => {
                    warnings.push(ClassIdOutOfRange {
                        index,
                        class_id: detection.class_id,
                        palette_len: palette.len(),
                    });
                    (
                        format!("Class {}", detection.class_id),
                        self.style.fallback_color,
                    )
                }
            };
            let label = format!("{} {:.2}", name, detection.confidence);
            self.draw_detection(&mut canvas, &detection.bbox, color, &label);
        }

        for warning in &warnings {
            tracing::warn!("{warning}; drawn with fallback color");
        }
        Rendered {
            image: canvas,
            warnings,
        }
    }

    fn draw_detection(&self, canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, label: &str) {
        let (width, height) = canvas.dimensions();
        let Some(rect) = pixel_rect(bbox, width, height) else {
            return;
        };
        let [x0, y0, x1, y1] = rect;

        for t in 0..self.style.stroke_width {
            if x0 + t > x1.saturating_sub(t) || y0 + t > y1.saturating_sub(t) {
                break;
            }
            let w = x1 - x0 + 1 - 2 * t;
            let h = y1 - y0 + 1 - 2 * t;
            draw_hollow_rect_mut(
                canvas,
                Rect::at((x0 + t) as i32, (y0 + t) as i32).of_size(w, h),
                color,
            );
        }

        let pad = self.style.label_padding;
        let (text_w, text_h) = self.font.text_size(label);
        let label_w = (text_w + 2 * pad).min(width);
        let label_h = (text_h + 2 * pad).min(height);
        let (lx, ly) = label_origin(rect, label_w, label_h, width, height);
        draw_filled_rect_mut(
            canvas,
            Rect::at(lx as i32, ly as i32).of_size(label_w, label_h),
            color,
        );
        self.font.draw(
            canvas,
            self.style.text_color,
            (lx + pad) as i32,
            (ly + pad) as i32,
            label,
        );
    }
}
