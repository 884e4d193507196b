use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::analyze::PersonVerdict;

const COLOR_COMPLIANT: Rgb<u8> = Rgb([0, 200, 0]);
const COLOR_VIOLATION: Rgb<u8> = Rgb([220, 30, 30]);
const FONT_SIZE: f32 = 16.0;

/// Draws per-person verdict boxes onto a copy of the source image: green for
/// a worn helmet, red for a violation.
///
/// Labels need a font file; without one the annotator still draws boxes,
/// which keeps deployments working when no font is installed.
pub struct Annotator {
    font: Option<FontVec>,
    font_scale: PxScale,
}

impl Annotator {
    pub fn new() -> Self {
        Self {
            font: None,
            font_scale: PxScale::from(FONT_SIZE),
        }
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|_| anyhow::anyhow!("{} is not a usable font", path.display()))?;
        Ok(Self {
            font: Some(font),
            font_scale: PxScale::from(FONT_SIZE),
        })
    }

    pub fn draw_verdicts(&self, image: &mut RgbImage, verdicts: &[PersonVerdict]) {
        for verdict in verdicts {
            let color = if verdict.has_helmet {
                COLOR_COMPLIANT
            } else {
                COLOR_VIOLATION
            };

            let [x, y, w, h] = verdict.bbox.to_xywh();
            let x = x.max(0);
            let y = y.max(0);
            let w = (w.max(0) as u32).min(image.width().saturating_sub(x as u32));
            let h = (h.max(0) as u32).min(image.height().saturating_sub(y as u32));
            if w == 0 || h == 0 {
                continue;
            }

            let rect = Rect::at(x, y).of_size(w, h);
            draw_hollow_rect_mut(image, rect, color);
            // Second rectangle one pixel in, for visibility on busy scenes.
            if w > 2 && h > 2 {
                let inner = Rect::at(x + 1, y + 1).of_size(w - 2, h - 2);
                draw_hollow_rect_mut(image, inner, color);
            }

            if let Some(font) = &self.font {
                let label = if verdict.has_helmet {
                    format!("helmet {:.2}", verdict.helmet_confidence)
                } else {
                    "no helmet".to_string()
                };
                let text_y = (y - FONT_SIZE as i32 - 4).max(0);
                draw_text_mut(image, color, x, text_y, self.font_scale, font, &label);
            }
        }
    }

    /// Annotates the image and writes it to `out`. The output format follows
    /// the extension of `out`.
    pub fn render(
        &self,
        image: &RgbImage,
        verdicts: &[PersonVerdict],
        out: &Path,
    ) -> Result<()> {
        let mut annotated = image.clone();
        self.draw_verdicts(&mut annotated, verdicts);
        annotated
            .save(out)
            .with_context(|| format!("failed to write annotated image {}", out.display()))
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}
