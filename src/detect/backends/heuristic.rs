use image::RgbImage;

use crate::detect::detector::{
    Detection, HelmetFinder, StrategyKind, LABEL_HELMET_CANDIDATE,
};
use crate::geometry::BoundingBox;

/// Fraction of the person box (from the top) scanned for helmet-colored pixels.
const HEAD_SCAN_FRACTION: f32 = 0.25;
/// Minimum fraction of helmet-colored pixels in the scan region to emit a candidate.
const MIN_COVERAGE: f32 = 0.04;
/// Heuristic candidates never report more than this confidence.
const MAX_CONFIDENCE: f32 = 0.9;

/// Color-based helmet candidate finder.
///
/// Scans the upper slice of a person box for saturated high-visibility pixels
/// (yellow, orange, red, blue) and bright white, and emits the bounding box of
/// the matched pixels as a single candidate. Deterministic; a replaceable
/// stand-in for a dedicated helmet model.
pub struct ColorHeuristicFinder;

impl ColorHeuristicFinder {
    pub fn new() -> Self {
        Self
    }

    fn is_helmet_colored(r: u8, g: u8, b: u8) -> bool {
        let (r, g, b) = (r as i32, g as i32, b as i32);
        let bright = r + g + b > 180;
        if !bright {
            return false;
        }
        // High-vis yellow/orange: strong red+green, weak blue.
        let yellow = r > 140 && g > 110 && b < g - 40 && b < r - 40;
        // Safety red: dominant red channel.
        let red = r > 150 && r > g + 70 && r > b + 70;
        // Safety blue: dominant blue channel.
        let blue = b > 130 && b > r + 50 && b > g + 30;
        // White helmet: all channels high and close together.
        let white = r > 190 && g > 190 && b > 190 && (r - b).abs() < 40 && (r - g).abs() < 40;
        yellow || red || blue || white
    }
}

impl Default for ColorHeuristicFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl HelmetFinder for ColorHeuristicFinder {
    fn name(&self) -> &'static str {
        "color_heuristic"
    }

    fn find_candidates(&self, image: &RgbImage, person: &BoundingBox) -> Vec<Detection> {
        let scan = person.head_region(HEAD_SCAN_FRACTION);
        let x_min = scan.x1.max(0.0) as u32;
        let y_min = scan.y1.max(0.0) as u32;
        let x_max = (scan.x2.min(image.width() as f32) as u32).min(image.width());
        let y_max = (scan.y2.min(image.height() as f32) as u32).min(image.height());
        if x_max <= x_min || y_max <= y_min {
            return Vec::new();
        }

        let mut matched = 0u32;
        let (mut bx1, mut by1, mut bx2, mut by2) = (u32::MAX, u32::MAX, 0u32, 0u32);
        for y in y_min..y_max {
            for x in x_min..x_max {
                let px = image.get_pixel(x, y).0;
                if Self::is_helmet_colored(px[0], px[1], px[2]) {
                    matched += 1;
                    bx1 = bx1.min(x);
                    by1 = by1.min(y);
                    bx2 = bx2.max(x + 1);
                    by2 = by2.max(y + 1);
                }
            }
        }

        let total = (x_max - x_min) * (y_max - y_min);
        let coverage = matched as f32 / total as f32;
        if coverage < MIN_COVERAGE {
            return Vec::new();
        }

        let bbox = BoundingBox::new(bx1 as f32, by1 as f32, bx2 as f32, by2 as f32);
        let confidence = (coverage * 3.0).min(MAX_CONFIDENCE);
        vec![Detection::new(
            bbox,
            confidence,
            LABEL_HELMET_CANDIDATE,
            StrategyKind::ColorHeuristic,
        )]
    }
}
