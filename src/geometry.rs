use serde::{Deserialize, Serialize};

/// Fraction of a person box, from the top, treated as the head region when
/// matching helmet candidates.
pub const HEAD_REGION_FRACTION: f32 = 0.30;
/// Minimum head-restricted IoU for a helmet candidate to count as "on the
/// head" of a person.
pub const HEAD_OVERLAP_THRESHOLD: f32 = 0.1;

/// Axis-aligned rectangle in pixel coordinates, corner-pair form.
///
/// The canonical geometry type throughout the crate; the origin+size form
/// `[x, y, w, h]` exists only at the output boundary via [`to_xywh`].
///
/// [`to_xywh`]: BoundingBox::to_xywh
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Origin+size form, rounded to whole pixels.
    pub fn to_xywh(&self) -> [i32; 4] {
        [
            self.x1.round() as i32,
            self.y1.round() as i32,
            self.width().round() as i32,
            self.height().round() as i32,
        ]
    }

    /// Intersection-over-union. Symmetric; 0.0 for disjoint, touching or
    /// degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Upper slice of this box: same horizontal extent, the top `fraction`
    /// of its height.
    pub fn head_region(&self, fraction: f32) -> BoundingBox {
        BoundingBox::new(self.x1, self.y1, self.x2, self.y1 + self.height() * fraction)
    }
}

/// Whether `candidate` overlaps the head region of `person` strongly enough
/// to be considered worn. Admission only: ranking among admitted candidates
/// is the caller's concern.
pub fn overlaps_head(person: &BoundingBox, candidate: &BoundingBox) -> bool {
    let head = person.head_region(HEAD_REGION_FRACTION);
    head.iou(candidate) > HEAD_OVERLAP_THRESHOLD
}
