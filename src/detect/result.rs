/// Raw class label as reported by a detector backend.
///
/// Models normally report a class name. When a class index has no name in
/// the model's label table the backend reports the bare index instead, which
/// normalizes to an invalid marker rather than failing the frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawLabel {
    Name(String),
    ClassIndex(u32),
}

impl From<&str> for RawLabel {
    fn from(name: &str) -> Self {
        RawLabel::Name(name.to_string())
    }
}

/// Axis-aligned box in normalized 0..1 coordinates (top-left origin).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One labeled detection on a frame. Ephemeral: produced and consumed
/// within a single frame's processing.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: RawLabel,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<RawLabel>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox: BoundingBox::default(),
        }
    }

    pub fn with_box(mut self, bbox: BoundingBox) -> Self {
        self.bbox = bbox;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox {
            x: 0.1,
            y: 0.1,
            w: 0.5,
            h: 0.5,
        };
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox {
            x: 0.0,
            y: 0.0,
            w: 0.2,
            h: 0.2,
        };
        let b = BoundingBox {
            x: 0.5,
            y: 0.5,
            w: 0.2,
            h: 0.2,
        };
        assert_eq!(a.iou(&b), 0.0);
    }
}
