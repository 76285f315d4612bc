use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Axis-aligned box in native frame pixels, `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, point: Point) -> bool {
        self.x1 <= point.x && point.x <= self.x2 && self.y1 <= point.y && point.y <= self.y2
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Clamp into `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One box emitted by the model, before any waste vocabulary is attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: impl Into<BoundingBox>, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox: bbox.into(),
            label: label.into(),
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_edge_inclusive() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(b.contains(Point::new(0.0, 0.0)));
        assert!(b.contains(Point::new(10.0, 10.0)));
        assert!(b.contains(Point::new(10.0, 0.0)));
        assert!(!b.contains(Point::new(10.01, 5.0)));
        assert!(!b.contains(Point::new(5.0, -0.01)));
    }

    #[test]
    fn center_and_area() {
        let b = BoundingBox::new(2.0, 4.0, 6.0, 10.0);
        assert_eq!(b.center(), Point::new(4.0, 7.0));
        assert_eq!(b.area(), 24.0);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn serializes_as_array() {
        let det = RawDetection::new([1.0, 2.0, 3.0, 4.0], "plastic_bottle", 0.9);
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        let back: RawDetection = serde_json::from_value(json).unwrap();
        assert_eq!(back, det);
    }

    #[test]
    fn echoed_fractional_edge_is_contained() {
        let bbox = BoundingBox::new(0.3, 0.3, 10.0, 10.0);
        let text = serde_json::to_string(&bbox).unwrap();
        assert_eq!(text, "[0.3,0.3,10.0,10.0]");
        let shown: [f64; 4] = serde_json::from_str(&text).unwrap();
        assert!(bbox.contains(Point::new(shown[0], shown[1])));
    }
}
