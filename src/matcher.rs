//! Point-query matcher.
//!
//! Picks at most one detection whose box contains a native-space point.
//! Overlapping boxes are resolved by detection order: the first detection
//! that contains the point wins, regardless of confidence or box size. A point
//! that hits nothing is a normal outcome.

use crate::geometry::Point;
use crate::pipeline::EnrichedDetection;

/// Index of the first detection whose box contains `point` (edges inclusive).
pub fn find_at_point(detections: &[EnrichedDetection], point: Point) -> Option<usize> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return None;
    }
    detections.iter().position(|det| det.bbox.contains(point))
}

pub fn match_point(detections: &[EnrichedDetection], point: Point) -> Option<&EnrichedDetection> {
    find_at_point(detections, point).map(|idx| &detections[idx])
}
