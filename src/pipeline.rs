//! Result assembly: enrich, match, and shape responses.
//!
//! - `DetectionPipeline`: adapter + category table, shared across request threads.
//! - `EnrichedDetection`: one raw detection plus its category record, in detector order.
//! - `PointQueryOutcome`: full enriched list and the index of the matched detection.
//! - `PredictResponse`: the JSON payload served by `/predict` and printed by the CLI.
//!
//! A point query that hits nothing produces a success with reason
//! `NO_DETECTION_AT_POINT`. Only detector failures and bad geometry are errors.

use std::sync::Arc;

use serde::Serialize;

use crate::category::{self, CategoryRecord, CategoryTable, WasteCategory};
use crate::detect::{BoundingBox, DetectorAdapter, RawDetection};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::geometry::{self, DisplayGeometry, Point};
use crate::matcher;

/// Reason code for a point query that hit no detection.
pub const NO_DETECTION_AT_POINT: &str = "NO_DETECTION_AT_POINT";

#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedDetection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
    pub record: CategoryRecord,
}

impl EnrichedDetection {
    pub fn new(raw: RawDetection, record: CategoryRecord) -> Self {
        Self {
            bbox: raw.bbox,
            label: raw.label,
            confidence: raw.confidence,
            record,
        }
    }

    pub fn category(&self) -> WasteCategory {
        self.record.category
    }

    /// Estimated visible area in cm², rounded to 0.1.
    pub fn area_cm2(&self) -> f64 {
        round_to(category::area_cm2(self.bbox.area()), 1)
    }

    /// Tentative weight in kg, rounded to 0.01. `None` for categories that
    /// do not report a weight.
    pub fn tentative_weight_kg(&self) -> Option<f64> {
        let category = self.category();
        if !category.reports_weight() {
            return None;
        }
        let area = category::area_cm2(self.bbox.area());
        Some(round_to(category.estimate_weight_kg(area), 2))
    }
}

/// A single interaction: a point, and optionally the display geometry it was
/// captured against. Without geometry the point is in native pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointQuery {
    pub point: Point,
    pub geometry: Option<DisplayGeometry>,
}

impl PointQuery {
    pub fn native(point: Point) -> Self {
        Self {
            point,
            geometry: None,
        }
    }

    pub fn display(point: Point, geometry: DisplayGeometry) -> Self {
        Self {
            point,
            geometry: Some(geometry),
        }
    }

    fn native_point(&self) -> Result<Point> {
        match &self.geometry {
            Some(g) => geometry::to_native(self.point, g),
            None if self.point.x.is_finite() && self.point.y.is_finite() => Ok(self.point),
            None => Err(Error::InvalidGeometry(format!(
                "query point ({}, {}) is not finite",
                self.point.x, self.point.y
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PointQueryOutcome {
    /// Every enriched detection in detector order.
    pub detections: Vec<EnrichedDetection>,
    pub matched: Option<usize>,
    pub native_point: Point,
    pub geometry: Option<DisplayGeometry>,
}

impl PointQueryOutcome {
    pub fn matched(&self) -> Option<&EnrichedDetection> {
        self.matched.map(|idx| &self.detections[idx])
    }

    pub fn to_response(&self) -> Result<PredictResponse> {
        match self.matched() {
            Some(det) => Ok(PredictResponse {
                success: true,
                count: 1,
                results: vec![ResultItem::build(det, self.geometry.as_ref())?],
                reason: None,
            }),
            None => Ok(PredictResponse::no_detection_at_point()),
        }
    }
}

#[derive(Clone)]
pub struct DetectionPipeline {
    adapter: DetectorAdapter,
    categories: Arc<CategoryTable>,
}

impl DetectionPipeline {
    pub fn new(adapter: DetectorAdapter, categories: Arc<CategoryTable>) -> Self {
        Self {
            adapter,
            categories,
        }
    }

    pub fn adapter(&self) -> &DetectorAdapter {
        &self.adapter
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    /// Run the detector and attach a category record to every detection.
    pub fn detect_all(&self, frame: &Frame) -> Result<Vec<EnrichedDetection>> {
        let raw = self.adapter.detect(frame)?;
        Ok(raw
            .into_iter()
            .map(|det| {
                let record = self.categories.resolve(&det.label);
                EnrichedDetection::new(det, record)
            })
            .collect())
    }

    /// Resolve the detection under a query point.
    ///
    /// The point is transformed before inference runs, so bad geometry fails
    /// fast without touching the model.
    pub fn query_point(&self, frame: &Frame, query: PointQuery) -> Result<PointQueryOutcome> {
        let native_point = query.native_point()?;
        if let Some(g) = &query.geometry {
            if g.native_width != f64::from(frame.width()) || g.native_height != f64::from(frame.height()) {
                log::debug!(
                    "query geometry native size {}x{} differs from frame {}x{}",
                    g.native_width,
                    g.native_height,
                    frame.width(),
                    frame.height()
                );
            }
        }

        let detections = self.detect_all(frame)?;
        let matched = matcher::find_at_point(&detections, native_point);
        log::debug!(
            "point ({:.1}, {:.1}) matched {:?} of {} detections",
            native_point.x,
            native_point.y,
            matched,
            detections.len()
        );
        Ok(PointQueryOutcome {
            detections,
            matched,
            native_point,
            geometry: query.geometry,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultItem {
    pub bbox: [f64; 4],
    pub category: &'static str,
    pub object: String,
    #[serde(rename = "disposalInfoHTML")]
    pub disposal_info_html: String,
    pub confidence: f32,
    pub center: Point,
    #[serde(rename = "displayCenter", skip_serializing_if = "Option::is_none")]
    pub display_center: Option<Point>,
    pub area_cm2: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tentative_weight_kg: Option<f64>,
    pub color: String,
}

impl ResultItem {
    /// Item with native coordinates only.
    pub fn native(det: &EnrichedDetection) -> Self {
        Self {
            bbox: det.bbox.into(),
            category: det.category().display_name(),
            object: det.record.object_name.clone(),
            disposal_info_html: det.record.disposal_info.clone(),
            confidence: det.confidence,
            center: det.bbox.center(),
            display_center: None,
            area_cm2: det.area_cm2(),
            tentative_weight_kg: det.tentative_weight_kg(),
            color: det.category().color_hex(),
        }
    }

    pub fn build(det: &EnrichedDetection, geometry: Option<&DisplayGeometry>) -> Result<Self> {
        let mut item = Self::native(det);
        if let Some(g) = geometry {
            item.display_center = Some(geometry::to_display(item.center, g)?);
        }
        Ok(item)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub count: usize,
    pub results: Vec<ResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl PredictResponse {
    pub fn whole_image(detections: &[EnrichedDetection]) -> Self {
        let results: Vec<ResultItem> = detections.iter().map(ResultItem::native).collect();
        Self {
            success: true,
            count: results.len(),
            results,
            reason: None,
        }
    }

    pub fn no_detection_at_point() -> Self {
        Self {
            success: true,
            count: 0,
            results: Vec::new(),
            reason: Some(NO_DETECTION_AT_POINT),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;
    use crate::error::FailureKind;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![0u8; (width * height * 3) as usize], width, height).unwrap()
    }

    fn pipeline(script: Vec<RawDetection>) -> DetectionPipeline {
        DetectionPipeline::new(
            DetectorAdapter::from_backend(StubBackend::with_detections(script)),
            Arc::new(CategoryTable::builtin().unwrap()),
        )
    }

    #[test]
    fn plastic_bottle_hit_and_miss() {
        let p = pipeline(vec![RawDetection::new(
            [10.0, 20.0, 50.0, 80.0],
            "plastic_bottle",
            0.91,
        )]);
        let f = frame(100, 100);

        let hit = p.query_point(&f, PointQuery::native(Point::new(30.0, 40.0))).unwrap();
        let response = hit.to_response().unwrap();
        assert!(response.success);
        assert_eq!(response.count, 1);
        let item = &response.results[0];
        assert_eq!(item.category, "Dry Waste");
        assert_eq!(item.object, "plastic_bottle");
        assert_eq!(item.bbox, [10.0, 20.0, 50.0, 80.0]);
        assert_eq!(item.center, Point::new(30.0, 50.0));

        let miss = p.query_point(&f, PointQuery::native(Point::new(90.0, 90.0))).unwrap();
        assert_eq!(miss.matched, None);
        assert_eq!(miss.detections.len(), 1);
        let response = miss.to_response().unwrap();
        assert!(response.success);
        assert!(response.results.is_empty());
        assert_eq!(response.reason, Some(NO_DETECTION_AT_POINT));
    }

    #[test]
    fn display_point_is_scaled_before_matching() {
        let p = pipeline(vec![
            RawDetection::new([0.0, 0.0, 100.0, 100.0], "banana_peel", 0.8),
            RawDetection::new([150.0, 150.0, 200.0, 200.0], "battery", 0.8),
        ]);
        let f = frame(200, 200);
        // shown at half size: display (90, 90) is native (180, 180)
        let g = DisplayGeometry::new(100.0, 100.0, 200.0, 200.0);
        let outcome = p
            .query_point(&f, PointQuery::display(Point::new(90.0, 90.0), g))
            .unwrap();
        assert_eq!(outcome.matched, Some(1));
        assert_eq!(outcome.native_point, Point::new(180.0, 180.0));
        let item = &outcome.to_response().unwrap().results[0];
        assert_eq!(item.category, "Hazardous Waste");
        assert_eq!(item.display_center, Some(Point::new(87.5, 87.5)));
        assert_eq!(item.tentative_weight_kg, None);
    }

    #[test]
    fn whole_image_keeps_detector_order() {
        let p = pipeline(vec![
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "cell_phone", 0.7),
            RawDetection::new([20.0, 20.0, 30.0, 30.0], "mystery_blob", 0.6),
            RawDetection::new([5.0, 5.0, 40.0, 40.0], "cardboard", 0.9),
        ]);
        let dets = p.detect_all(&frame(50, 50)).unwrap();
        let response = PredictResponse::whole_image(&dets);
        assert_eq!(response.count, 3);
        let objects: Vec<&str> = response.results.iter().map(|r| r.object.as_str()).collect();
        assert_eq!(objects, vec!["cell_phone", "mystery_blob", "cardboard"]);
        assert_eq!(response.results[1].category, "Unknown");
        assert_eq!(response.results[1].disposal_info_html, category::UNKNOWN_DISPOSAL);
    }

    #[test]
    fn bad_geometry_fails_before_detection() {
        let p = DetectionPipeline::new(
            DetectorAdapter::from_backend(StubBackend::failing("should not run")),
            Arc::new(CategoryTable::builtin().unwrap()),
        );
        let g = DisplayGeometry::new(0.0, 100.0, 200.0, 200.0);
        let err = p
            .query_point(&frame(4, 4), PointQuery::display(Point::new(1.0, 1.0), g))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_geometry");
    }

    #[test]
    fn detector_failure_is_not_an_empty_result() {
        let p = DetectionPipeline::new(
            DetectorAdapter::from_backend(StubBackend::failing("weights missing")),
            Arc::new(CategoryTable::builtin().unwrap()),
        );
        match p.detect_all(&frame(4, 4)) {
            Err(Error::Detection(failure)) => assert_eq!(failure.kind, FailureKind::Model),
            other => panic!("expected detection failure, got {:?}", other),
        }
    }

    #[test]
    fn area_and_weight_follow_category() {
        let p = pipeline(vec![
            RawDetection::new([0.0, 0.0, 50.0, 40.0], "plastic_bottle", 0.9),
            RawDetection::new([0.0, 0.0, 200.0, 200.0], "brick", 0.9),
        ]);
        let dets = p.detect_all(&frame(300, 300)).unwrap();
        // 2000 px² = 20 cm², 200 cm³ at 0.001 kg/cm³
        assert_eq!(dets[0].area_cm2(), 20.0);
        assert_eq!(dets[0].tentative_weight_kg(), Some(0.2));
        assert_eq!(dets[1].area_cm2(), 400.0);
        assert_eq!(dets[1].tentative_weight_kg(), None);
    }

    #[test]
    fn response_serialises_wire_names() {
        let p = pipeline(vec![RawDetection::new([0.0, 0.0, 10.0, 10.0], "plastic_bottle", 0.5)]);
        let dets = p.detect_all(&frame(20, 20)).unwrap();
        let json = serde_json::to_value(PredictResponse::whole_image(&dets)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["count"], 1);
        assert!(json.get("reason").is_none());
        let item = &json["results"][0];
        assert!(item["disposalInfoHTML"].as_str().unwrap().contains("<br>"));
        assert_eq!(item["center"]["x"], 5.0);
        assert_eq!(item["color"], "#00FF00");
        assert!(item.get("displayCenter").is_none());

        let miss = serde_json::to_value(PredictResponse::no_detection_at_point()).unwrap();
        assert_eq!(miss["reason"], "NO_DETECTION_AT_POINT");
        assert_eq!(miss["results"].as_array().unwrap().len(), 0);
    }
}
