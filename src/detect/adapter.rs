use std::sync::{Arc, Mutex};

use anyhow::anyhow;

use super::backend::DetectorBackend;
use super::registry::{BackendRegistry, SharedBackend};
use super::result::RawDetection;
use crate::error::DetectionFailure;
use crate::frame::Frame;

/// Detections below this confidence never leave the adapter.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Wraps one backend and enforces the raw detection invariants.
///
/// Every detection returned by `detect`:
/// - has `confidence` in `[max(threshold, 0), 1]`
/// - has `x1 < x2` and `y1 < y2`
/// - lies inside `[0, width] x [0, height]` of the frame it came from
///
/// Order is the backend's order. The adapter never reorders.
#[derive(Clone)]
pub struct DetectorAdapter {
    backend: SharedBackend,
    confidence_threshold: f32,
}

impl DetectorAdapter {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Convenience for tests and single-backend setups.
    pub fn from_backend<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self::new(Arc::new(Mutex::new(backend)))
    }

    /// Adapter over the registry's default backend.
    pub fn from_registry(registry: &BackendRegistry) -> anyhow::Result<Self> {
        let backend = registry
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        Ok(Self::new(backend))
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend.lock() {
            Ok(guard) => guard.name(),
            Err(_) => "poisoned",
        }
    }

    /// Run the backend on a frame.
    ///
    /// `Ok(vec![])` means the model found nothing. Any backend error is a
    /// `DetectionFailure`; nothing is retried.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionFailure> {
        let raw = {
            let mut guard = self
                .backend
                .lock()
                .map_err(|_| DetectionFailure::model("detector backend lock poisoned"))?;
            log::debug!(
                "running backend '{}' on {}x{} frame",
                guard.name(),
                frame.width(),
                frame.height()
            );
            frame
                .run_detector(&mut *guard)
                .map_err(|err| DetectionFailure::model(format!("{:#}", err)))?
        };

        let total = raw.len();
        let kept: Vec<RawDetection> = raw
            .into_iter()
            .filter_map(|det| self.validate(det, frame.width(), frame.height()))
            .collect();
        log::debug!(
            "backend returned {} detections, {} kept at threshold {:.2}",
            total,
            kept.len(),
            self.confidence_threshold
        );
        Ok(kept)
    }

    fn validate(&self, mut det: RawDetection, width: u32, height: u32) -> Option<RawDetection> {
        if !det.confidence.is_finite()
            || det.confidence < 0.0
            || det.confidence < self.confidence_threshold
        {
            return None;
        }
        det.confidence = det.confidence.min(1.0);

        if !det.bbox.is_finite() || det.bbox.x1 >= det.bbox.x2 || det.bbox.y1 >= det.bbox.y2 {
            log::warn!(
                "dropping invalid box {:?} for label '{}'",
                <[f64; 4]>::from(det.bbox),
                det.label
            );
            return None;
        }

        det.bbox = det.bbox.clamp_to(width, height);
        if det.bbox.x1 >= det.bbox.x2 || det.bbox.y1 >= det.bbox.y2 {
            log::warn!(
                "dropping box outside the {}x{} frame for label '{}'",
                width,
                height,
                det.label
            );
            return None;
        }
        Some(det)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::error::FailureKind;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![0u8; (width * height * 3) as usize], width, height).unwrap()
    }

    #[test]
    fn filters_by_confidence_and_keeps_order() {
        let adapter = DetectorAdapter::from_backend(StubBackend::with_detections(vec![
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "a", 0.4),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "b", 0.1),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "c", 0.9),
        ]))
        .with_confidence_threshold(0.3);

        let out = adapter.detect(&frame(20, 20)).unwrap();
        let labels: Vec<&str> = out.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "c"]);
    }

    #[test]
    fn confidence_bounds() {
        let adapter = DetectorAdapter::from_backend(StubBackend::with_detections(vec![
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "at", 0.3),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "over", 1.7),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "nan", f32::NAN),
        ]))
        .with_confidence_threshold(0.3);
        let out = adapter.detect(&frame(20, 20)).unwrap();
        let labels: Vec<&str> = out.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["at", "over"]);
        assert_eq!(out[0].confidence, 0.3);
        assert_eq!(out[1].confidence, 1.0);

        let adapter = DetectorAdapter::from_backend(StubBackend::with_detections(vec![
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "negative", -0.2),
            RawDetection::new([0.0, 0.0, 10.0, 10.0], "zero", 0.0),
        ]))
        .with_confidence_threshold(0.0);
        let out = adapter.detect(&frame(20, 20)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "zero");
    }

    #[test]
    fn clamps_and_drops_degenerate_boxes() {
        let adapter = DetectorAdapter::from_backend(StubBackend::with_detections(vec![
            RawDetection::new([-5.0, -5.0, 30.0, 12.0], "clamped", 0.9),
            RawDetection::new([8.0, 8.0, 4.0, 12.0], "inverted", 0.9),
            RawDetection::new([25.0, 25.0, 40.0, 40.0], "outside", 0.9),
            RawDetection::new([f64::NAN, 0.0, 4.0, 4.0], "nan", 0.9),
        ]));

        let out = adapter.detect(&frame(20, 20)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "clamped");
        assert_eq!(<[f64; 4]>::from(out[0].bbox), [0.0, 0.0, 20.0, 12.0]);
    }

    #[test]
    fn empty_result_is_success() {
        let adapter = DetectorAdapter::from_backend(StubBackend::new());
        assert_eq!(adapter.detect(&frame(4, 4)).unwrap(), Vec::new());
    }

    #[test]
    fn backend_error_is_detection_failure() {
        let adapter = DetectorAdapter::from_backend(StubBackend::failing("model exploded"));
        let err = adapter.detect(&frame(4, 4)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Model);
        assert!(err.cause.contains("model exploded"));
    }

    #[test]
    fn from_registry_uses_default() {
        let mut registry = BackendRegistry::new();
        assert!(DetectorAdapter::from_registry(&registry).is_err());
        registry.register(StubBackend::new());
        let adapter = DetectorAdapter::from_registry(&registry).unwrap();
        assert_eq!(adapter.backend_name(), "stub");
    }
}
