#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};

const DEFAULT_INPUT_SIZE: u32 = 640;
const SCORE_FLOOR: f32 = 0.05;
const NMS_IOU_THRESHOLD: f64 = 0.45;
const MAX_DETECTIONS: usize = 100;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single `[1, 3, H, W]` float input and a `[1, 4 + classes, anchors]`
/// output with `cx, cy, w, h` in input pixels. The frame is stretched to the input
/// size and boxes are scaled back to native pixels.
///
/// It does not perform any network I/O or write to disk beyond model loading.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, labels: Vec<String>) -> Result<Self> {
        Self::with_input_size(model_path, labels, DEFAULT_INPUT_SIZE, DEFAULT_INPUT_SIZE)
    }

    pub fn with_input_size<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded ONNX detector {} ({}x{}, {} labels)",
            model_path.display(),
            width,
            height,
            labels.len()
        );

        Ok(Self {
            model,
            input_width: width,
            input_height: height,
            labels,
        })
    }

    /// Read a label list, one label per line. Blank lines are skipped.
    pub fn read_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels {}", path.display()))?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let image = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{} RGB", width, height))?;
        let resized = imageops::resize(
            &image,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    fn decode_output(
        &self,
        outputs: TVec<TValue>,
        width: u32,
        height: u32,
    ) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let rows = shape[1];
        let anchors = shape[2];
        let sx = f64::from(width) / f64::from(self.input_width);
        let sy = f64::from(height) / f64::from(self.input_height);

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::MIN);
            for c in 4..rows {
                let score = view[[0, c, a]];
                if score > best.1 {
                    best = (c - 4, score);
                }
            }
            // Floor before NMS; the adapter applies the service threshold afterwards.
            if best.1 < SCORE_FLOOR {
                continue;
            }
            let cx = f64::from(view[[0, 0, a]]);
            let cy = f64::from(view[[0, 1, a]]);
            let w = f64::from(view[[0, 2, a]]);
            let h = f64::from(view[[0, 3, a]]);
            let bbox = BoundingBox::new(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            );
            candidates.push(RawDetection::new(bbox, self.label_for(best.0), best.1));
        }

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD, MAX_DETECTIONS))
    }
}

/// Greedy class-aware NMS. Output is sorted by descending confidence.
pub(crate) fn non_max_suppression(
    mut detections: Vec<RawDetection>,
    iou_threshold: f64,
    max_detections: usize,
) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<RawDetection> = Vec::new();
    'outer: for det in detections {
        for k in &kept {
            if k.label == det.label && k.bbox.iou(&det.bbox) >= iou_threshold {
                continue 'outer;
            }
        }
        kept.push(det);
        if kept.len() >= max_detections {
            break;
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(outputs, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = vec![0u8; (self.input_width * self.input_height * 3) as usize];
        self.detect(&blank, self.input_width, self.input_height)
            .map(|_| ())
    }
}
