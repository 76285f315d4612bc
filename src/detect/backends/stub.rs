use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Stub backend. Replays a fixed detection list for every frame.
///
/// Used by tests, by the CLI without a model, and by the service when no
/// inference backend is configured. The script is a JSON array of
/// `{"bbox": [x1, y1, x2, y2], "label": "...", "confidence": 0.9}`.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    script: Vec<RawDetection>,
    fail_with: Option<String>,
}

impl StubBackend {
    /// Stub that finds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(script: Vec<RawDetection>) -> Self {
        Self {
            script,
            fail_with: None,
        }
    }

    /// Stub that fails every call with the given cause.
    pub fn failing(cause: impl Into<String>) -> Self {
        Self {
            script: Vec::new(),
            fail_with: Some(cause.into()),
        }
    }

    /// Load a detection script from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read stub detections {}", path.display()))?;
        let script: Vec<RawDetection> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid stub detections {}", path.display()))?;
        Ok(Self::with_detections(script))
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        if let Some(cause) = &self.fail_with {
            return Err(anyhow!("{}", cause));
        }
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }
        Ok(self.script.clone())
    }
}
