use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::category::CategoryTable;
use crate::detect::{BackendRegistry, DetectorAdapter, StubBackend, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::pipeline::DetectionPipeline;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONNECTIONS: usize = 64;
const DEFAULT_CORS_ORIGIN: &str = "*";

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    categories_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
    read_timeout_secs: Option<u64>,
    max_connections: Option<usize>,
    cors_origin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    confidence: Option<f32>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    stub_detections: Option<PathBuf>,
}

/// Which inference backend the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl BackendKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "tract" | "onnx" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}' (expected stub or tract)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    pub read_timeout_secs: u64,
    pub max_connections: usize,
    /// Value of `Access-Control-Allow-Origin` on every response.
    pub cors_origin: String,
    pub categories_path: Option<PathBuf>,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub confidence: f32,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub stub_detections: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_addr: DEFAULT_API_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            categories_path: None,
            detector: DetectorSettings {
                backend: BackendKind::Stub,
                confidence: DEFAULT_CONFIDENCE_THRESHOLD,
                model_path: None,
                labels_path: None,
                stub_detections: None,
            },
        }
    }
}

impl ServiceConfig {
    /// Defaults, then the JSON file named by `WASTELENS_CONFIG`, then
    /// `WASTELENS_*` env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WASTELENS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let backend = match detector.backend.as_deref() {
            Some(value) => BackendKind::parse(value)?,
            None => defaults.detector.backend,
        };
        Ok(Self {
            api_addr: api.addr.unwrap_or(defaults.api_addr),
            max_body_bytes: api.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            read_timeout_secs: api.read_timeout_secs.unwrap_or(defaults.read_timeout_secs),
            max_connections: api.max_connections.unwrap_or(defaults.max_connections),
            cors_origin: api.cors_origin.unwrap_or(defaults.cors_origin),
            categories_path: file.categories_path,
            detector: DetectorSettings {
                backend,
                confidence: detector.confidence.unwrap_or(defaults.detector.confidence),
                model_path: detector.model_path,
                labels_path: detector.labels_path,
                stub_detections: detector.stub_detections,
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("WASTELENS_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(confidence) = non_empty_env("WASTELENS_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("WASTELENS_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(path) = non_empty_env("WASTELENS_CATEGORIES") {
            self.categories_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = non_empty_env("WASTELENS_BACKEND") {
            self.detector.backend = BackendKind::parse(&backend)?;
        }
        if let Some(path) = non_empty_env("WASTELENS_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("WASTELENS_LABELS_PATH") {
            self.detector.labels_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("WASTELENS_STUB_DETECTIONS") {
            self.detector.stub_detections = Some(PathBuf::from(path));
        }
        if let Some(max) = non_empty_env("WASTELENS_MAX_BODY_BYTES") {
            self.max_body_bytes = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("WASTELENS_MAX_BODY_BYTES must be an integer byte count"))?;
        }
        if let Some(max) = non_empty_env("WASTELENS_MAX_CONNECTIONS") {
            self.max_connections = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("WASTELENS_MAX_CONNECTIONS must be an integer"))?;
        }
        if let Some(origin) = non_empty_env("WASTELENS_CORS_ORIGIN") {
            self.cors_origin = origin.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let confidence = self.detector.confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "detector confidence must be within [0, 1], got {}",
                confidence
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("max_body_bytes must be greater than zero"));
        }
        if self.read_timeout_secs == 0 {
            return Err(anyhow!("read_timeout_secs must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("max_connections must be greater than zero"));
        }
        if self.cors_origin.trim().is_empty() || self.cors_origin.contains(['\r', '\n']) {
            return Err(anyhow!("cors_origin must be a single non-empty header value"));
        }
        if self.detector.backend == BackendKind::Tract {
            if self.detector.model_path.is_none() {
                return Err(anyhow!("tract backend requires a model path"));
            }
            if !cfg!(feature = "backend-tract") {
                return Err(anyhow!(
                    "tract backend requested but this build lacks the backend-tract feature"
                ));
            }
        }
        Ok(())
    }

    /// Builtin table unless a categories file is configured.
    pub fn category_table(&self) -> Result<CategoryTable> {
        match &self.categories_path {
            Some(path) => CategoryTable::load(path),
            None => CategoryTable::builtin(),
        }
    }

    /// The stub backend is always registered; tract is added and made the
    /// default when configured.
    pub fn backend_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        let stub = match &self.detector.stub_detections {
            Some(path) => StubBackend::from_json_file(path)?,
            None => StubBackend::new(),
        };
        registry.register(stub);
        if self.detector.backend == BackendKind::Tract {
            register_tract(&mut registry, &self.detector)?;
            registry.set_default("tract")?;
        }
        log::debug!(
            "backends: {} (default {})",
            registry.list().join(", "),
            registry.default_name().unwrap_or("none")
        );
        Ok(registry)
    }

    /// Category table + default backend, wired into a shareable pipeline.
    pub fn build_pipeline(&self) -> Result<DetectionPipeline> {
        let categories = self.category_table()?;
        log::info!("loaded {} category labels", categories.len());
        let registry = self.backend_registry()?;
        registry.warm_up_all().context("detector warm-up failed")?;
        let adapter = DetectorAdapter::from_registry(&registry)?
            .with_confidence_threshold(self.detector.confidence);
        Ok(DetectionPipeline::new(adapter, Arc::new(categories)))
    }
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, settings: &DetectorSettings) -> Result<()> {
    use crate::detect::backends::TractBackend;

    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
    let labels = match &settings.labels_path {
        Some(path) => TractBackend::read_labels(path)?,
        None => Vec::new(),
    };
    registry.register(TractBackend::new(model_path, labels)?);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, _settings: &DetectorSettings) -> Result<()> {
    Err(anyhow!(
        "tract backend requested but this build lacks the backend-tract feature"
    ))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
