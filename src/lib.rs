//! Wastelens: point-query waste detection.
//!
//! Given a frame and, optionally, the point a user tapped, this crate runs an
//! object detector, maps every detection to a waste category with disposal
//! guidance, and resolves the single detection under the tapped point.
//!
//! # Invariants
//!
//! 1. **Request-scoped frames**: a frame is decoded per request and dropped with
//!    the response. Detectors see a read-only pixel slice.
//! 2. **Validated detections**: every detection leaving the adapter has an
//!    ordered box clamped to the frame and a confidence at or above threshold.
//! 3. **Total category lookup**: an unmapped label resolves to `Unknown`, never
//!    to an error.
//! 4. **First in order wins**: overlapping boxes under a query point resolve to
//!    the earliest detection.
//! 5. **Explicit geometry**: display ↔ native transforms take their geometry as
//!    an argument, captured with the point.
//!
//! # Module Structure
//!
//! - `frame`: decoded frame container
//! - `detect`: detector adapter, backends, registry
//! - `category`: label → category table
//! - `geometry`: display ↔ native coordinates
//! - `matcher`: point → detection
//! - `pipeline`: enrichment and response assembly
//! - `annotate`: drawing detections onto a frame copy
//! - `api`: HTTP service
//! - `config`: service configuration

pub mod annotate;
pub mod api;
pub mod category;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod matcher;
pub mod pipeline;

pub use category::{CategoryRecord, CategoryTable, WasteCategory};
pub use detect::{BoundingBox, DetectorAdapter, DetectorBackend, RawDetection};
pub use error::{DetectionFailure, Error, FailureKind, Result};
pub use frame::Frame;
pub use geometry::{DisplayGeometry, Point};
pub use pipeline::{
    DetectionPipeline, EnrichedDetection, PointQuery, PointQueryOutcome, PredictResponse,
    NO_DETECTION_AT_POINT,
};
