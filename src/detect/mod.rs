//! Detector adapter and the backends behind it.
//!
//! - `DetectorBackend`: the opaque model (frame pixels in, raw boxes out).
//! - `BackendRegistry`: named backends, one default.
//! - `DetectorAdapter`: the only thing the pipeline talks to. Runs a backend,
//!   validates boxes, applies the confidence threshold and maps errors to
//!   `DetectionFailure`.

mod adapter;
mod backend;
pub mod backends;
mod registry;
mod result;

pub use adapter::{DetectorAdapter, DEFAULT_CONFIDENCE_THRESHOLD};
pub use backend::DetectorBackend;
pub use backends::StubBackend;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, RawDetection};
