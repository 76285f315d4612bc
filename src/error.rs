//! Pipeline error taxonomy.
//!
//! Only two things can fail a request: the detector (or the image it was given)
//! and the display geometry supplied with a point query. An unmapped label and a
//! point that hits no box are normal outcomes and never show up here.

use thiserror::Error;

/// What went wrong inside the detector adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The uploaded bytes are not a decodable image in a supported format.
    InvalidImage,
    /// The model backend itself failed.
    Model,
}

/// The detector could not produce a result for this frame.
///
/// Distinct from an empty detection list, which means "nothing found".
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{cause}")]
pub struct DetectionFailure {
    pub kind: FailureKind,
    pub cause: String,
}

impl DetectionFailure {
    pub fn invalid_image(cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InvalidImage,
            cause: cause.into(),
        }
    }

    pub fn model(cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Model,
            cause: cause.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionFailure),
    #[error("invalid display geometry: {0}")]
    InvalidGeometry(String),
}

impl Error {
    /// Stable machine-readable code for responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Detection(failure) => match failure.kind {
                FailureKind::InvalidImage => "invalid_image",
                FailureKind::Model => "detection_failed",
            },
            Error::InvalidGeometry(_) => "invalid_geometry",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
