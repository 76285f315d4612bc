use anyhow::Result;

use super::result::RawDetection;

/// Detector backend trait: the opaque model behind the adapter.
///
/// Implementations receive the frame as a borrowed, read-only RGB24 slice and
/// return boxes in native pixel coordinates, in the model's own order.
///
/// Implementations MUST NOT:
/// - Keep the pixel slice beyond the `detect` call
/// - Keep per-request buffers that a later request could observe
///
/// Errors are plain `anyhow` errors; the adapter turns them into `DetectionFailure`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
