//! Error types for exabragg-core.

use thiserror::Error;

/// Result type alias for exabragg-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A simulation parameter failed validation.
    #[error("invalid simulation parameters: {0}")]
    InvalidParameters(String),

    /// Detector geometry arrays are inconsistent with the panel count.
    #[error("invalid detector geometry: {0}")]
    InvalidGeometry(String),

    /// Panel index past the last panel.
    #[error("panel {panel} out of range (detector has {panel_count} panels)")]
    PanelOutOfRange { panel: usize, panel_count: usize },

    /// Reciprocal-space bounds with max below min.
    #[error("invalid Miller index bounds on {axis}: min {min} > max {max}")]
    InvalidBounds { axis: char, min: i32, max: i32 },

    /// Configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a per-pixel kernel.
///
/// Kernel faults are not recoverable. The engine tags them with the
/// absolute frame offset of the failing pixel, wraps them with the kernel
/// name and channel/panel, and hands them back to the caller, which is
/// expected to abandon the run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (pixel offset {pixel:?})")]
pub struct KernelFault {
    /// Absolute pixel offset into the detector frame, once known.
    pub pixel: Option<usize>,
    /// Description provided by the kernel.
    pub message: String,
}

impl KernelFault {
    /// Creates a fault with no pixel attached yet.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            pixel: None,
            message: message.into(),
        }
    }

    /// Attaches the absolute frame offset of the failing pixel.
    #[must_use]
    pub fn at_pixel(mut self, offset: usize) -> Self {
        self.pixel = Some(offset);
        self
    }
}
