//! Engine error types.

use exabragg_core::KernelFault;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Amplitude count does not match the store's reciprocal-space grid.
    #[error("structure factor table has {actual} amplitudes, expected {expected} for the store bounds")]
    TableSizeMismatch { expected: usize, actual: usize },

    /// Miller index outside the store bounds.
    #[error("Miller index ({h}, {k}, {l}) lies outside the store bounds")]
    MillerOutOfBounds { h: i32, k: i32, l: i32 },

    /// Two parallel input arrays differ in length.
    #[error("{what}: {left} vs {right} entries")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    /// Channel id not present in the store.
    #[error("energy channel {channel} not found (store holds {count} channels)")]
    UnknownChannel { channel: usize, count: usize },

    /// Requested table range is not inside the table.
    #[error("range [{first}, {last}) is invalid for a table of {len} amplitudes")]
    InvalidRange {
        first: usize,
        last: usize,
        len: usize,
    },

    /// Accumulation attempted before `allocate`.
    #[error("engine parameters have not been allocated")]
    NotAllocated,

    /// Panel mask does not cover the detector frame.
    #[error("panel mask has {actual} entries, detector frame has {expected}")]
    MaskLengthMismatch { expected: usize, actual: usize },

    /// Image buffers were not sized for the detector geometry.
    #[error("image buffer {what} is {actual}, geometry describes {expected}")]
    ImageSizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A kernel failed. Fatal for the simulation run.
    #[error("{kernel} kernel failed (channel {channel:?}, panel {panel:?}): {fault}")]
    KernelFault {
        kernel: &'static str,
        channel: Option<usize>,
        panel: Option<usize>,
        #[source]
        fault: KernelFault,
    },

    /// The dispatch backend could not be created.
    #[error("parallel dispatch error: {0}")]
    Dispatch(String),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] exabragg_core::Error),
}

impl Error {
    /// Returns true for errors that invalidate the whole simulation run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::KernelFault { .. })
    }
}
