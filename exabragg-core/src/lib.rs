//! exabragg-core: Core types for multi-channel diffraction accumulation.
//!
//! This crate provides the data model shared by the engine: simulation
//! parameters and their JSON configuration, reciprocal-space bounds,
//! `[magnitude, x, y, z]` vector helpers, and multi-panel detector geometry
//! with its image buffers.
//!

pub mod bounds;
pub mod detector;
pub mod error;
pub mod params;
pub mod vector;

pub use bounds::{HklBounds, MillerIndex};
pub use detector::{
    Detector, DetectorGeometry, DetectorImageBuffer, PanelGeometry, PanelView, PixelAddress,
    PixelSample,
};
pub use error::{Error, KernelFault, Result};
pub use params::{CrystalShape, RegionOfInterest, SimulationParameters, Source};
pub use vector::{unitize, Vector4, VECTOR_LENGTH};
