//! exabragg-engine: Structure-factor channels and diffraction accumulation.
//!
//! This crate provides:
//! - **[`EnergyChannelStore`]** - append-only per-energy structure-factor tables
//! - **[`StagedParameters`]** - device mirrors of the simulation parameters
//! - **[`ExascaleEngine`]** - per-panel Bragg, masked Bragg and background passes
//! - **[`ParallelDispatch`]** - the data-parallel backend seam ([`RayonDispatch`])
//!
//! The per-pixel physics is supplied by the caller through [`BraggKernel`] and
//! [`BackgroundKernel`].
//!

mod dispatch;
mod error;
mod kernel;
mod simulation;
mod staging;
mod structure_factors;

pub use dispatch::{ParallelDispatch, RayonDispatch};
pub use error::{Error, Result};
pub use kernel::{BackgroundInput, BackgroundKernel, BackgroundTable, BraggInput, BraggKernel};
pub use simulation::{active_pixel_list, EngineState, ExascaleEngine};
pub use staging::{StagedParameters, StagedSources, WaterConstants};
pub use structure_factors::{ChannelId, EnergyChannelStore, StructureFactorTable};

// Re-export core types for convenience
pub use exabragg_core::{
    Detector, DetectorGeometry, DetectorImageBuffer, HklBounds, KernelFault, PanelGeometry,
    PanelView, PixelAddress, PixelSample, SimulationParameters,
};
