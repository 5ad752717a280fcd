//! Staged (device-resident) copies of the simulation parameters.
//!
//! Staging happens once per configuration. Derived constants are computed
//! here so kernels never recompute them per pixel, and the polarization
//! vector is unitized up front.

use crate::{Error, Result};
use exabragg_core::{unitize, SimulationParameters, Vector4};

/// Water scattering constants used by the Bragg kernel's solvent term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterConstants {
    /// Water slab thickness (meters); zero disables the term.
    pub size: f64,
    /// Forward scattering factor of water.
    pub f: f64,
    /// Molecular weight of water.
    pub mw: f64,
}

impl Default for WaterConstants {
    fn default() -> Self {
        Self {
            size: 0.0,
            f: 2.57,
            mw: 18.0,
        }
    }
}

/// Source arrays in the column layout the kernels consume.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StagedSources {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub intensity: Vec<f64>,
    pub wavelength: Vec<f64>,
}

impl StagedSources {
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Device mirrors of everything the kernels read besides panel geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedParameters {
    /// `phisteps * mosaic_domains * oversample^2`.
    pub steps: usize,
    /// `pixel_size / oversample`.
    pub subpixel_size: f64,
    pub beam_vector: Vector4,
    pub spindle_vector: Vector4,
    pub a0: Vector4,
    pub b0: Vector4,
    pub c0: Vector4,
    /// Unit polarization vector (all zero for a degenerate input).
    pub polar_vector: Vector4,
    pub sources: StagedSources,
    /// Flattened row-major 3x3 rotation per mosaic domain.
    pub mosaic_umats: Vec<f64>,
    pub water: WaterConstants,
}

impl StagedParameters {
    /// Copies and derives everything the kernels need from `params`.
    ///
    /// # Errors
    /// Returns an error if `params` fails validation.
    pub fn stage(params: &SimulationParameters) -> Result<Self> {
        params.validate()?;

        let (polar_vector, _) = unitize(&params.polar_vector);

        let sources = StagedSources {
            x: params.sources.iter().map(|s| s.x).collect(),
            y: params.sources.iter().map(|s| s.y).collect(),
            z: params.sources.iter().map(|s| s.z).collect(),
            intensity: params.sources.iter().map(|s| s.intensity).collect(),
            wavelength: params.sources.iter().map(|s| s.wavelength).collect(),
        };

        Ok(Self {
            steps: params.steps(),
            subpixel_size: params.subpixel_size(),
            beam_vector: params.beam_vector,
            spindle_vector: params.spindle_vector,
            a0: params.a0,
            b0: params.b0,
            c0: params.c0,
            polar_vector,
            sources,
            mosaic_umats: params.mosaic_umats.iter().flatten().copied().collect(),
            water: WaterConstants::default(),
        })
    }

    /// Replaces the per-source intensity and wavelength arrays.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] unless both slices have one entry
    /// per staged source.
    pub fn restage_sources(&mut self, intensity: &[f64], wavelength: &[f64]) -> Result<()> {
        let count = self.sources.len();
        for (what, len) in [
            ("source intensities vs sources", intensity.len()),
            ("source wavelengths vs sources", wavelength.len()),
        ] {
            if len != count {
                return Err(Error::LengthMismatch {
                    what,
                    left: len,
                    right: count,
                });
            }
        }
        self.sources.intensity.clear();
        self.sources.intensity.extend_from_slice(intensity);
        self.sources.wavelength.clear();
        self.sources.wavelength.extend_from_slice(wavelength);
        Ok(())
    }

    /// Number of mosaic domains staged.
    #[must_use]
    pub fn mosaic_domains(&self) -> usize {
        self.mosaic_umats.len() / 9
    }
}
