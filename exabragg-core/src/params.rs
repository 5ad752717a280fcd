//! Host-side simulation parameters.
//!
//! [`SimulationParameters`] is the read-only bundle the engine stages once
//! per configuration. It can be built in code with the `with_*` setters or
//! loaded from JSON; missing JSON fields take the defaults below.
#![allow(clippy::doc_markdown, clippy::struct_excessive_bools)]

use crate::error::{Error, Result};
use crate::vector::Vector4;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Shape function used for the crystal lattice transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrystalShape {
    #[default]
    Square,
    Round,
    Gauss,
    Tophat,
}

/// A single X-ray source point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Relative intensity.
    pub intensity: f64,
    /// Wavelength in meters.
    pub wavelength: f64,
}

impl Source {
    #[must_use]
    pub fn new(position: [f64; 3], intensity: f64, wavelength: f64) -> Self {
        Self {
            x: position[0],
            y: position[1],
            z: position[2],
            intensity,
            wavelength,
        }
    }
}

impl Default for Source {
    fn default() -> Self {
        Self {
            x: -10.0,
            y: 0.0,
            z: 0.0,
            intensity: 1.0,
            wavelength: 1.0e-10,
        }
    }
}

/// Inclusive region of interest in pixel units.
///
/// `x` runs along the fast axis, `y` along the slow axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub xmin: usize,
    pub xmax: usize,
    pub ymin: usize,
    pub ymax: usize,
}

impl RegionOfInterest {
    /// A region that covers every pixel of any panel.
    #[must_use]
    pub fn full() -> Self {
        Self {
            xmin: 0,
            xmax: usize::MAX,
            ymin: 0,
            ymax: usize::MAX,
        }
    }

    /// Returns true if the pixel at `(slow, fast)` is inside the region.
    #[inline]
    #[must_use]
    pub fn contains(&self, slow: usize, fast: usize) -> bool {
        (self.xmin..=self.xmax).contains(&fast) && (self.ymin..=self.ymax).contains(&slow)
    }
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self::full()
    }
}

/// Scalar and small-vector configuration for one simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    // Pixel sampling
    pub roi: RegionOfInterest,
    pub oversample: usize,
    pub point_pixel: bool,
    /// Pixel edge length in meters.
    pub pixel_size: f64,

    // Detector
    pub detector_thickstep: f64,
    pub detector_thicksteps: usize,
    pub detector_thick: f64,
    pub detector_attnlen: f64,
    pub curved_detector: bool,
    pub distance: f64,
    pub close_distance: f64,

    // Goniometer
    pub dmin: f64,
    pub phi0: f64,
    pub phistep: f64,
    pub phisteps: usize,
    pub spindle_vector: Vector4,

    // Beam
    pub beam_vector: Vector4,
    pub polar_vector: Vector4,
    pub polarization: f64,
    pub nopolar: bool,
    pub fluence: f64,
    pub sources: Vec<Source>,

    // Crystal
    pub a0: Vector4,
    pub b0: Vector4,
    pub c0: Vector4,
    pub xtal_shape: CrystalShape,
    pub mosaic_spread: f64,
    pub mosaic_domains: usize,
    /// Row-major 3x3 rotation per mosaic domain.
    pub mosaic_umats: Vec<[f64; 9]>,
    #[serde(rename = "na")]
    pub n_a: f64,
    #[serde(rename = "nb")]
    pub n_b: f64,
    #[serde(rename = "nc")]
    pub n_c: f64,
    pub v_cell: f64,
    pub spot_scale: f64,
    pub integral_form: bool,
    pub default_f: f64,
    pub interpolate: bool,
    pub fudge: f64,

    // Diffuse background
    pub stol_of: Vec<f64>,
    pub fbg_of: Vec<f64>,
    pub amorphous_molecules: f64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            roi: RegionOfInterest::full(),
            oversample: 1,
            point_pixel: false,
            pixel_size: 0.000_172,
            detector_thickstep: 0.0,
            detector_thicksteps: 1,
            detector_thick: 0.0,
            detector_attnlen: 0.000_234,
            curved_detector: false,
            distance: 0.1,
            close_distance: 0.1,
            dmin: 0.0,
            phi0: 0.0,
            phistep: 0.0,
            phisteps: 1,
            spindle_vector: [1.0, 0.0, 0.0, 1.0],
            beam_vector: [1.0, 1.0, 0.0, 0.0],
            polar_vector: [1.0, 0.0, 0.0, 1.0],
            polarization: 0.0,
            nopolar: false,
            fluence: 1.259_320_152_862_27e29,
            sources: vec![Source::default()],
            a0: [0.0; 4],
            b0: [0.0; 4],
            c0: [0.0; 4],
            xtal_shape: CrystalShape::Square,
            mosaic_spread: 0.0,
            mosaic_domains: 1,
            mosaic_umats: vec![IDENTITY_UMAT],
            n_a: 1.0,
            n_b: 1.0,
            n_c: 1.0,
            v_cell: 0.0,
            spot_scale: 1.0,
            integral_form: false,
            default_f: 0.0,
            interpolate: false,
            fudge: 1.0,
            stol_of: Vec::new(),
            fbg_of: Vec::new(),
            amorphous_molecules: 0.0,
        }
    }
}

/// Row-major 3x3 identity.
pub const IDENTITY_UMAT: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

impl SimulationParameters {
    /// Creates parameters with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load parameters from a JSON file and validate them.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails [`validate`](Self::validate).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let params: Self = serde_json::from_reader(BufReader::new(file))?;
        params.validate()?;
        Ok(params)
    }

    /// Load parameters from a JSON string and validate them.
    ///
    /// # Errors
    /// Returns an error if the string is not valid JSON or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the sampling counts and array shapes the engine relies on.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameters`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.oversample == 0 {
            return Err(Error::InvalidParameters("oversample must be >= 1".into()));
        }
        if self.phisteps == 0 {
            return Err(Error::InvalidParameters("phisteps must be >= 1".into()));
        }
        if self.mosaic_domains == 0 {
            return Err(Error::InvalidParameters(
                "mosaic_domains must be >= 1".into(),
            ));
        }
        if self.mosaic_umats.len() != self.mosaic_domains {
            return Err(Error::InvalidParameters(format!(
                "expected {} mosaic rotation matrices, found {}",
                self.mosaic_domains,
                self.mosaic_umats.len()
            )));
        }
        if self.checked_steps().is_none() {
            return Err(Error::InvalidParameters(format!(
                "phisteps {} x mosaic_domains {} x oversample {}^2 overflows",
                self.phisteps, self.mosaic_domains, self.oversample
            )));
        }
        if self.sources.is_empty() {
            return Err(Error::InvalidParameters(
                "at least one source is required".into(),
            ));
        }
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(Error::InvalidParameters(format!(
                "pixel_size must be positive, got {}",
                self.pixel_size
            )));
        }
        if self.stol_of.len() != self.fbg_of.len() {
            return Err(Error::InvalidParameters(format!(
                "stol_of has {} bins but Fbg_of has {}",
                self.stol_of.len(),
                self.fbg_of.len()
            )));
        }
        Ok(())
    }

    /// Total sub-steps per pixel: `phisteps * mosaic_domains * oversample^2`.
    ///
    /// Saturates at `usize::MAX`; [`validate`](Self::validate) rejects
    /// counts that overflow.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.checked_steps().unwrap_or(usize::MAX)
    }

    fn checked_steps(&self) -> Option<usize> {
        self.phisteps
            .checked_mul(self.mosaic_domains)?
            .checked_mul(self.oversample)?
            .checked_mul(self.oversample)
    }

    /// Sub-pixel edge length: `pixel_size / oversample`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn subpixel_size(&self) -> f64 {
        self.pixel_size / self.oversample as f64
    }

    /// Number of source points.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample;
        self
    }

    #[must_use]
    pub fn with_pixel_size(mut self, pixel_size: f64) -> Self {
        self.pixel_size = pixel_size;
        self
    }

    #[must_use]
    pub fn with_phisteps(mut self, phisteps: usize) -> Self {
        self.phisteps = phisteps;
        self
    }

    #[must_use]
    pub fn with_roi(mut self, roi: RegionOfInterest) -> Self {
        self.roi = roi;
        self
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    /// Sets mosaic rotations; the domain count follows the matrix count.
    #[must_use]
    pub fn with_mosaic_umats(mut self, umats: Vec<[f64; 9]>) -> Self {
        self.mosaic_domains = umats.len();
        self.mosaic_umats = umats;
        self
    }

    #[must_use]
    pub fn with_polar_vector(mut self, polar_vector: Vector4) -> Self {
        self.polar_vector = polar_vector;
        self
    }

    #[must_use]
    pub fn with_cell(mut self, a0: Vector4, b0: Vector4, c0: Vector4) -> Self {
        self.a0 = a0;
        self.b0 = b0;
        self.c0 = c0;
        self
    }

    #[must_use]
    pub fn with_fluence(mut self, fluence: f64) -> Self {
        self.fluence = fluence;
        self
    }

    /// Sets the diffuse background table (`stol` bins and `Fbg` values).
    #[must_use]
    pub fn with_background(mut self, stol_of: Vec<f64>, fbg_of: Vec<f64>) -> Self {
        self.stol_of = stol_of;
        self.fbg_of = fbg_of;
        self
    }
}
