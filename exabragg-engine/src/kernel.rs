//! Per-pixel kernel interfaces.
//!
//! The scattering physics lives outside this crate. The engine stages the
//! inputs, chooses the pixel domain and calls a kernel once per pixel; a
//! kernel only has to turn one [`PixelAddress`] into a result.

use crate::staging::StagedParameters;
use crate::structure_factors::{ChannelId, StructureFactorTable};
use crate::{Error, Result};
use exabragg_core::{KernelFault, PanelView, PixelAddress, PixelSample, SimulationParameters};

/// Everything a Bragg kernel may read for one panel of one channel.
#[derive(Debug, Clone, Copy)]
pub struct BraggInput<'a> {
    pub channel: ChannelId,
    pub panel: PanelView<'a>,
    pub params: &'a SimulationParameters,
    pub staged: &'a StagedParameters,
    pub structure_factors: &'a StructureFactorTable,
}

/// Computes the Bragg contribution of one pixel.
pub trait BraggKernel: Sync {
    /// Kernel name used in fault reports.
    fn name(&self) -> &'static str {
        "bragg"
    }

    /// Evaluates the pixel at `pixel`.
    ///
    /// # Errors
    /// A [`KernelFault`] aborts the whole accumulation call.
    fn evaluate(
        &self,
        input: &BraggInput<'_>,
        pixel: PixelAddress,
    ) -> std::result::Result<PixelSample, KernelFault>;
}

/// Diffuse scattering table: `Fbg` sampled at increasing `sin(theta)/lambda`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackgroundTable {
    stol_of: Vec<f64>,
    fbg_of: Vec<f64>,
}

impl BackgroundTable {
    /// Stages a copy of the two parallel arrays.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the arrays differ in length.
    pub fn new(stol_of: &[f64], fbg_of: &[f64]) -> Result<Self> {
        if stol_of.len() != fbg_of.len() {
            return Err(Error::LengthMismatch {
                what: "stol_of vs Fbg_of",
                left: stol_of.len(),
                right: fbg_of.len(),
            });
        }
        Ok(Self {
            stol_of: stol_of.to_vec(),
            fbg_of: fbg_of.to_vec(),
        })
    }

    /// Stages the table carried by `params`.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the arrays differ in length.
    pub fn from_params(params: &SimulationParameters) -> Result<Self> {
        Self::new(&params.stol_of, &params.fbg_of)
    }

    #[must_use]
    pub fn stol_of(&self) -> &[f64] {
        &self.stol_of
    }

    #[must_use]
    pub fn fbg_of(&self) -> &[f64] {
        &self.fbg_of
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stol_of.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stol_of.is_empty()
    }

    /// Piecewise-linear `Fbg(stol)`, clamped to the end bins.
    ///
    /// An empty table yields zero and a NaN `stol` yields NaN.
    #[must_use]
    pub fn fbg_at(&self, stol: f64) -> f64 {
        let n = self.stol_of.len();
        if n == 0 {
            return 0.0;
        }
        if stol.is_nan() {
            return f64::NAN;
        }
        if stol <= self.stol_of[0] {
            return self.fbg_of[0];
        }
        if stol >= self.stol_of[n - 1] {
            return self.fbg_of[n - 1];
        }
        // first bin strictly above stol; 1..n by the clamps above
        let hi = self.stol_of.partition_point(|&s| s <= stol);
        let lo = hi - 1;
        let span = self.stol_of[hi] - self.stol_of[lo];
        if span <= 0.0 {
            return self.fbg_of[lo];
        }
        let t = (stol - self.stol_of[lo]) / span;
        self.fbg_of[lo] + t * (self.fbg_of[hi] - self.fbg_of[lo])
    }
}

/// Everything a background kernel may read for one panel.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundInput<'a> {
    pub panel: PanelView<'a>,
    pub params: &'a SimulationParameters,
    pub staged: &'a StagedParameters,
    pub background: &'a BackgroundTable,
}

/// Computes the diffuse background intensity of one pixel.
pub trait BackgroundKernel: Sync {
    /// Kernel name used in fault reports.
    fn name(&self) -> &'static str {
        "background"
    }

    /// Evaluates the pixel at `pixel`.
    ///
    /// # Errors
    /// A [`KernelFault`] aborts the whole accumulation call.
    fn evaluate(
        &self,
        input: &BackgroundInput<'_>,
        pixel: PixelAddress,
    ) -> std::result::Result<f64, KernelFault>;
}
