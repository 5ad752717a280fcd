//! Multi-panel detector geometry and image buffers.
//!
//! [`DetectorGeometry`] keeps per-panel vectors in flattened arrays with a
//! stride of [`VECTOR_LENGTH`]; kernels never index them directly and go
//! through a bounds-checked [`PanelView`] instead. [`DetectorImageBuffer`]
//! holds the transient frame written by one kernel pass and the persistent
//! accumulator that survives across energy channels.

use crate::error::{Error, Result};
use crate::vector::{Vector4, VECTOR_LENGTH};
use serde::{Deserialize, Serialize};

/// Geometry of a single panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelGeometry {
    /// Slow-axis direction.
    pub sdet: Vector4,
    /// Fast-axis direction.
    pub fdet: Vector4,
    /// Panel normal.
    pub odet: Vector4,
    /// Position of the first pixel.
    pub pix0: Vector4,
    pub distance: f64,
    pub xbeam: f64,
    pub ybeam: f64,
}

impl Default for PanelGeometry {
    fn default() -> Self {
        Self {
            sdet: [1.0, 0.0, 0.0, -1.0],
            fdet: [1.0, 0.0, 1.0, 0.0],
            odet: [1.0, 1.0, 0.0, 0.0],
            pix0: [0.0; 4],
            distance: 0.1,
            xbeam: 0.0,
            ybeam: 0.0,
        }
    }
}

/// Geometry of every panel, stored as flattened per-panel arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    panel_count: usize,
    slow_dim: usize,
    fast_dim: usize,
    sdet_vector: Vec<f64>,
    fdet_vector: Vec<f64>,
    odet_vector: Vec<f64>,
    pix0_vector: Vec<f64>,
    distance: Vec<f64>,
    xbeam: Vec<f64>,
    ybeam: Vec<f64>,
}

impl DetectorGeometry {
    /// Builds geometry from one [`PanelGeometry`] per panel.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGeometry`] if there are no panels or either
    /// pixel dimension is zero.
    pub fn from_panels(panels: &[PanelGeometry], slow_dim: usize, fast_dim: usize) -> Result<Self> {
        if panels.is_empty() {
            return Err(Error::InvalidGeometry("detector has no panels".into()));
        }
        if slow_dim == 0 || fast_dim == 0 {
            return Err(Error::InvalidGeometry(format!(
                "panel dimensions must be non-zero, got {slow_dim}x{fast_dim}"
            )));
        }

        let count = panels.len();
        let mut geometry = Self {
            panel_count: count,
            slow_dim,
            fast_dim,
            sdet_vector: Vec::with_capacity(count * VECTOR_LENGTH),
            fdet_vector: Vec::with_capacity(count * VECTOR_LENGTH),
            odet_vector: Vec::with_capacity(count * VECTOR_LENGTH),
            pix0_vector: Vec::with_capacity(count * VECTOR_LENGTH),
            distance: Vec::with_capacity(count),
            xbeam: Vec::with_capacity(count),
            ybeam: Vec::with_capacity(count),
        };
        for panel in panels {
            geometry.sdet_vector.extend_from_slice(&panel.sdet);
            geometry.fdet_vector.extend_from_slice(&panel.fdet);
            geometry.odet_vector.extend_from_slice(&panel.odet);
            geometry.pix0_vector.extend_from_slice(&panel.pix0);
            geometry.distance.push(panel.distance);
            geometry.xbeam.push(panel.xbeam);
            geometry.ybeam.push(panel.ybeam);
        }
        Ok(geometry)
    }

    /// Single-panel detector with default orientation.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGeometry`] if either dimension is zero.
    pub fn single_panel(slow_dim: usize, fast_dim: usize) -> Result<Self> {
        Self::from_panels(&[PanelGeometry::default()], slow_dim, fast_dim)
    }

    /// Checks that every flattened array matches the panel count.
    ///
    /// Geometry built through [`from_panels`](Self::from_panels) always
    /// passes; this guards deserialized geometry.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGeometry`] naming the first inconsistent array.
    pub fn validate(&self) -> Result<()> {
        let vector_len = self.panel_count * VECTOR_LENGTH;
        for (name, len, expected) in [
            ("sdet_vector", self.sdet_vector.len(), vector_len),
            ("fdet_vector", self.fdet_vector.len(), vector_len),
            ("odet_vector", self.odet_vector.len(), vector_len),
            ("pix0_vector", self.pix0_vector.len(), vector_len),
            ("distance", self.distance.len(), self.panel_count),
            ("xbeam", self.xbeam.len(), self.panel_count),
            ("ybeam", self.ybeam.len(), self.panel_count),
        ] {
            if len != expected {
                return Err(Error::InvalidGeometry(format!(
                    "{name} has {len} entries, expected {expected}"
                )));
            }
        }
        if self.panel_count == 0 || self.slow_dim == 0 || self.fast_dim == 0 {
            return Err(Error::InvalidGeometry("empty detector".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn panel_count(&self) -> usize {
        self.panel_count
    }

    #[must_use]
    pub fn slow_dim(&self) -> usize {
        self.slow_dim
    }

    #[must_use]
    pub fn fast_dim(&self) -> usize {
        self.fast_dim
    }

    /// Pixels per panel.
    #[must_use]
    pub fn panel_size(&self) -> usize {
        self.slow_dim * self.fast_dim
    }

    /// Pixels across all panels.
    #[must_use]
    pub fn total_pixels(&self) -> usize {
        self.panel_count * self.panel_size()
    }

    /// Bounds-checked view of one panel's geometry.
    ///
    /// # Errors
    /// Returns [`Error::PanelOutOfRange`] if `panel >= panel_count`.
    pub fn panel(&self, panel: usize) -> Result<PanelView<'_>> {
        if panel >= self.panel_count {
            return Err(Error::PanelOutOfRange {
                panel,
                panel_count: self.panel_count,
            });
        }
        Ok(PanelView {
            index: panel,
            slow_dim: self.slow_dim,
            fast_dim: self.fast_dim,
            sdet: sub_vector(&self.sdet_vector, panel)?,
            fdet: sub_vector(&self.fdet_vector, panel)?,
            odet: sub_vector(&self.odet_vector, panel)?,
            pix0: sub_vector(&self.pix0_vector, panel)?,
            distance: per_panel(&self.distance, "distance", panel)?,
            xbeam: per_panel(&self.xbeam, "xbeam", panel)?,
            ybeam: per_panel(&self.ybeam, "ybeam", panel)?,
        })
    }

    /// Views of all panels in order.
    ///
    /// # Errors
    /// Fails only if the geometry is internally inconsistent.
    pub fn panels(&self) -> Result<Vec<PanelView<'_>>> {
        (0..self.panel_count).map(|p| self.panel(p)).collect()
    }

    /// Splits an absolute frame offset into panel/slow/fast coordinates.
    #[must_use]
    pub fn address_of(&self, offset: usize) -> Option<PixelAddress> {
        if offset >= self.total_pixels() {
            return None;
        }
        let panel_size = self.panel_size();
        let within = offset % panel_size;
        Some(PixelAddress {
            panel: offset / panel_size,
            slow: within / self.fast_dim,
            fast: within % self.fast_dim,
        })
    }
}

// Slice [panel * 4, (panel + 1) * 4) of a flattened vector array.
fn sub_vector(flat: &[f64], panel: usize) -> Result<&Vector4> {
    let start = panel * VECTOR_LENGTH;
    flat.get(start..start + VECTOR_LENGTH)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            Error::InvalidGeometry(format!(
                "per-panel vector array too short for panel {panel}"
            ))
        })
}

fn per_panel(values: &[f64], name: &str, panel: usize) -> Result<f64> {
    values.get(panel).copied().ok_or_else(|| {
        Error::InvalidGeometry(format!("{name} has no entry for panel {panel}"))
    })
}

/// Borrowed geometry of one panel.
#[derive(Debug, Clone, Copy)]
pub struct PanelView<'a> {
    pub index: usize,
    pub slow_dim: usize,
    pub fast_dim: usize,
    pub sdet: &'a Vector4,
    pub fdet: &'a Vector4,
    pub odet: &'a Vector4,
    pub pix0: &'a Vector4,
    pub distance: f64,
    pub xbeam: f64,
    pub ybeam: f64,
}

impl PanelView<'_> {
    /// Pixels in this panel.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.slow_dim * self.fast_dim
    }

    /// Absolute frame offset of this panel's first pixel.
    #[must_use]
    pub fn frame_offset(&self) -> usize {
        self.index * self.pixel_count()
    }

    /// Address of the `local`-th pixel of this panel.
    #[must_use]
    pub fn address(&self, local: usize) -> PixelAddress {
        PixelAddress {
            panel: self.index,
            slow: local / self.fast_dim,
            fast: local % self.fast_dim,
        }
    }
}

/// Location of one pixel on the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelAddress {
    pub panel: usize,
    pub slow: usize,
    pub fast: usize,
}

/// Per-pixel output of one kernel pass: the floatimage value plus the
/// reduction side-buffers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelSample {
    pub intensity: f64,
    /// Solid-angle weight.
    pub omega: f64,
    /// Fast coordinate of the maximum-intensity sub-sample.
    pub max_i_x: f64,
    /// Slow coordinate of the maximum-intensity sub-sample.
    pub max_i_y: f64,
    /// Whether the kernel visited this pixel.
    pub touched: bool,
}

impl PixelSample {
    /// A visited pixel carrying only an intensity.
    #[must_use]
    pub fn with_intensity(intensity: f64) -> Self {
        Self {
            intensity,
            touched: true,
            ..Self::default()
        }
    }
}

/// Transient frame, persistent accumulator and active-pixel list.
///
/// Both arrays are panel-concatenated: panel `p` occupies
/// `[p * panel_size, (p + 1) * panel_size)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorImageBuffer {
    panel_size: usize,
    frame: Vec<PixelSample>,
    accumulated: Vec<f64>,
    active_pixels: Vec<usize>,
}

impl DetectorImageBuffer {
    /// Creates zeroed buffers sized for `geometry`.
    #[must_use]
    pub fn for_geometry(geometry: &DetectorGeometry) -> Self {
        let total = geometry.total_pixels();
        Self {
            panel_size: geometry.panel_size(),
            frame: vec![PixelSample::default(); total],
            accumulated: vec![0.0; total],
            active_pixels: Vec::new(),
        }
    }

    /// Total number of pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    /// Pixels per panel the buffer was sized for.
    #[must_use]
    pub fn panel_size(&self) -> usize {
        self.panel_size
    }

    /// Returns true if the buffer holds no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Output of the most recent kernel pass.
    #[must_use]
    pub fn frame(&self) -> &[PixelSample] {
        &self.frame
    }

    /// Mutable frame for kernel passes.
    pub fn frame_mut(&mut self) -> &mut [PixelSample] {
        &mut self.frame
    }

    /// The floatimage of the most recent kernel pass.
    #[must_use]
    pub fn floatimage(&self) -> Vec<f64> {
        self.frame.iter().map(|s| s.intensity).collect()
    }

    /// Persistent accumulator (the raw simulated pixels).
    #[must_use]
    pub fn accumulated(&self) -> &[f64] {
        &self.accumulated
    }

    /// Accumulator values of one panel, or `None` past the last panel.
    #[must_use]
    pub fn panel_accumulated(&self, panel: usize) -> Option<&[f64]> {
        let start = panel.checked_mul(self.panel_size)?;
        self.accumulated.get(start..start + self.panel_size)
    }

    /// Frame and accumulator borrowed together, for the accumulate step.
    pub fn split_mut(&mut self) -> (&[PixelSample], &mut [f64]) {
        (&self.frame, &mut self.accumulated)
    }

    /// Absolute offsets used by the most recent masked pass.
    #[must_use]
    pub fn active_pixels(&self) -> &[usize] {
        &self.active_pixels
    }

    /// Replaces the active-pixel list.
    pub fn set_active_pixels(&mut self, active: Vec<usize>) {
        self.active_pixels = active;
    }

    /// Multiplies every accumulated pixel by `factor`.
    pub fn scale_in_place(&mut self, factor: f64) {
        for value in &mut self.accumulated {
            *value *= factor;
        }
    }

    /// Zeroes the frame, accumulator and active-pixel list.
    pub fn reset(&mut self) {
        self.frame.fill(PixelSample::default());
        self.accumulated.fill(0.0);
        self.active_pixels.clear();
    }
}

/// Detector collaborator: geometry plus the image buffers it owns.
#[derive(Debug, Clone)]
pub struct Detector {
    pub geometry: DetectorGeometry,
    pub image: DetectorImageBuffer,
}

impl Detector {
    /// Creates a detector with zeroed image buffers.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGeometry`] if `geometry` fails validation.
    pub fn new(geometry: DetectorGeometry) -> Result<Self> {
        geometry.validate()?;
        let image = DetectorImageBuffer::for_geometry(&geometry);
        Ok(Self { geometry, image })
    }

    #[must_use]
    pub fn panel_count(&self) -> usize {
        self.geometry.panel_count()
    }

    /// Raw accumulated pixels.
    #[must_use]
    pub fn raw_pixels(&self) -> &[f64] {
        self.image.accumulated()
    }
}
