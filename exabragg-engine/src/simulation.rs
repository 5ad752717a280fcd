//! The diffraction accumulation engine.
//!
//! [`ExascaleEngine`] stages parameters once ([`allocate`]) and then drives
//! any number of Bragg and background passes. Every pass writes the
//! detector's transient frame, fences, and adds the frame into the
//! persistent accumulator. Passes are applied in call order; the engine has
//! no internal locking and relies on `&mut Detector` for single-writer
//! access to the image.
//!
//! [`allocate`]: ExascaleEngine::allocate

use crate::dispatch::{ParallelDispatch, RayonDispatch};
use crate::kernel::{BackgroundInput, BackgroundKernel, BackgroundTable, BraggInput, BraggKernel};
use crate::staging::StagedParameters;
use crate::structure_factors::{ChannelId, EnergyChannelStore};
use crate::{Error, Result};
use exabragg_core::{Detector, DetectorImageBuffer, KernelFault, PixelSample, SimulationParameters};
use tracing::{debug, info, instrument};

/// Lifecycle of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No parameters staged yet.
    Unallocated,
    /// Parameters staged; accumulation calls are allowed.
    Allocated,
}

#[derive(Debug, Clone)]
struct Allocation {
    params: SimulationParameters,
    staged: StagedParameters,
}

/// Stages simulation parameters and accumulates per-channel images.
#[derive(Debug, Clone, Default)]
pub struct ExascaleEngine<D: ParallelDispatch = RayonDispatch> {
    dispatch: D,
    allocation: Option<Allocation>,
}

impl ExascaleEngine<RayonDispatch> {
    /// Creates an unallocated engine on rayon's global pool.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dispatch(RayonDispatch::new())
    }
}

impl<D: ParallelDispatch> ExascaleEngine<D> {
    /// Creates an unallocated engine on the given backend.
    pub fn with_dispatch(dispatch: D) -> Self {
        Self {
            dispatch,
            allocation: None,
        }
    }

    #[must_use]
    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        if self.allocation.is_some() {
            EngineState::Allocated
        } else {
            EngineState::Unallocated
        }
    }

    /// Parameters staged by the last [`allocate`](Self::allocate).
    #[must_use]
    pub fn params(&self) -> Option<&SimulationParameters> {
        self.allocation.as_ref().map(|a| &a.params)
    }

    /// Device mirrors staged by the last [`allocate`](Self::allocate).
    #[must_use]
    pub fn staged(&self) -> Option<&StagedParameters> {
        self.allocation.as_ref().map(|a| &a.staged)
    }

    fn allocation(&self) -> Result<&Allocation> {
        self.allocation.as_ref().ok_or(Error::NotAllocated)
    }

    /// Stages `params` for subsequent accumulation calls.
    ///
    /// Calling again replaces the previous staging without any staleness
    /// check.
    ///
    /// # Errors
    /// Returns an error if `params` fails validation; the previous staging
    /// is kept in that case.
    #[instrument(skip_all)]
    pub fn allocate(&mut self, params: &SimulationParameters) -> Result<()> {
        let staged = StagedParameters::stage(params)?;
        if self.allocation.is_some() {
            debug!("replacing previously staged parameters");
        }
        debug!(
            steps = staged.steps,
            subpixel_size = staged.subpixel_size,
            sources = staged.sources.len(),
            mosaic_domains = staged.mosaic_domains(),
            backend = self.dispatch.name(),
            "staged simulation parameters"
        );
        self.allocation = Some(Allocation {
            params: params.clone(),
            staged,
        });
        Ok(())
    }

    /// Re-stages per-source intensities and wavelengths, e.g. between
    /// energy channels with different flux.
    ///
    /// # Errors
    /// Returns [`Error::NotAllocated`] before [`allocate`](Self::allocate),
    /// or [`Error::LengthMismatch`] if a slice does not have one entry per
    /// source.
    pub fn update_sources(&mut self, intensity: &[f64], wavelength: &[f64]) -> Result<()> {
        let allocation = self.allocation.as_mut().ok_or(Error::NotAllocated)?;
        allocation.staged.restage_sources(intensity, wavelength)?;
        for (source, (&i, &l)) in allocation
            .params
            .sources
            .iter_mut()
            .zip(intensity.iter().zip(wavelength))
        {
            source.intensity = i;
            source.wavelength = l;
        }
        Ok(())
    }

    /// Logs every staged scalar and derived constant.
    ///
    /// # Errors
    /// Returns [`Error::NotAllocated`] before [`allocate`](Self::allocate).
    pub fn show(&self) -> Result<()> {
        let Allocation { params: p, staged } = self.allocation()?;
        info!(
            roi_xmin = p.roi.xmin,
            roi_xmax = p.roi.xmax,
            roi_ymin = p.roi.ymin,
            roi_ymax = p.roi.ymax,
            oversample = p.oversample,
            point_pixel = p.point_pixel,
            pixel_size = p.pixel_size,
            subpixel_size = staged.subpixel_size,
            steps = staged.steps,
            "sampling"
        );
        info!(
            detector_thickstep = p.detector_thickstep,
            detector_thicksteps = p.detector_thicksteps,
            detector_thick = p.detector_thick,
            detector_attnlen = p.detector_attnlen,
            curved_detector = p.curved_detector,
            distance = p.distance,
            close_distance = p.close_distance,
            "detector"
        );
        info!(
            dmin = p.dmin,
            phi0 = p.phi0,
            phistep = p.phistep,
            phisteps = p.phisteps,
            sources = p.source_count(),
            mosaic_spread = p.mosaic_spread,
            mosaic_domains = p.mosaic_domains,
            "goniometer"
        );
        info!(
            na = p.n_a,
            nb = p.n_b,
            nc = p.n_c,
            fluence = p.fluence,
            spot_scale = p.spot_scale,
            integral_form = p.integral_form,
            default_f = p.default_f,
            interpolate = p.interpolate,
            nopolar = p.nopolar,
            polarization = p.polarization,
            fudge = p.fudge,
            "crystal"
        );
        Ok(())
    }

    /// Adds one energy channel's Bragg image into the detector accumulator.
    ///
    /// Panels are evaluated one after another, each as a single parallel
    /// pass over its slice of the frame. Pixels outside the region of
    /// interest are written as zero samples without calling the kernel.
    ///
    /// # Errors
    /// Returns [`Error::NotAllocated`], [`Error::UnknownChannel`],
    /// [`Error::ImageSizeMismatch`], or a fatal [`Error::KernelFault`]. The
    /// accumulator is not modified on error.
    #[instrument(skip(self, kernel, channels, detector))]
    pub fn accumulate_bragg<K: BraggKernel>(
        &self,
        kernel: &K,
        channel: ChannelId,
        channels: &EnergyChannelStore,
        detector: &mut Detector,
    ) -> Result<()> {
        let Allocation { params, staged } = self.allocation()?;
        let structure_factors = channels.table(channel)?;
        check_image(detector)?;

        let Detector { geometry, image } = detector;
        let roi = params.roi;
        let panel_size = geometry.panel_size();

        for (panel_id, panel_frame) in image.frame_mut().chunks_mut(panel_size).enumerate() {
            let panel = geometry.panel(panel_id)?;
            let input = BraggInput {
                channel,
                panel,
                params,
                staged,
                structure_factors,
            };
            let offset = panel.frame_offset();

            self.dispatch
                .try_for_each_mut("bragg", panel_frame, |local, sample| {
                    let pixel = panel.address(local);
                    *sample = if roi.contains(pixel.slow, pixel.fast) {
                        kernel
                            .evaluate(&input, pixel)
                            .map_err(|fault| fault.at_pixel(offset + local))?
                    } else {
                        PixelSample::default()
                    };
                    Ok(())
                })
                .map_err(|fault| Error::KernelFault {
                    kernel: kernel.name(),
                    channel: Some(channel),
                    panel: Some(panel_id),
                    fault,
                })?;
        }

        self.dispatch.fence("bragg");
        self.accumulate_frame("bragg_accumulate", image);
        debug!(panels = geometry.panel_count(), "accumulated Bragg channel");
        Ok(())
    }

    /// Adds one energy channel's Bragg image restricted to masked pixels.
    ///
    /// `panel_mask` covers the whole frame (all panels concatenated). It is
    /// compacted into absolute offsets, stored as the detector's active
    /// pixel list, and every active pixel is evaluated in one dispatch.
    /// Pixels outside the mask keep their accumulated values.
    ///
    /// # Errors
    /// As [`accumulate_bragg`](Self::accumulate_bragg), plus
    /// [`Error::MaskLengthMismatch`].
    #[instrument(skip(self, kernel, channels, detector, panel_mask))]
    pub fn accumulate_bragg_masked<K: BraggKernel>(
        &self,
        kernel: &K,
        channel: ChannelId,
        channels: &EnergyChannelStore,
        detector: &mut Detector,
        panel_mask: &[bool],
    ) -> Result<()> {
        let Allocation { params, staged } = self.allocation()?;
        let structure_factors = channels.table(channel)?;
        check_image(detector)?;

        let Detector { geometry, image } = detector;
        let expected = geometry.total_pixels();
        if panel_mask.len() != expected {
            return Err(Error::MaskLengthMismatch {
                expected,
                actual: panel_mask.len(),
            });
        }

        let active = active_pixel_list(panel_mask);
        let inputs: Vec<BraggInput<'_>> = geometry
            .panels()?
            .into_iter()
            .map(|panel| BraggInput {
                channel,
                panel,
                params,
                staged,
                structure_factors,
            })
            .collect();

        let geometry = &*geometry;
        let samples = self
            .dispatch
            .try_map("bragg_masked", &active, |&offset| {
                let pixel = geometry
                    .address_of(offset)
                    .ok_or_else(|| KernelFault::new("active pixel outside detector"))
                    .map_err(|fault| fault.at_pixel(offset))?;
                kernel
                    .evaluate(&inputs[pixel.panel], pixel)
                    .map_err(|fault| fault.at_pixel(offset))
            })
            .map_err(|fault| Error::KernelFault {
                kernel: kernel.name(),
                channel: Some(channel),
                panel: fault
                    .pixel
                    .and_then(|p| geometry.address_of(p))
                    .map(|a| a.panel),
                fault,
            })?;
        self.dispatch.fence("bragg_masked");

        // `active` is sorted, so a sample's rank is its position in the list.
        self.dispatch
            .for_each_mut("bragg_masked_scatter", image.frame_mut(), |i, sample| {
                *sample = active
                    .binary_search(&i)
                    .map_or_else(|_| PixelSample::default(), |rank| samples[rank]);
            });
        let (frame, accumulated) = image.split_mut();
        self.dispatch
            .for_each_mut("bragg_masked_accumulate", accumulated, |i, value| {
                if panel_mask[i] {
                    *value += frame[i].intensity;
                }
            });
        debug!(active = active.len(), "accumulated masked Bragg channel");
        image.set_active_pixels(active);
        Ok(())
    }

    /// Adds the diffuse background image into the detector accumulator.
    ///
    /// Stages the `stol`/`Fbg` table, zeroes the whole frame in one
    /// parallel pass, then evaluates the background kernel panel by panel.
    ///
    /// # Errors
    /// Returns [`Error::NotAllocated`], [`Error::ImageSizeMismatch`], a
    /// background table shape error, or a fatal [`Error::KernelFault`].
    #[instrument(skip_all)]
    pub fn accumulate_background<K: BackgroundKernel>(
        &self,
        kernel: &K,
        detector: &mut Detector,
    ) -> Result<()> {
        let Allocation { params, staged } = self.allocation()?;
        check_image(detector)?;
        let background = BackgroundTable::from_params(params)?;

        let Detector { geometry, image } = detector;
        self.clear_frame("background_init", image);
        let panel_size = geometry.panel_size();

        for (panel_id, panel_frame) in image.frame_mut().chunks_mut(panel_size).enumerate() {
            let panel = geometry.panel(panel_id)?;
            let input = BackgroundInput {
                panel,
                params,
                staged,
                background: &background,
            };
            let offset = panel.frame_offset();

            self.dispatch
                .try_for_each_mut("background", panel_frame, |local, sample| {
                    sample.intensity = kernel
                        .evaluate(&input, panel.address(local))
                        .map_err(|fault| fault.at_pixel(offset + local))?;
                    Ok(())
                })
                .map_err(|fault| Error::KernelFault {
                    kernel: kernel.name(),
                    channel: None,
                    panel: Some(panel_id),
                    fault,
                })?;
        }

        self.dispatch.fence("background");
        self.accumulate_frame("background_accumulate", image);
        debug!(bins = background.len(), "accumulated background");
        Ok(())
    }

    fn clear_frame(&self, label: &'static str, image: &mut DetectorImageBuffer) {
        self.dispatch
            .for_each_mut(label, image.frame_mut(), |_, sample| {
                *sample = PixelSample::default();
            });
    }

    fn accumulate_frame(&self, label: &'static str, image: &mut DetectorImageBuffer) {
        let (frame, accumulated) = image.split_mut();
        self.dispatch.for_each_mut(label, accumulated, |i, value| {
            *value += frame[i].intensity;
        });
    }
}

/// Absolute offsets of every `true` entry of a frame-sized mask.
#[must_use]
pub fn active_pixel_list(panel_mask: &[bool]) -> Vec<usize> {
    panel_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &on)| on.then_some(i))
        .collect()
}

fn check_image(detector: &Detector) -> Result<()> {
    let Detector { geometry, image } = detector;
    geometry.validate()?;
    for (what, expected, actual) in [
        ("pixel count", geometry.total_pixels(), image.len()),
        ("panel size", geometry.panel_size(), image.panel_size()),
    ] {
        if actual != expected {
            return Err(Error::ImageSizeMismatch {
                what,
                expected,
                actual,
            });
        }
    }
    Ok(())
}
