#![allow(clippy::float_cmp, clippy::cast_precision_loss)]
use approx::assert_relative_eq;
use exabragg_core::{
    DetectorGeometry, PanelGeometry, RegionOfInterest, SimulationParameters, Source,
};
use exabragg_engine::{
    BackgroundInput, BackgroundKernel, BraggInput, BraggKernel, Detector, EnergyChannelStore,
    Error, ExascaleEngine, HklBounds, KernelFault, PixelAddress, PixelSample, RayonDispatch,
};

/// F(0,0,0) times the summed source intensity, the same at every pixel.
struct FlatBragg;

impl BraggKernel for FlatBragg {
    fn evaluate(
        &self,
        input: &BraggInput<'_>,
        _pixel: PixelAddress,
    ) -> Result<PixelSample, KernelFault> {
        let f = input
            .structure_factors
            .lookup([0, 0, 0])
            .ok_or_else(|| KernelFault::new("origin outside table"))?;
        let flux: f64 = input.staged.sources.intensity.iter().sum();
        Ok(PixelSample {
            intensity: f * f * flux,
            omega: 1.0,
            max_i_x: 0.0,
            max_i_y: 0.0,
            touched: true,
        })
    }
}

/// Intensity depends on position so that doubling is observable.
struct RampBragg;

impl BraggKernel for RampBragg {
    fn evaluate(
        &self,
        input: &BraggInput<'_>,
        pixel: PixelAddress,
    ) -> Result<PixelSample, KernelFault> {
        let f = input.structure_factors.lookup([0, 0, 0]).unwrap_or(0.0);
        let ramp = 0.1 + (pixel.panel * 100 + pixel.slow * 10 + pixel.fast) as f64 / 7.0;
        Ok(PixelSample::with_intensity(f * ramp))
    }
}

/// Looks up Fbg at a position-dependent stol.
struct StolBackground;

impl BackgroundKernel for StolBackground {
    fn evaluate(&self, input: &BackgroundInput<'_>, pixel: PixelAddress) -> Result<f64, KernelFault> {
        let stol = 0.01 * (pixel.slow + pixel.fast) as f64 + 0.001 * input.panel.distance;
        Ok(input.background.fbg_at(stol) * input.params.fluence.log10())
    }
}

/// Writes the panel index and checks it was handed that panel's geometry.
struct PanelIndexBackground;

impl BackgroundKernel for PanelIndexBackground {
    fn evaluate(&self, input: &BackgroundInput<'_>, pixel: PixelAddress) -> Result<f64, KernelFault> {
        if input.panel.index != pixel.panel {
            return Err(KernelFault::new("panel view does not match pixel"));
        }
        Ok(input.panel.distance * 100.0)
    }
}

/// Background that fails at one local pixel of one panel.
struct FailingBackground {
    panel: usize,
    slow: usize,
    fast: usize,
}

impl BackgroundKernel for FailingBackground {
    fn name(&self) -> &'static str {
        "failing_background"
    }

    fn evaluate(&self, _input: &BackgroundInput<'_>, pixel: PixelAddress) -> Result<f64, KernelFault> {
        if (pixel.panel, pixel.slow, pixel.fast) == (self.panel, self.slow, self.fast) {
            return Err(KernelFault::new("stol out of range"));
        }
        Ok(1.0)
    }
}

/// Fails at one absolute pixel.
struct FaultAt(usize);

impl BraggKernel for FaultAt {
    fn name(&self) -> &'static str {
        "fault_at"
    }

    fn evaluate(
        &self,
        input: &BraggInput<'_>,
        pixel: PixelAddress,
    ) -> Result<PixelSample, KernelFault> {
        let offset = input.panel.frame_offset() + pixel.slow * input.panel.fast_dim + pixel.fast;
        if offset == self.0 {
            return Err(KernelFault::new("non-finite intensity"));
        }
        Ok(PixelSample::with_intensity(1.0))
    }
}

fn detector(panels: usize, slow: usize, fast: usize) -> Detector {
    let panels: Vec<PanelGeometry> = (0..panels)
        .map(|p| PanelGeometry {
            distance: 0.1 + p as f64 * 0.05,
            ..PanelGeometry::default()
        })
        .collect();
    Detector::new(DetectorGeometry::from_panels(&panels, slow, fast).unwrap()).unwrap()
}

fn unit_store(channels: usize) -> EnergyChannelStore {
    let mut store = EnergyChannelStore::new(HklBounds::symmetric(1)).unwrap();
    for c in 0..channels {
        store.insert(&[1.0 + c as f64; 27]).unwrap();
    }
    store
}

fn allocated(params: &SimulationParameters) -> ExascaleEngine {
    let mut engine = ExascaleEngine::new();
    engine.allocate(params).unwrap();
    engine
}

#[test]
fn test_channel_ids_follow_insertion_order() {
    let mut store = EnergyChannelStore::new(HklBounds::symmetric(2)).unwrap();
    let count = store.bounds().total_count();
    let ids: Vec<usize> = (0..5)
        .map(|c| store.insert(&vec![c as f64; count]).unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    for (id, table) in store.iter().enumerate() {
        assert_eq!(table.lookup([0, 0, 0]), Some(id as f64));
    }
}

#[test]
fn test_single_panel_bragg_once_equals_twice_halved() {
    // 4x4 panel, every F = 1.0, one source at full intensity
    let params = SimulationParameters::new().with_sources(vec![Source::new(
        [-10.0, 0.0, 0.0],
        1.0,
        1e-10,
    )]);
    let engine = allocated(&params);
    let store = unit_store(1);

    let mut det = detector(1, 4, 4);
    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();
    let once = det.raw_pixels().to_vec();
    assert!(once.iter().all(|&v| v == 1.0));
    assert!(det.image.frame().iter().all(|s| s.touched && s.omega == 1.0));

    det.image.reset();
    assert!(det.raw_pixels().iter().all(|&v| v == 0.0));
    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();
    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();
    det.image.scale_in_place(0.5);

    assert_eq!(det.raw_pixels(), once.as_slice());
}

#[test]
fn test_bragg_accumulates_across_channels() {
    let engine = allocated(&SimulationParameters::new());
    let store = unit_store(3);
    let mut det = detector(2, 3, 5);

    for channel in 0..store.len() {
        engine.accumulate_bragg(&FlatBragg, channel, &store, &mut det).unwrap();
    }
    // F^2 summed over F = 1, 2, 3
    assert!(det.raw_pixels().iter().all(|&v| v == 14.0));
    // The frame only holds the last channel
    assert!(det.image.floatimage().iter().all(|&v| v == 9.0));
}

#[test]
fn test_update_sources_between_channels() {
    let mut engine = allocated(&SimulationParameters::new());
    let store = unit_store(2);
    let mut det = detector(1, 2, 2);

    engine.update_sources(&[1.0], &[1.0e-10]).unwrap();
    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();
    engine.update_sources(&[0.5], &[0.9e-10]).unwrap();
    engine.accumulate_bragg(&FlatBragg, 1, &store, &mut det).unwrap();

    // 1 * 1 + 4 * 0.5
    assert!(det.raw_pixels().iter().all(|&v| v == 3.0));
}

#[test]
fn test_pixels_outside_roi_are_zero() {
    let roi = RegionOfInterest {
        xmin: 1,
        xmax: 2,
        ymin: 0,
        ymax: 1,
    };
    let engine = allocated(&SimulationParameters::new().with_roi(roi));
    let store = unit_store(1);
    let mut det = detector(2, 3, 4);
    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();

    let fast_dim = det.geometry.fast_dim();
    for (offset, &value) in det.raw_pixels().iter().enumerate() {
        let addr = det.geometry.address_of(offset).unwrap();
        let inside = roi.contains(addr.slow, addr.fast);
        assert_eq!(value, if inside { 1.0 } else { 0.0 }, "offset {offset}");
        assert_eq!(det.image.frame()[offset].touched, inside);
        assert!(addr.fast < fast_dim);
    }
}

#[test]
fn test_background_twice_is_double() {
    let params = SimulationParameters::new().with_background(
        vec![0.0, 0.05, 0.1, 0.2],
        vec![10.0, 8.0, 3.0, 1.0],
    );
    let engine = allocated(&params);
    let mut det = detector(3, 6, 5);

    engine.accumulate_background(&StolBackground, &mut det).unwrap();
    let single = det.raw_pixels().to_vec();
    assert!(single.iter().any(|&v| v != single[0]), "expected a varying image");

    engine.accumulate_background(&StolBackground, &mut det).unwrap();
    for (doubled, once) in det.raw_pixels().iter().zip(&single) {
        assert_eq!(*doubled, 2.0 * once);
    }
}

#[test]
fn test_uniform_background_table_gives_uniform_image() {
    let c = 2.5;
    let params = SimulationParameters::new()
        .with_fluence(1e20)
        .with_background(vec![0.0, 0.1, 0.2, 0.4], vec![c; 4]);
    let engine = allocated(&params);
    let mut det = detector(1, 7, 9);

    engine.accumulate_background(&StolBackground, &mut det).unwrap();
    let first = det.raw_pixels()[0];
    assert_relative_eq!(first, c * 20.0, epsilon = 1e-12);
    for &v in det.raw_pixels() {
        assert_relative_eq!(v, first, epsilon = 1e-12);
    }
}

#[test]
fn test_background_clears_side_buffers() {
    let params = SimulationParameters::new().with_background(vec![0.0], vec![1.0]);
    let engine = allocated(&params);
    let store = unit_store(1);
    let mut det = detector(1, 2, 2);

    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();
    assert!(det.image.frame().iter().all(|s| s.omega == 1.0));

    engine.accumulate_background(&StolBackground, &mut det).unwrap();
    assert!(det
        .image
        .frame()
        .iter()
        .all(|s| s.omega == 0.0 && !s.touched && s.max_i_x == 0.0 && s.max_i_y == 0.0));
}

#[test]
fn test_results_independent_of_thread_count() {
    let params = SimulationParameters::new()
        .with_background(vec![0.0, 0.05, 0.3], vec![4.0, 2.0, 1.0]);
    let store = unit_store(2);

    let run = |threads: usize| {
        let mut engine = ExascaleEngine::with_dispatch(RayonDispatch::with_threads(threads).unwrap());
        engine.allocate(&params).unwrap();
        let mut det = detector(4, 16, 16);
        engine.accumulate_bragg(&RampBragg, 0, &store, &mut det).unwrap();
        engine.accumulate_bragg(&RampBragg, 1, &store, &mut det).unwrap();
        engine.accumulate_background(&StolBackground, &mut det).unwrap();
        det.raw_pixels().to_vec()
    };

    let serial = run(1);
    assert_eq!(serial, run(4));
    assert_eq!(serial, run(7));
}

#[test]
fn test_kernel_fault_is_typed_and_leaves_accumulator() {
    let engine = allocated(&SimulationParameters::new());
    let store = unit_store(1);
    let mut det = detector(3, 4, 4);
    engine.accumulate_bragg(&FlatBragg, 0, &store, &mut det).unwrap();
    let before = det.raw_pixels().to_vec();

    // offset 37 lies on panel 2
    let err = engine
        .accumulate_bragg(&FaultAt(37), 0, &store, &mut det)
        .unwrap_err();
    assert!(err.is_fatal());
    match &err {
        Error::KernelFault {
            kernel,
            channel,
            panel,
            fault,
        } => {
            assert_eq!(*kernel, "fault_at");
            assert_eq!(*channel, Some(0));
            assert_eq!(*panel, Some(2));
            assert_eq!(fault.pixel, Some(37));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("fault_at"));
    assert_eq!(det.raw_pixels(), before.as_slice());
}

#[test]
fn test_dump_range_reads_table() {
    let mut store = EnergyChannelStore::new(HklBounds::new((0, 1), (0, 1), (0, 2)).unwrap()).unwrap();
    let values: Vec<f64> = (0..12u32).map(|i| f64::from(i) * 0.5).collect();
    let id = store.insert(&values).unwrap();
    let engine = ExascaleEngine::new();

    let entries = store.dump_range(engine.dispatch(), id, 9, 12).unwrap();
    assert_eq!(entries, vec![(9, 4.5), (10, 5.0), (11, 5.5)]);
    assert_eq!(store.table(id).unwrap().amplitudes(), values.as_slice());
}

#[test]
fn test_background_panels_get_their_own_geometry() {
    let engine = allocated(&SimulationParameters::new());
    let mut det = detector(3, 2, 3);

    engine.accumulate_background(&PanelIndexBackground, &mut det).unwrap();
    for panel in 0..det.panel_count() {
        // detector() spaces panel distances by 0.05 starting at 0.1
        let expected = (0.1 + panel as f64 * 0.05) * 100.0;
        let values = det.image.panel_accumulated(panel).unwrap();
        assert_eq!(values.len(), 6);
        for &v in values {
            assert_relative_eq!(v, expected, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_background_fault_is_typed_and_leaves_accumulator() {
    let params = SimulationParameters::new().with_background(vec![0.0, 0.2], vec![5.0, 1.0]);
    let engine = allocated(&params);
    let mut det = detector(3, 3, 3);
    engine.accumulate_background(&StolBackground, &mut det).unwrap();
    let before = det.raw_pixels().to_vec();

    let kernel = FailingBackground {
        panel: 1,
        slow: 2,
        fast: 0,
    };
    let err = engine.accumulate_background(&kernel, &mut det).unwrap_err();
    assert!(err.is_fatal());
    match err {
        Error::KernelFault {
            kernel,
            channel,
            panel,
            fault,
        } => {
            assert_eq!(kernel, "failing_background");
            assert_eq!(channel, None);
            assert_eq!(panel, Some(1));
            // panel 1 starts at 9; local pixel (2, 0) is 6 further
            assert_eq!(fault.pixel, Some(15));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(det.raw_pixels(), before.as_slice());
}

#[test]
fn test_nan_background_lookup_is_not_a_panic() {
    struct NanStol;

    impl BackgroundKernel for NanStol {
        fn evaluate(
            &self,
            input: &BackgroundInput<'_>,
            _pixel: PixelAddress,
        ) -> Result<f64, KernelFault> {
            let value = input.background.fbg_at(f64::NAN);
            if value.is_nan() {
                return Err(KernelFault::new("degenerate scattering angle"));
            }
            Ok(value)
        }
    }

    let params = SimulationParameters::new().with_background(vec![0.0, 0.1], vec![2.0, 1.0]);
    let engine = allocated(&params);
    let mut det = detector(1, 2, 2);

    let err = engine.accumulate_background(&NanStol, &mut det).unwrap_err();
    assert!(matches!(err, Error::KernelFault { channel: None, .. }));
    assert!(det.raw_pixels().iter().all(|&v| v == 0.0));
}
