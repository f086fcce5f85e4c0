//! Deterministic in-memory implementation of [`SpectralSdk`].
//!
//! The mock engine reproduces the observable behavior of the native library
//! closely enough to exercise every path of the binding layer: handle
//! minting, shape introspection, blocking raw-data pulls that observe a
//! cross-thread stop, a processing stage that turns u16 spectra into an f32
//! depth volume, argmax surface extraction, and LUT geometry with real
//! in-plane rotation.
//!
//! Error injection mirrors the style used for the camera mocks elsewhere in
//! this codebase (`set_fail_*` switches that trip once or persistently), so
//! integration tests can fail an acquisition at any step and assert that no
//! handles leak.

use crate::error::{OctError, Result};
use crate::sdk::SpectralSdk;
use crate::types::{
    AcquisitionMode, AcquisitionOrder, ApodizationType, CameraPreset, ComplexExportFormat,
    Data1dExportFormat, Data2dExportFormat, Data3dExportFormat, DataProperty, DeviceProperty,
    Direction, Handle, PresetCategory, ProbeParameter, ProcessingFlag, ProcessingParameter,
    RawDataProperty, RawExportFormat, ResourceKind, ScanPatternProperty, Shape3, TriggerMode,
};
use num_complex::Complex32;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Spectrometer pixels per A-scan in the simulated camera.
pub const SPECTRUM_SAMPLES: usize = 512;

/// Depth bins in the simulated processed output (half the spectrum).
pub const DEPTH_SAMPLES: usize = SPECTRUM_SAMPLES / 2;

fn line_rate_hz(preset: CameraPreset) -> f64 {
    // Loose model of the OCTG camera preset table; slot 1 is the
    // high-speed 146 kHz mode.
    match preset {
        CameraPreset::Default => 28_000.0,
        CameraPreset::Preset1 => 146_000.0,
        CameraPreset::Preset2 => 76_000.0,
        CameraPreset::Preset3 => 48_000.0,
        CameraPreset::Preset4 => 5_500.0,
    }
}

#[derive(Debug, Clone)]
struct DeviceState {
    preset: CameraPreset,
    #[allow(dead_code)]
    trigger: TriggerMode,
    measuring: Option<ActiveMeasurement>,
}

#[derive(Debug, Clone)]
struct ActiveMeasurement {
    pattern: u64,
    #[allow(dead_code)]
    mode: AcquisitionMode,
}

#[derive(Debug, Clone)]
struct ProbeState {
    device: u64,
    #[allow(dead_code)]
    descriptor: PathBuf,
    params: HashMap<i32, i32>,
}

#[derive(Debug, Clone, Default)]
struct ProcessingState {
    #[allow(dead_code)]
    device: u64,
    params: HashMap<i32, i32>,
    #[allow(dead_code)]
    flags: HashMap<i32, bool>,
    processed_out: Option<u64>,
    complex_out: Option<u64>,
}

#[derive(Debug, Clone)]
struct PatternState {
    probe: u64,
    size_x: usize,
    size_y: usize,
    positions: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Default)]
struct RawState {
    shape: Shape3,
    samples: Vec<u16>,
    lost_frames: i32,
}

#[derive(Debug, Clone, Default)]
struct DataState {
    dimensions: usize,
    shape: Shape3,
    samples: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
struct ComplexState {
    shape: Shape3,
    samples: Vec<Complex32>,
}

/// One-shot and persistent failure switches.
#[derive(Debug, Default)]
struct FailureInjection {
    device_init: bool,
    next_create: Option<ResourceKind>,
    start_measurement: bool,
    get_raw_data: bool,
    execute_processing: bool,
    determine_surface: bool,
    lost_frames: i32,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    devices: HashMap<u64, DeviceState>,
    probes: HashMap<u64, ProbeState>,
    processings: HashMap<u64, ProcessingState>,
    patterns: HashMap<u64, PatternState>,
    raw: HashMap<u64, RawState>,
    data: HashMap<u64, DataState>,
    complex: HashMap<u64, ComplexState>,
    buffers: HashMap<u64, Vec<u64>>,
    colored: HashMap<u64, ()>,
    destroy_counts: HashMap<ResourceKind, u64>,
    fail: FailureInjection,
}

impl Inner {
    fn mint(&mut self, kind: ResourceKind) -> Result<u64> {
        if self.fail.next_create == Some(kind) {
            self.fail.next_create = None;
            return Err(OctError::HandleCreation { kind });
        }
        self.next_id += 1;
        Ok(self.next_id)
    }

    fn pattern(&self, handle: Handle) -> Result<&PatternState> {
        self.patterns
            .get(&handle.id())
            .ok_or(OctError::NativeCall {
                call: "scanPattern lookup",
                code: -1,
            })
    }
}

/// In-memory mock of the native imaging engine.
pub struct MockSdk {
    inner: Mutex<Inner>,
    /// Generation counter bumped by `stop_measurement`; a blocked
    /// `get_raw_data` waits on this so a cross-thread stop wakes it.
    stop_generation: Mutex<u64>,
    stop_signal: Condvar,
    /// Simulated time until a raw frame is available.
    acquisition_delay: Mutex<Duration>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            stop_generation: Mutex::new(0),
            stop_signal: Condvar::new(),
            acquisition_delay: Mutex::new(Duration::from_millis(5)),
        }
    }

    // -- error injection and test introspection -----------------------------

    /// Make the next `init_device` return a null-device failure.
    pub fn set_fail_device_init(&self, fail: bool) {
        self.inner.lock().unwrap().fail.device_init = fail;
    }

    /// Make the next creation of the given kind return a null handle.
    pub fn set_fail_next_create(&self, kind: Option<ResourceKind>) {
        self.inner.lock().unwrap().fail.next_create = kind;
    }

    /// Make the next `start_measurement` fail.
    pub fn set_fail_start_measurement(&self, fail: bool) {
        self.inner.lock().unwrap().fail.start_measurement = fail;
    }

    /// Make the next `get_raw_data` fail.
    pub fn set_fail_get_raw_data(&self, fail: bool) {
        self.inner.lock().unwrap().fail.get_raw_data = fail;
    }

    /// Make the next `execute_processing` fail.
    pub fn set_fail_execute_processing(&self, fail: bool) {
        self.inner.lock().unwrap().fail.execute_processing = fail;
    }

    /// Make the next `determine_surface` fail.
    pub fn set_fail_determine_surface(&self, fail: bool) {
        self.inner.lock().unwrap().fail.determine_surface = fail;
    }

    /// Lost-frame count reported by subsequently filled raw buffers.
    pub fn set_lost_frames(&self, lost: i32) {
        self.inner.lock().unwrap().fail.lost_frames = lost;
    }

    /// Simulated delay before a raw frame becomes available.
    pub fn set_acquisition_delay(&self, delay: Duration) {
        *self.acquisition_delay.lock().unwrap() = delay;
    }

    /// Native destroy calls issued for a kind so far.
    pub fn destroy_count(&self, kind: ResourceKind) -> u64 {
        *self
            .inner
            .lock()
            .unwrap()
            .destroy_counts
            .get(&kind)
            .unwrap_or(&0)
    }

    /// Total native objects currently alive inside the mock engine.
    pub fn live_native_objects(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.devices.len()
            + inner.probes.len()
            + inner.processings.len()
            + inner.patterns.len()
            + inner.raw.len()
            + inner.data.len()
            + inner.complex.len()
            + inner.buffers.len()
            + inner.colored.len()
    }

    // -- synthetic data ------------------------------------------------------

    /// Synthetic interferogram sample: a smooth background with shot noise,
    /// plus a strong fringe whose depth encodes a surface at
    /// `100 + (x + y) % 50` bins, so the argmax surface extraction recovers
    /// a known height map. The noise stays far below the fringe amplitude,
    /// keeping every test assertion stable.
    fn raw_sample<R: rand::Rng>(rng: &mut R, z: usize, x: usize, y: usize) -> u16 {
        let background = ((z * 7 + x * 3 + y) % 1024) as u16;
        let noise: u16 = rng.gen_range(0..16);
        let surface_bin = 100 + (x + y) % 50;
        if z / 2 == surface_bin {
            background.saturating_add(20_000)
        } else {
            background.saturating_add(noise)
        }
    }
}

impl SpectralSdk for MockSdk {
    // -- lifecycle ----------------------------------------------------------

    fn init_device(&self) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail.device_init {
            return Err(OctError::DeviceInit(
                "no OCT device found (simulated null handle)".into(),
            ));
        }
        let id = inner.mint(ResourceKind::Device)?;
        inner.devices.insert(
            id,
            DeviceState {
                preset: CameraPreset::Default,
                trigger: TriggerMode::FreeRunning,
                measuring: None,
            },
        );
        Ok(Handle::new(ResourceKind::Device, id))
    }

    fn init_probe(&self, device: Handle, probe_file: &Path) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.devices.contains_key(&device.id()) {
            return Err(OctError::NativeCall {
                call: "initProbe",
                code: -1,
            });
        }
        let id = inner.mint(ResourceKind::Probe)?;
        let mut params = HashMap::new();
        params.insert(ProbeParameter::ApodizationCycles.as_i32(), 1);
        params.insert(ProbeParameter::Oversampling.as_i32(), 1);
        params.insert(ProbeParameter::OversamplingSlowAxis.as_i32(), 1);
        params.insert(ProbeParameter::SpeckleReduction.as_i32(), 0);
        inner.probes.insert(
            id,
            ProbeState {
                device: device.id(),
                descriptor: probe_file.to_path_buf(),
                params,
            },
        );
        Ok(Handle::new(ResourceKind::Probe, id))
    }

    fn create_processing_for_device(&self, device: Handle) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.devices.contains_key(&device.id()) {
            return Err(OctError::NativeCall {
                call: "createProcessingForDevice",
                code: -1,
            });
        }
        let id = inner.mint(ResourceKind::Processing)?;
        inner.processings.insert(
            id,
            ProcessingState {
                device: device.id(),
                ..ProcessingState::default()
            },
        );
        Ok(Handle::new(ResourceKind::Processing, id))
    }

    fn create_raw_data(&self) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.mint(ResourceKind::RawData)?;
        inner.raw.insert(id, RawState::default());
        Ok(Handle::new(ResourceKind::RawData, id))
    }

    fn create_data(&self) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.mint(ResourceKind::Data)?;
        inner.data.insert(id, DataState::default());
        Ok(Handle::new(ResourceKind::Data, id))
    }

    fn create_complex_data(&self) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.mint(ResourceKind::ComplexData)?;
        inner.complex.insert(id, ComplexState::default());
        Ok(Handle::new(ResourceKind::ComplexData, id))
    }

    fn create_memory_buffer(&self) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.mint(ResourceKind::Buffer)?;
        inner.buffers.insert(id, Vec::new());
        Ok(Handle::new(ResourceKind::Buffer, id))
    }

    fn destroy(&self, handle: Handle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let removed = match handle.kind() {
            ResourceKind::Device => inner.devices.remove(&handle.id()).is_some(),
            ResourceKind::Probe => inner.probes.remove(&handle.id()).is_some(),
            ResourceKind::Processing => inner.processings.remove(&handle.id()).is_some(),
            ResourceKind::ScanPattern => inner.patterns.remove(&handle.id()).is_some(),
            ResourceKind::RawData => inner.raw.remove(&handle.id()).is_some(),
            ResourceKind::Data => inner.data.remove(&handle.id()).is_some(),
            ResourceKind::ComplexData => inner.complex.remove(&handle.id()).is_some(),
            ResourceKind::Buffer => inner.buffers.remove(&handle.id()).is_some(),
            ResourceKind::ColoredData => inner.colored.remove(&handle.id()).is_some(),
        };
        if !removed {
            return Err(OctError::NativeCall {
                call: "clear",
                code: -2,
            });
        }
        *inner.destroy_counts.entry(handle.kind()).or_insert(0) += 1;
        Ok(())
    }

    // -- device -------------------------------------------------------------

    fn device_property_float(&self, device: Handle, prop: DeviceProperty) -> Result<f32> {
        let inner = self.inner.lock().unwrap();
        let state = inner.devices.get(&device.id()).ok_or(OctError::NativeCall {
            call: "getDevicePropertyFloat",
            code: -1,
        })?;
        let value = match prop {
            DeviceProperty::ZSpacing => 0.0027,
            DeviceProperty::ZRange => 3.6,
            DeviceProperty::CenterWavelengthNm => 900.0,
            DeviceProperty::SpectralWidthNm => 120.0,
            DeviceProperty::Temperature => 32.5,
            DeviceProperty::MaxTriggerFrequencyHz => line_rate_hz(state.preset) as f32,
            _ => 0.0,
        };
        Ok(value)
    }

    fn wavelength_at_pixel(&self, device: Handle, pixel: i32) -> Result<f64> {
        let inner = self.inner.lock().unwrap();
        if !inner.devices.contains_key(&device.id()) {
            return Err(OctError::NativeCall {
                call: "getWavelengthAtPixel",
                code: -1,
            });
        }
        // Linear spectrometer calibration across the simulated bandwidth.
        let span = 120.0;
        let start = 900.0 - span / 2.0;
        Ok(start + span * pixel as f64 / SPECTRUM_SAMPLES as f64)
    }

    fn set_trigger_mode(&self, device: Handle, mode: TriggerMode) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .devices
            .get_mut(&device.id())
            .ok_or(OctError::NativeCall {
                call: "setTriggerMode",
                code: -1,
            })?;
        state.trigger = mode;
        Ok(())
    }

    fn set_device_preset(
        &self,
        device: Handle,
        _category: PresetCategory,
        probe: Handle,
        processing: Handle,
        preset: CameraPreset,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.probes.contains_key(&probe.id()) || !inner.processings.contains_key(&processing.id())
        {
            return Err(OctError::NativeCall {
                call: "setDevicePreset",
                code: -1,
            });
        }
        let state = inner
            .devices
            .get_mut(&device.id())
            .ok_or(OctError::NativeCall {
                call: "setDevicePreset",
                code: -1,
            })?;
        state.preset = preset;
        Ok(())
    }

    // -- probe / processing configuration ------------------------------------

    fn set_probe_parameter(&self, probe: Handle, param: ProbeParameter, value: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .probes
            .get_mut(&probe.id())
            .ok_or(OctError::NativeCall {
                call: "setProbeParameterInt",
                code: -1,
            })?;
        state.params.insert(param.as_i32(), value);
        Ok(())
    }

    fn set_processing_parameter(
        &self,
        processing: Handle,
        param: ProcessingParameter,
        value: i32,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .processings
            .get_mut(&processing.id())
            .ok_or(OctError::NativeCall {
                call: "setProcessingParameterInt",
                code: -1,
            })?;
        state.params.insert(param.as_i32(), value);
        Ok(())
    }

    fn set_processing_flag(
        &self,
        processing: Handle,
        flag: ProcessingFlag,
        enabled: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .processings
            .get_mut(&processing.id())
            .ok_or(OctError::NativeCall {
                call: "setProcessingFlag",
                code: -1,
            })?;
        state.flags.insert(flag.as_i32(), enabled);
        Ok(())
    }

    fn set_processed_data_output(&self, processing: Handle, data: Handle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.data.contains_key(&data.id()) {
            return Err(OctError::NativeCall {
                call: "setProcessedDataOutput",
                code: -1,
            });
        }
        let state = inner
            .processings
            .get_mut(&processing.id())
            .ok_or(OctError::NativeCall {
                call: "setProcessedDataOutput",
                code: -1,
            })?;
        state.processed_out = Some(data.id());
        Ok(())
    }

    fn set_complex_data_output(&self, processing: Handle, complex: Handle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.complex.contains_key(&complex.id()) {
            return Err(OctError::NativeCall {
                call: "setComplexDataOutput",
                code: -1,
            });
        }
        let state = inner
            .processings
            .get_mut(&processing.id())
            .ok_or(OctError::NativeCall {
                call: "setComplexDataOutput",
                code: -1,
            })?;
        state.complex_out = Some(complex.id());
        Ok(())
    }

    fn execute_processing(&self, processing: Handle, raw: Handle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail.execute_processing {
            inner.fail.execute_processing = false;
            return Err(OctError::NativeCall {
                call: "executeProcessing",
                code: -7,
            });
        }
        let raw_state = inner.raw.get(&raw.id()).cloned().ok_or(OctError::NativeCall {
            call: "executeProcessing",
            code: -1,
        })?;
        let proc_state = inner
            .processings
            .get(&processing.id())
            .cloned()
            .ok_or(OctError::NativeCall {
                call: "executeProcessing",
                code: -1,
            })?;

        let (spectrum, xs, ys) = raw_state.shape;
        let depth = spectrum / 2;
        let averaging = proc_state
            .params
            .get(&ProcessingParameter::AScanAveraging.as_i32())
            .copied()
            .unwrap_or(1)
            .max(1) as usize;
        // A-scan averaging collapses the oversampled raw width back to the
        // pattern's A-scan count.
        let out_xs = (xs / averaging).max(1);

        if let Some(out_id) = proc_state.processed_out {
            let mut samples = vec![0.0f32; depth * out_xs * ys];
            for y in 0..ys {
                for ox in 0..out_xs {
                    for z in 0..depth {
                        // Average adjacent spectral bins and the averaging
                        // group of A-scans; the real engine does a Fourier
                        // transform and coherent averaging here.
                        let mut acc = 0.0f32;
                        for dx in 0..averaging {
                            let x = (ox * averaging + dx).min(xs - 1);
                            let a = raw_state.samples[(z * 2) * xs * ys + x * ys + y] as f32;
                            let b = raw_state.samples[(z * 2 + 1) * xs * ys + x * ys + y] as f32;
                            acc += (a + b) / 2.0;
                        }
                        samples[z * out_xs * ys + ox * ys + y] = acc / (16.0 * averaging as f32);
                    }
                }
            }
            if let Some(out) = inner.data.get_mut(&out_id) {
                out.dimensions = 3;
                out.shape = (depth, out_xs, ys);
                out.samples = samples;
            }
        }

        if let Some(out_id) = proc_state.complex_out {
            let mut samples = vec![Complex32::new(0.0, 0.0); depth * xs * ys];
            for (i, sample) in samples.iter_mut().enumerate() {
                let re = raw_state.samples[i * 2 % raw_state.samples.len()] as f32;
                let im = raw_state.samples[(i * 2 + 1) % raw_state.samples.len()] as f32;
                *sample = Complex32::new(re / 32.0, im / 32.0);
            }
            if let Some(out) = inner.complex.get_mut(&out_id) {
                out.shape = (depth, xs, ys);
                out.samples = samples;
            }
        }

        Ok(())
    }

    fn determine_surface(&self, volume: Handle, surface: Handle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail.determine_surface {
            inner.fail.determine_surface = false;
            return Err(OctError::NativeCall {
                call: "determineSurface",
                code: -8,
            });
        }
        let vol = inner
            .data
            .get(&volume.id())
            .cloned()
            .ok_or(OctError::NativeCall {
                call: "determineSurface",
                code: -1,
            })?;
        let (depth, xs, ys) = vol.shape;
        let mut heights = vec![0.0f32; xs * ys];
        for y in 0..ys {
            for x in 0..xs {
                let mut best_z = 0usize;
                let mut best = f32::MIN;
                for z in 0..depth {
                    let v = vol.samples[z * xs * ys + x * ys + y];
                    if v > best {
                        best = v;
                        best_z = z;
                    }
                }
                heights[x * ys + y] = best_z as f32;
            }
        }
        let out = inner
            .data
            .get_mut(&surface.id())
            .ok_or(OctError::NativeCall {
                call: "determineSurface",
                code: -1,
            })?;
        out.dimensions = 2;
        out.shape = (xs, ys, 1);
        out.samples = heights;
        Ok(())
    }

    // -- scan patterns -------------------------------------------------------

    fn create_no_scan_pattern(
        &self,
        probe: Handle,
        scans: i32,
        samples_per_scan: i32,
    ) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.probes.contains_key(&probe.id()) {
            return Err(OctError::NativeCall {
                call: "createNoScanPattern",
                code: -1,
            });
        }
        let id = inner.mint(ResourceKind::ScanPattern)?;
        let count = (scans * samples_per_scan).max(0) as usize;
        inner.patterns.insert(
            id,
            PatternState {
                probe: probe.id(),
                size_x: samples_per_scan.max(0) as usize,
                size_y: scans.max(0) as usize,
                positions: vec![(0.0, 0.0); count],
            },
        );
        Ok(Handle::new(ResourceKind::ScanPattern, id))
    }

    fn create_b_scan_pattern(
        &self,
        probe: Handle,
        range_mm: f64,
        a_scans: i32,
        _apodize: bool,
    ) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.probes.contains_key(&probe.id()) {
            return Err(OctError::NativeCall {
                call: "createBScanPattern",
                code: -1,
            });
        }
        let id = inner.mint(ResourceKind::ScanPattern)?;
        let n = a_scans.max(0) as usize;
        let positions = (0..n)
            .map(|i| {
                let frac = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.5 };
                ((frac - 0.5) * range_mm, 0.0)
            })
            .collect();
        inner.patterns.insert(
            id,
            PatternState {
                probe: probe.id(),
                size_x: n,
                size_y: 1,
                positions,
            },
        );
        Ok(Handle::new(ResourceKind::ScanPattern, id))
    }

    fn create_volume_pattern(
        &self,
        probe: Handle,
        range_x_mm: f64,
        size_x: i32,
        range_y_mm: f64,
        size_y: i32,
        _apodization: ApodizationType,
        _order: AcquisitionOrder,
    ) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.probes.contains_key(&probe.id()) {
            return Err(OctError::NativeCall {
                call: "createVolumePattern",
                code: -1,
            });
        }
        let id = inner.mint(ResourceKind::ScanPattern)?;
        let (nx, ny) = (size_x.max(0) as usize, size_y.max(0) as usize);
        let mut positions = Vec::with_capacity(nx * ny);
        for y in 0..ny {
            for x in 0..nx {
                let fx = if nx > 1 { x as f64 / (nx - 1) as f64 } else { 0.5 };
                let fy = if ny > 1 { y as f64 / (ny - 1) as f64 } else { 0.5 };
                positions.push(((fx - 0.5) * range_x_mm, (fy - 0.5) * range_y_mm));
            }
        }
        inner.patterns.insert(
            id,
            PatternState {
                probe: probe.id(),
                size_x: nx,
                size_y: ny,
                positions,
            },
        );
        Ok(Handle::new(ResourceKind::ScanPattern, id))
    }

    fn create_freeform_pattern(
        &self,
        probe: Handle,
        positions: &[f32],
        size_x: i32,
        size_y: i32,
        _apodize: bool,
    ) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.probes.contains_key(&probe.id()) {
            return Err(OctError::NativeCall {
                call: "createFreeformScanPattern",
                code: -1,
            });
        }
        let id = inner.mint(ResourceKind::ScanPattern)?;
        let pts = positions
            .chunks_exact(2)
            .map(|p| (p[0] as f64, p[1] as f64))
            .collect();
        inner.patterns.insert(
            id,
            PatternState {
                probe: probe.id(),
                size_x: size_x.max(0) as usize,
                size_y: size_y.max(0) as usize,
                positions: pts,
            },
        );
        Ok(Handle::new(ResourceKind::ScanPattern, id))
    }

    fn rotate_scan_pattern(&self, pattern: Handle, radians: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .patterns
            .get_mut(&pattern.id())
            .ok_or(OctError::NativeCall {
                call: "rotateScanPattern",
                code: -1,
            })?;
        let (sin, cos) = radians.sin_cos();
        for (x, y) in state.positions.iter_mut() {
            let (px, py) = (*x, *y);
            *x = px * cos - py * sin;
            *y = px * sin + py * cos;
        }
        Ok(())
    }

    fn scan_pattern_property(&self, pattern: Handle, prop: ScanPatternProperty) -> Result<i32> {
        let inner = self.inner.lock().unwrap();
        let state = inner.pattern(pattern)?;
        let value = match prop {
            ScanPatternProperty::SizeX => state.size_x as i32,
            ScanPatternProperty::SizeY => state.size_y as i32,
            ScanPatternProperty::Size => state.positions.len() as i32,
        };
        Ok(value)
    }

    fn scan_pattern_lut(&self, pattern: Handle, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.pattern(pattern)?;
        // The native call is length-unchecked; the safe layer sizes the
        // output arrays from ScanPatternProperty::Size before calling.
        let n = state.positions.len().min(xs.len()).min(ys.len());
        for i in 0..n {
            xs[i] = state.positions[i].0;
            ys[i] = state.positions[i].1;
        }
        Ok(())
    }

    fn expected_acquisition_time_s(&self, pattern: Handle, device: Handle) -> Result<f64> {
        let inner = self.inner.lock().unwrap();
        let state = inner.pattern(pattern)?;
        let device_state = inner.devices.get(&device.id()).ok_or(OctError::NativeCall {
            call: "expectedAcquisitionTime_s",
            code: -1,
        })?;
        let oversampling = inner
            .probes
            .get(&state.probe)
            .and_then(|p| p.params.get(&ProbeParameter::Oversampling.as_i32()))
            .copied()
            .unwrap_or(1)
            .max(1) as f64;
        Ok(state.positions.len() as f64 * oversampling / line_rate_hz(device_state.preset))
    }

    // -- acquisition ---------------------------------------------------------

    fn start_measurement(
        &self,
        device: Handle,
        pattern: Handle,
        mode: AcquisitionMode,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail.start_measurement {
            inner.fail.start_measurement = false;
            return Err(OctError::MeasurementStart(
                "scanner refused to arm (injected)".into(),
            ));
        }
        if !inner.patterns.contains_key(&pattern.id()) {
            return Err(OctError::MeasurementStart("unknown scan pattern".into()));
        }
        let state = inner
            .devices
            .get_mut(&device.id())
            .ok_or(OctError::MeasurementStart("unknown device".into()))?;
        if state.measuring.is_some() {
            return Err(OctError::MeasurementStart(
                "a measurement is already running".into(),
            ));
        }
        state.measuring = Some(ActiveMeasurement {
            pattern: pattern.id(),
            mode,
        });
        Ok(())
    }

    fn stop_measurement(&self, device: Handle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .devices
            .get_mut(&device.id())
            .ok_or(OctError::NativeCall {
                call: "stopMeasurement",
                code: -1,
            })?;
        state.measuring = None;
        drop(inner);

        let mut generation = self.stop_generation.lock().unwrap();
        *generation += 1;
        self.stop_signal.notify_all();
        Ok(())
    }

    fn get_raw_data(&self, device: Handle, raw: Handle) -> Result<()> {
        // Plan the frame while holding the engine lock, then release it for
        // the blocking wait so a concurrent stop_measurement can proceed.
        let (shape, lost_frames) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail.get_raw_data {
                inner.fail.get_raw_data = false;
                return Err(OctError::NativeCall {
                    call: "getRawData",
                    code: -5,
                });
            }
            let device_state = inner.devices.get(&device.id()).ok_or(OctError::NativeCall {
                call: "getRawData",
                code: -1,
            })?;
            let active = device_state
                .measuring
                .as_ref()
                .ok_or(OctError::MeasurementStopped)?;
            let pattern = inner
                .patterns
                .get(&active.pattern)
                .ok_or(OctError::NativeCall {
                    call: "getRawData",
                    code: -1,
                })?;
            let oversampling = inner
                .probes
                .get(&pattern.probe)
                .and_then(|p| p.params.get(&ProbeParameter::Oversampling.as_i32()))
                .copied()
                .unwrap_or(1)
                .max(1) as usize;
            if !inner.raw.contains_key(&raw.id()) {
                return Err(OctError::NativeCall {
                    call: "getRawData",
                    code: -1,
                });
            }
            (
                (SPECTRUM_SAMPLES, pattern.size_x * oversampling, pattern.size_y),
                inner.fail.lost_frames,
            )
        };

        // Block until the simulated exposure completes or a stop lands.
        let delay = *self.acquisition_delay.lock().unwrap();
        let generation = self.stop_generation.lock().unwrap();
        let start_generation = *generation;
        let (generation, _timeout) = self
            .stop_signal
            .wait_timeout_while(generation, delay, |g| *g == start_generation)
            .unwrap();
        if *generation != start_generation {
            return Err(OctError::MeasurementStopped);
        }
        drop(generation);

        let mut inner = self.inner.lock().unwrap();
        // Re-check: the stop may have landed between the wait and the lock.
        let still_measuring = inner
            .devices
            .get(&device.id())
            .map(|d| d.measuring.is_some())
            .unwrap_or(false);
        if !still_measuring {
            return Err(OctError::MeasurementStopped);
        }

        let (spectrum, xs, ys) = shape;
        let mut rng = rand::thread_rng();
        let mut samples = vec![0u16; spectrum * xs * ys];
        for z in 0..spectrum {
            for x in 0..xs {
                for y in 0..ys {
                    samples[z * xs * ys + x * ys + y] = Self::raw_sample(&mut rng, z, x, y);
                }
            }
        }
        let state = inner.raw.get_mut(&raw.id()).ok_or(OctError::NativeCall {
            call: "getRawData",
            code: -1,
        })?;
        state.shape = shape;
        state.samples = samples;
        state.lost_frames = lost_frames;
        Ok(())
    }

    fn get_raw_data_ex(&self, device: Handle, raw: Handle, _camera_index: i32) -> Result<Handle> {
        self.get_raw_data(device, raw)?;
        Ok(raw)
    }

    fn append_raw_data(&self, dst: Handle, src: Handle, direction: Direction) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let src_state = inner.raw.get(&src.id()).cloned().ok_or(OctError::NativeCall {
            call: "appendRawData",
            code: -1,
        })?;
        let dst_state = inner.raw.get_mut(&dst.id()).ok_or(OctError::NativeCall {
            call: "appendRawData",
            code: -1,
        })?;
        if dst_state.samples.is_empty() {
            *dst_state = src_state;
            return Ok(());
        }
        // Only appends along the slow axis keep storage contiguous; the
        // native engine has the same restriction for dimensions 1 and 2.
        let compatible = match direction {
            Direction::Dim3 => {
                dst_state.shape.0 == src_state.shape.0 && dst_state.shape.1 == src_state.shape.1
            }
            Direction::Dim1 | Direction::Dim2 => false,
        };
        if !compatible {
            return Err(OctError::NativeCall {
                call: "appendRawData",
                code: -4,
            });
        }
        dst_state.samples.extend_from_slice(&src_state.samples);
        dst_state.shape.2 += src_state.shape.2;
        dst_state.lost_frames += src_state.lost_frames;
        Ok(())
    }

    // -- introspection -------------------------------------------------------

    fn raw_data_property(&self, raw: Handle, prop: RawDataProperty) -> Result<i32> {
        let inner = self.inner.lock().unwrap();
        let state = inner.raw.get(&raw.id()).ok_or(OctError::NativeCall {
            call: "getRawDataPropertyInt",
            code: -1,
        })?;
        let value = match prop {
            RawDataProperty::Size1 => state.shape.0 as i32,
            RawDataProperty::Size2 => state.shape.1 as i32,
            RawDataProperty::Size3 => state.shape.2 as i32,
            RawDataProperty::NumberOfElements => state.samples.len() as i32,
            RawDataProperty::SizeInBytes => (state.samples.len() * 2) as i32,
            RawDataProperty::BytesPerElement => 2,
            RawDataProperty::LostFrames => state.lost_frames,
        };
        Ok(value)
    }

    fn data_property(&self, data: Handle, prop: DataProperty) -> Result<i32> {
        let inner = self.inner.lock().unwrap();
        let state = inner.data.get(&data.id()).ok_or(OctError::NativeCall {
            call: "getDataPropertyInt",
            code: -1,
        })?;
        let value = match prop {
            DataProperty::Dimensions => state.dimensions as i32,
            DataProperty::Size1 => state.shape.0 as i32,
            DataProperty::Size2 => state.shape.1 as i32,
            DataProperty::Size3 => state.shape.2 as i32,
            DataProperty::NumberOfElements => state.samples.len() as i32,
            DataProperty::SizeInBytes => (state.samples.len() * 4) as i32,
            DataProperty::BytesPerElement => 4,
        };
        Ok(value)
    }

    fn complex_data_property(&self, complex: Handle, prop: DataProperty) -> Result<i32> {
        let inner = self.inner.lock().unwrap();
        let state = inner.complex.get(&complex.id()).ok_or(OctError::NativeCall {
            call: "getComplexDataPropertyInt",
            code: -1,
        })?;
        let value = match prop {
            DataProperty::Dimensions => 3,
            DataProperty::Size1 => state.shape.0 as i32,
            DataProperty::Size2 => state.shape.1 as i32,
            DataProperty::Size3 => state.shape.2 as i32,
            DataProperty::NumberOfElements => state.samples.len() as i32,
            DataProperty::SizeInBytes => (state.samples.len() * 8) as i32,
            DataProperty::BytesPerElement => 8,
        };
        Ok(value)
    }

    // -- bulk copy -----------------------------------------------------------

    fn copy_raw_data_content(&self, raw: Handle, dst: &mut [u16]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.raw.get(&raw.id()).ok_or(OctError::NativeCall {
            call: "copyRawDataContent",
            code: -1,
        })?;
        // The real engine writes element_count elements unconditionally; a
        // short destination would be overrun. The marshal layer guarantees
        // the sizes match before this is ever reached.
        let n = state.samples.len().min(dst.len());
        dst[..n].copy_from_slice(&state.samples[..n]);
        Ok(())
    }

    fn copy_data_content(&self, data: Handle, dst: &mut [f32]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.data.get(&data.id()).ok_or(OctError::NativeCall {
            call: "copyDataContent",
            code: -1,
        })?;
        let n = state.samples.len().min(dst.len());
        dst[..n].copy_from_slice(&state.samples[..n]);
        Ok(())
    }

    fn copy_complex_data_content(&self, complex: Handle, dst: &mut [Complex32]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.complex.get(&complex.id()).ok_or(OctError::NativeCall {
            call: "copyComplexDataContent",
            code: -1,
        })?;
        let n = state.samples.len().min(dst.len());
        dst[..n].copy_from_slice(&state.samples[..n]);
        Ok(())
    }

    // -- buffers / export ----------------------------------------------------

    fn append_to_buffer(
        &self,
        buffer: Handle,
        data: Handle,
        colored: Option<Handle>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.data.contains_key(&data.id()) {
            return Err(OctError::NativeCall {
                call: "appendToBuffer",
                code: -1,
            });
        }
        if let Some(c) = colored {
            if !inner.colored.contains_key(&c.id()) {
                return Err(OctError::NativeCall {
                    call: "appendToBuffer",
                    code: -1,
                });
            }
        }
        let entries = inner
            .buffers
            .get_mut(&buffer.id())
            .ok_or(OctError::NativeCall {
                call: "appendToBuffer",
                code: -1,
            })?;
        entries.push(data.id());
        Ok(())
    }

    fn export_raw_data(&self, raw: Handle, format: RawExportFormat, path: &Path) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.raw.get(&raw.id()).ok_or(OctError::NativeCall {
            call: "exportRawData",
            code: -1,
        })?;
        let header = format!(
            "mock-raw format={:?} shape={:?} elements={}\n",
            format,
            state.shape,
            state.samples.len()
        );
        std::fs::write(path, header)?;
        Ok(())
    }

    fn export_complex_data(
        &self,
        complex: Handle,
        format: ComplexExportFormat,
        path: &Path,
    ) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.complex.get(&complex.id()).ok_or(OctError::NativeCall {
            call: "exportComplexData",
            code: -1,
        })?;
        let header = format!(
            "mock-complex format={:?} shape={:?} elements={}\n",
            format,
            state.shape,
            state.samples.len()
        );
        std::fs::write(path, header)?;
        Ok(())
    }

    fn export_data_1d(&self, data: Handle, format: Data1dExportFormat, path: &Path) -> Result<()> {
        self.export_data_common(data, format!("{format:?}"), path)
    }

    fn export_data_2d(&self, data: Handle, format: Data2dExportFormat, path: &Path) -> Result<()> {
        self.export_data_common(data, format!("{format:?}"), path)
    }

    fn export_data_3d(&self, data: Handle, format: Data3dExportFormat, path: &Path) -> Result<()> {
        self.export_data_common(data, format!("{format:?}"), path)
    }
}

impl MockSdk {
    fn export_data_common(&self, data: Handle, format: String, path: &Path) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let state = inner.data.get(&data.id()).ok_or(OctError::NativeCall {
            call: "exportData",
            code: -1,
        })?;
        let header = format!(
            "mock-data format={} dims={} shape={:?} elements={}\n",
            format,
            state.dimensions,
            state.shape,
            state.samples.len()
        );
        std::fs::write(path, header)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn probe_path() -> PathBuf {
        PathBuf::from("Probe_Standard_OCTG_LSM04.ini")
    }

    #[test]
    fn device_init_failure_injection() {
        let sdk = MockSdk::new();
        sdk.set_fail_device_init(true);
        assert!(matches!(sdk.init_device(), Err(OctError::DeviceInit(_))));
        sdk.set_fail_device_init(false);
        assert!(sdk.init_device().is_ok());
    }

    #[test]
    fn raw_pull_fills_shape_from_pattern() {
        let sdk = MockSdk::new();
        sdk.set_acquisition_delay(Duration::from_millis(1));
        let dev = sdk.init_device().unwrap();
        let probe = sdk.init_probe(dev, &probe_path()).unwrap();
        let pattern = sdk
            .create_volume_pattern(
                probe,
                10.0,
                16,
                10.0,
                4,
                ApodizationType::OneForAll,
                AcquisitionOrder::All,
            )
            .unwrap();
        let raw = sdk.create_raw_data().unwrap();

        sdk.start_measurement(dev, pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();
        sdk.get_raw_data(dev, raw).unwrap();
        sdk.stop_measurement(dev).unwrap();

        assert_eq!(
            sdk.raw_data_property(raw, RawDataProperty::Size1).unwrap(),
            SPECTRUM_SAMPLES as i32
        );
        assert_eq!(sdk.raw_data_property(raw, RawDataProperty::Size2).unwrap(), 16);
        assert_eq!(sdk.raw_data_property(raw, RawDataProperty::Size3).unwrap(), 4);
        assert_eq!(
            sdk.raw_data_property(raw, RawDataProperty::LostFrames).unwrap(),
            0
        );
    }

    #[test]
    fn oversampling_scales_raw_width_and_expected_time() {
        let sdk = MockSdk::new();
        sdk.set_acquisition_delay(Duration::from_millis(1));
        let dev = sdk.init_device().unwrap();
        let probe = sdk.init_probe(dev, &probe_path()).unwrap();
        let pattern = sdk
            .create_volume_pattern(
                probe,
                5.0,
                8,
                5.0,
                2,
                ApodizationType::OneForAll,
                AcquisitionOrder::All,
            )
            .unwrap();

        let t1 = sdk.expected_acquisition_time_s(pattern, dev).unwrap();
        sdk.set_probe_parameter(probe, ProbeParameter::Oversampling, 3)
            .unwrap();
        let t3 = sdk.expected_acquisition_time_s(pattern, dev).unwrap();
        assert!((t3 / t1 - 3.0).abs() < 1e-9);

        let raw = sdk.create_raw_data().unwrap();
        sdk.start_measurement(dev, pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();
        sdk.get_raw_data(dev, raw).unwrap();
        sdk.stop_measurement(dev).unwrap();
        assert_eq!(sdk.raw_data_property(raw, RawDataProperty::Size2).unwrap(), 24);
    }

    #[test]
    fn stop_from_other_thread_unblocks_pull() {
        let sdk = Arc::new(MockSdk::new());
        sdk.set_acquisition_delay(Duration::from_secs(30));
        let dev = sdk.init_device().unwrap();
        let probe = sdk.init_probe(dev, &probe_path()).unwrap();
        let pattern = sdk
            .create_b_scan_pattern(probe, 2.0, 32, true)
            .unwrap();
        let raw = sdk.create_raw_data().unwrap();
        sdk.start_measurement(dev, pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();

        let puller = {
            let sdk = sdk.clone();
            std::thread::spawn(move || sdk.get_raw_data(dev, raw))
        };
        std::thread::sleep(Duration::from_millis(20));
        sdk.stop_measurement(dev).unwrap();

        let result = puller.join().unwrap();
        assert!(matches!(result, Err(OctError::MeasurementStopped)));
    }

    #[test]
    fn processing_and_surface_recover_known_height_map() {
        let sdk = MockSdk::new();
        sdk.set_acquisition_delay(Duration::from_millis(1));
        let dev = sdk.init_device().unwrap();
        let probe = sdk.init_probe(dev, &probe_path()).unwrap();
        let proc = sdk.create_processing_for_device(dev).unwrap();
        let pattern = sdk
            .create_volume_pattern(
                probe,
                4.0,
                8,
                4.0,
                4,
                ApodizationType::OneForAll,
                AcquisitionOrder::All,
            )
            .unwrap();
        let raw = sdk.create_raw_data().unwrap();
        let volume = sdk.create_data().unwrap();
        let surface = sdk.create_data().unwrap();

        sdk.start_measurement(dev, pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();
        sdk.get_raw_data(dev, raw).unwrap();
        sdk.set_processed_data_output(proc, volume).unwrap();
        sdk.execute_processing(proc, raw).unwrap();
        sdk.stop_measurement(dev).unwrap();
        sdk.determine_surface(volume, surface).unwrap();

        assert_eq!(sdk.data_property(surface, DataProperty::Dimensions).unwrap(), 2);
        assert_eq!(sdk.data_property(surface, DataProperty::Size1).unwrap(), 8);
        assert_eq!(sdk.data_property(surface, DataProperty::Size2).unwrap(), 4);

        let n = sdk
            .data_property(surface, DataProperty::NumberOfElements)
            .unwrap() as usize;
        let mut heights = vec![0.0f32; n];
        sdk.copy_data_content(surface, &mut heights).unwrap();
        // The synthetic fringe puts the surface at depth 100 + (x + y) % 50.
        assert!((heights[0] - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rotation_transforms_lut() {
        let sdk = MockSdk::new();
        let dev = sdk.init_device().unwrap();
        let probe = sdk.init_probe(dev, &probe_path()).unwrap();
        let pattern = sdk.create_b_scan_pattern(probe, 2.0, 3, false).unwrap();

        let n = sdk
            .scan_pattern_property(pattern, ScanPatternProperty::Size)
            .unwrap() as usize;
        let (mut xs, mut ys) = (vec![0.0; n], vec![0.0; n]);
        sdk.scan_pattern_lut(pattern, &mut xs, &mut ys).unwrap();
        assert!((xs[0] + 1.0).abs() < 1e-12);

        sdk.rotate_scan_pattern(pattern, std::f64::consts::FRAC_PI_2)
            .unwrap();
        let (mut rx, mut ry) = (vec![0.0; n], vec![0.0; n]);
        sdk.scan_pattern_lut(pattern, &mut rx, &mut ry).unwrap();
        assert!(rx[0].abs() < 1e-12);
        assert!((ry[0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn destroy_counts_track_native_clears() {
        let sdk = MockSdk::new();
        let raw = sdk.create_raw_data().unwrap();
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 0);
        sdk.destroy(raw).unwrap();
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 1);
        assert!(sdk.destroy(raw).is_err());
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 1);
        assert_eq!(sdk.live_native_objects(), 0);
    }
}
