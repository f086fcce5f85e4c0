//! Native engine abstraction.
//!
//! [`SpectralSdk`] enumerates the complete operation set of the vendor
//! imaging engine as a safe, object-safe trait. Two implementations exist:
//!
//! - [`MockSdk`](mock::MockSdk) (feature `mock`, default): a deterministic
//!   in-memory engine used for development and the mock-mode test suite. It
//!   supports error injection so tests can fail any step of an acquisition.
//! - [`HardwareSdk`](hardware::HardwareSdk) (feature
//!   `spectralradar_hardware`): a thin unsafe shim over `spectralradar-sys`.
//!
//! All methods take `&self` so the trait is usable as `Arc<dyn SpectralSdk>`;
//! implementations use internal mutability. Methods are synchronous because
//! the native calls are synchronous; callers that need to stay responsive run
//! them on a blocking task (see `pipeline::run_volume_acquisition_async`).
//!
//! The bulk copy methods are **length-unchecked on the native side** — they
//! write `element_count` elements into the destination no matter how long it
//! is. The safe layer ([`crate::marshal`]) verifies shape and element type
//! before ever reaching them; nothing outside `marshal` should call them.

pub mod mock;

#[cfg(feature = "spectralradar_hardware")]
pub mod hardware;

use crate::error::Result;
use crate::types::{
    AcquisitionMode, AcquisitionOrder, ApodizationType, CameraPreset, ComplexExportFormat,
    Data1dExportFormat, Data2dExportFormat, Data3dExportFormat, DataProperty, DeviceProperty,
    Direction, Handle, PresetCategory, ProbeParameter, ProcessingFlag, ProcessingParameter,
    RawDataProperty, RawExportFormat, ScanPatternProperty, TriggerMode,
};
use num_complex::Complex32;
use std::path::Path;

/// Operation set of the native OCT imaging engine.
///
/// One trait method maps to one native entry point; no call batching happens
/// at this layer. Handle lifetime is *not* enforced here — that is the
/// [`crate::registry::ResourceRegistry`]'s job — but implementations must
/// fail with a `NativeCall` error rather than crash when given a stale
/// handle they still know about.
pub trait SpectralSdk: Send + Sync {
    // -- lifecycle ---------------------------------------------------------

    /// Open the OCT device. Fails with `DeviceInit` when the native call
    /// returns a null reference.
    fn init_device(&self) -> Result<Handle>;

    /// Load a probe descriptor file and bind the probe to the device.
    fn init_probe(&self, device: Handle, probe_file: &Path) -> Result<Handle>;

    /// Create a processing pipeline configured for the device's camera.
    fn create_processing_for_device(&self, device: Handle) -> Result<Handle>;

    /// Create an empty raw data buffer.
    fn create_raw_data(&self) -> Result<Handle>;

    /// Create an empty processed data buffer.
    fn create_data(&self) -> Result<Handle>;

    /// Create an empty complex data buffer.
    fn create_complex_data(&self) -> Result<Handle>;

    /// Create an output buffer aggregator.
    fn create_memory_buffer(&self) -> Result<Handle>;

    /// Destroy a native resource. Dispatches to the per-kind native clear
    /// (`closeDevice`, `closeProbe`, `clearProcessing`, `clearScanPattern`,
    /// `clearRawData`, `clearData`, `clearComplexData`, `clearBuffer`).
    /// Only the registry calls this.
    fn destroy(&self, handle: Handle) -> Result<()>;

    // -- device ------------------------------------------------------------

    /// Read a float-valued device property.
    fn device_property_float(&self, device: Handle, prop: DeviceProperty) -> Result<f32>;

    /// Calibrated wavelength at a given spectrometer pixel, in nanometres.
    fn wavelength_at_pixel(&self, device: Handle, pixel: i32) -> Result<f64>;

    /// Select the scanner trigger source.
    fn set_trigger_mode(&self, device: Handle, mode: TriggerMode) -> Result<()>;

    /// Apply a device preset. The native call reconfigures device, probe and
    /// processing together, which is why all three handles are required.
    fn set_device_preset(
        &self,
        device: Handle,
        category: PresetCategory,
        probe: Handle,
        processing: Handle,
        preset: CameraPreset,
    ) -> Result<()>;

    // -- probe / processing configuration ----------------------------------

    /// Set an integer probe parameter.
    fn set_probe_parameter(&self, probe: Handle, param: ProbeParameter, value: i32) -> Result<()>;

    /// Set an integer processing parameter.
    fn set_processing_parameter(
        &self,
        processing: Handle,
        param: ProcessingParameter,
        value: i32,
    ) -> Result<()>;

    /// Toggle a boolean processing stage.
    fn set_processing_flag(
        &self,
        processing: Handle,
        flag: ProcessingFlag,
        enabled: bool,
    ) -> Result<()>;

    /// Bind a processed-data buffer as the processing output.
    fn set_processed_data_output(&self, processing: Handle, data: Handle) -> Result<()>;

    /// Bind a complex-data buffer as the spectral-domain output.
    fn set_complex_data_output(&self, processing: Handle, complex: Handle) -> Result<()>;

    /// Run the processing pipeline over a filled raw buffer.
    fn execute_processing(&self, processing: Handle, raw: Handle) -> Result<()>;

    /// Extract a 2-D surface height map from a processed volume into the
    /// given surface buffer.
    fn determine_surface(&self, volume: Handle, surface: Handle) -> Result<()>;

    // -- scan patterns ------------------------------------------------------

    /// Stationary-beam pattern: `scans` acquisitions of `samples_per_scan`
    /// A-scans each, without scanner movement.
    fn create_no_scan_pattern(
        &self,
        probe: Handle,
        scans: i32,
        samples_per_scan: i32,
    ) -> Result<Handle>;

    /// Single B-scan across `range_mm` millimetres.
    fn create_b_scan_pattern(
        &self,
        probe: Handle,
        range_mm: f64,
        a_scans: i32,
        apodize: bool,
    ) -> Result<Handle>;

    /// Rectangular volume raster.
    #[allow(clippy::too_many_arguments)]
    fn create_volume_pattern(
        &self,
        probe: Handle,
        range_x_mm: f64,
        size_x: i32,
        range_y_mm: f64,
        size_y: i32,
        apodization: ApodizationType,
        order: AcquisitionOrder,
    ) -> Result<Handle>;

    /// Free-form pattern from interleaved X,Y scanner positions. The caller
    /// ([`crate::pattern::ScanPatternBuilder`]) has already validated
    /// `positions.len() == 2 * size_x * size_y`; implementations may assume
    /// it.
    fn create_freeform_pattern(
        &self,
        probe: Handle,
        positions: &[f32],
        size_x: i32,
        size_y: i32,
        apodize: bool,
    ) -> Result<Handle>;

    /// Rotate a pattern in-plane by the given angle in radians, using the
    /// engine's own transform so device calibration is preserved.
    fn rotate_scan_pattern(&self, pattern: Handle, radians: f64) -> Result<()>;

    /// Integer pattern introspection (sizes, LUT length).
    fn scan_pattern_property(&self, pattern: Handle, prop: ScanPatternProperty) -> Result<i32>;

    /// Read back the resolved scanner lookup-table coordinates. `xs` and
    /// `ys` must each hold exactly `ScanPatternProperty::Size` elements.
    fn scan_pattern_lut(&self, pattern: Handle, xs: &mut [f64], ys: &mut [f64]) -> Result<()>;

    /// Expected wall-clock acquisition time for one run of the pattern.
    fn expected_acquisition_time_s(&self, pattern: Handle, device: Handle) -> Result<f64>;

    // -- acquisition --------------------------------------------------------

    /// Arm the scanner and start acquiring with the given pattern.
    fn start_measurement(
        &self,
        device: Handle,
        pattern: Handle,
        mode: AcquisitionMode,
    ) -> Result<()>;

    /// Stop a running measurement. Idempotent; safe to call from a different
    /// thread than the one blocked in [`SpectralSdk::get_raw_data`].
    fn stop_measurement(&self, device: Handle) -> Result<()>;

    /// Block until one frame/volume of raw data is available and transfer it
    /// into the raw buffer. Returns `MeasurementStopped` if a concurrent
    /// stop lands before data is ready.
    fn get_raw_data(&self, device: Handle, raw: Handle) -> Result<()>;

    /// Multi-camera variant of [`SpectralSdk::get_raw_data`]; fills `raw`
    /// from the camera at `camera_index` and returns the filled handle.
    fn get_raw_data_ex(&self, device: Handle, raw: Handle, camera_index: i32) -> Result<Handle>;

    /// Concatenate `src` onto `dst` along the given axis.
    fn append_raw_data(&self, dst: Handle, src: Handle, direction: Direction) -> Result<()>;

    // -- introspection ------------------------------------------------------

    /// Integer property of a raw buffer (dimensions, sizes, lost frames).
    fn raw_data_property(&self, raw: Handle, prop: RawDataProperty) -> Result<i32>;

    /// Integer property of a processed buffer.
    fn data_property(&self, data: Handle, prop: DataProperty) -> Result<i32>;

    /// Integer property of a complex buffer.
    fn complex_data_property(&self, complex: Handle, prop: DataProperty) -> Result<i32>;

    // -- bulk copy ----------------------------------------------------------

    /// Copy raw u16 samples out, row-major, tightly packed. Length-unchecked
    /// on the native side; `crate::marshal` checks first.
    fn copy_raw_data_content(&self, raw: Handle, dst: &mut [u16]) -> Result<()>;

    /// Copy processed f32 samples out, row-major, tightly packed.
    fn copy_data_content(&self, data: Handle, dst: &mut [f32]) -> Result<()>;

    /// Copy complex samples out as interleaved real/imaginary f32 pairs.
    fn copy_complex_data_content(&self, complex: Handle, dst: &mut [Complex32]) -> Result<()>;

    // -- buffers / export ---------------------------------------------------

    /// Append a processed frame (and optional colorized companion) to an
    /// output buffer aggregator.
    fn append_to_buffer(&self, buffer: Handle, data: Handle, colored: Option<Handle>)
        -> Result<()>;

    /// Export raw data through the engine's serializer.
    fn export_raw_data(&self, raw: Handle, format: RawExportFormat, path: &Path) -> Result<()>;

    /// Export complex data through the engine's serializer.
    fn export_complex_data(
        &self,
        complex: Handle,
        format: ComplexExportFormat,
        path: &Path,
    ) -> Result<()>;

    /// Export a 1-D processed buffer.
    fn export_data_1d(&self, data: Handle, format: Data1dExportFormat, path: &Path) -> Result<()>;

    /// Export a 2-D processed buffer.
    fn export_data_2d(&self, data: Handle, format: Data2dExportFormat, path: &Path) -> Result<()>;

    /// Export a 3-D processed buffer.
    fn export_data_3d(&self, data: Handle, format: Data3dExportFormat, path: &Path) -> Result<()>;
}
