//! Hardware implementation of [`SpectralSdk`] over `spectralradar-sys`.
//!
//! The native library is loaded once per process (a hard constraint of the
//! vendor runtime), so [`HardwareSdk::global`] hands out one shared instance
//! behind a `OnceCell`; nothing outside the session/registry plumbing should
//! reach for the raw bindings directly.
//!
//! Handles store the native pointer value in [`Handle::id`]. The engine
//! reports creation failures by returning null, which this layer converts
//! into typed errors before the pointer can propagate. Most other native
//! entry points return `void`; like the vendor's own sample code, the shim
//! treats them as infallible and relies on the null-checks at creation and
//! the safe layer's shape checks for everything else.

#![allow(unsafe_code)]

use crate::error::{OctError, Result};
use crate::sdk::SpectralSdk;
use crate::types::{
    AcquisitionMode, AcquisitionOrder, ApodizationType, CameraPreset, ComplexExportFormat,
    Data1dExportFormat, Data2dExportFormat, Data3dExportFormat, DataProperty, DeviceProperty,
    Direction, Handle, PresetCategory, ProbeParameter, ProcessingFlag, ProcessingParameter,
    RawDataProperty, RawExportFormat, ResourceKind, ScanPatternProperty, TriggerMode,
};
use num_complex::Complex32;
use once_cell::sync::OnceCell;
use spectralradar_sys as ffi;
use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

static INSTANCE: OnceCell<Arc<HardwareSdk>> = OnceCell::new();

/// Shim over the vendor library. Stateless beyond the pointer values the
/// engine itself owns; `Send + Sync` because the engine serializes internally
/// and the session layer never issues concurrent calls on one device.
pub struct HardwareSdk {
    _private: (),
}

impl HardwareSdk {
    /// The process-wide instance. The vendor DLL must only be initialized
    /// once per process; all sessions share this handle.
    pub fn global() -> Arc<Self> {
        INSTANCE
            .get_or_init(|| Arc::new(HardwareSdk { _private: () }))
            .clone()
    }

    fn handle_from_ptr<T>(kind: ResourceKind, ptr: *mut T) -> Result<Handle> {
        if ptr.is_null() {
            if kind == ResourceKind::Device {
                return Err(OctError::DeviceInit(
                    "initDevice returned a null handle (device not found or driver not loaded)"
                        .into(),
                ));
            }
            return Err(OctError::HandleCreation { kind });
        }
        Ok(Handle::new(kind, ptr as u64))
    }

    fn ptr<T>(handle: Handle) -> *mut T {
        handle.id() as *mut T
    }
}

/// Convert a path into the nul-terminated wide string the Windows-only
/// vendor API expects for export destinations.
fn to_wide(path: &Path) -> Vec<u16> {
    let mut wide: Vec<u16> = path.to_string_lossy().encode_utf16().collect();
    wide.push(0);
    wide
}

fn to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().as_bytes()).map_err(|_| OctError::NativeCall {
        call: "path conversion",
        code: -1,
    })
}

impl SpectralSdk for HardwareSdk {
    // -- lifecycle ----------------------------------------------------------

    fn init_device(&self) -> Result<Handle> {
        // SAFETY: initDevice takes no arguments and returns null on failure,
        // which handle_from_ptr rejects.
        let ptr = unsafe { ffi::initDevice() };
        Self::handle_from_ptr(ResourceKind::Device, ptr)
    }

    fn init_probe(&self, device: Handle, probe_file: &Path) -> Result<Handle> {
        let file = to_cstring(probe_file)?;
        // SAFETY: device is a live handle minted by initDevice; file is a
        // valid nul-terminated string for the duration of the call.
        let ptr = unsafe { ffi::initProbe(Self::ptr(device), file.as_ptr()) };
        Self::handle_from_ptr(ResourceKind::Probe, ptr)
    }

    fn create_processing_for_device(&self, device: Handle) -> Result<Handle> {
        // SAFETY: device is a live device handle.
        let ptr = unsafe { ffi::createProcessingForDevice(Self::ptr(device)) };
        Self::handle_from_ptr(ResourceKind::Processing, ptr)
    }

    fn create_raw_data(&self) -> Result<Handle> {
        // SAFETY: no arguments; null return handled.
        let ptr = unsafe { ffi::createRawData() };
        Self::handle_from_ptr(ResourceKind::RawData, ptr)
    }

    fn create_data(&self) -> Result<Handle> {
        // SAFETY: no arguments; null return handled.
        let ptr = unsafe { ffi::createData() };
        Self::handle_from_ptr(ResourceKind::Data, ptr)
    }

    fn create_complex_data(&self) -> Result<Handle> {
        // SAFETY: no arguments; null return handled.
        let ptr = unsafe { ffi::createComplexData() };
        Self::handle_from_ptr(ResourceKind::ComplexData, ptr)
    }

    fn create_memory_buffer(&self) -> Result<Handle> {
        // SAFETY: no arguments; null return handled.
        let ptr = unsafe { ffi::createMemoryBuffer() };
        Self::handle_from_ptr(ResourceKind::Buffer, ptr)
    }

    fn destroy(&self, handle: Handle) -> Result<()> {
        // SAFETY: the registry guarantees each handle reaches its per-kind
        // native clear exactly once, with the pointer still valid.
        unsafe {
            match handle.kind() {
                ResourceKind::Device => ffi::closeDevice(Self::ptr(handle)),
                ResourceKind::Probe => ffi::closeProbe(Self::ptr(handle)),
                ResourceKind::Processing => ffi::clearProcessing(Self::ptr(handle)),
                ResourceKind::ScanPattern => ffi::clearScanPattern(Self::ptr(handle)),
                ResourceKind::RawData => ffi::clearRawData(Self::ptr(handle)),
                ResourceKind::Data | ResourceKind::ColoredData => {
                    ffi::clearData(Self::ptr(handle))
                }
                ResourceKind::ComplexData => ffi::clearComplexData(Self::ptr(handle)),
                ResourceKind::Buffer => ffi::clearBuffer(Self::ptr(handle)),
            }
        }
        Ok(())
    }

    // -- device -------------------------------------------------------------

    fn device_property_float(&self, device: Handle, prop: DeviceProperty) -> Result<f32> {
        // SAFETY: device is live; the property id is a vendor enum value.
        Ok(unsafe { ffi::getDevicePropertyFloat(Self::ptr(device), prop.as_i32()) })
    }

    fn wavelength_at_pixel(&self, device: Handle, pixel: i32) -> Result<f64> {
        // SAFETY: device is live; out-of-range pixels return 0.0 per vendor
        // documentation.
        Ok(unsafe { ffi::getWavelengthAtPixel(Self::ptr(device), pixel) })
    }

    fn set_trigger_mode(&self, device: Handle, mode: TriggerMode) -> Result<()> {
        // SAFETY: device is live; the mode id is a vendor enum value.
        unsafe { ffi::setTriggerMode(Self::ptr(device), mode.as_i32()) };
        Ok(())
    }

    fn set_device_preset(
        &self,
        device: Handle,
        category: PresetCategory,
        probe: Handle,
        processing: Handle,
        preset: CameraPreset,
    ) -> Result<()> {
        // SAFETY: all three handles are live; ids are vendor enum values.
        unsafe {
            ffi::setDevicePreset(
                Self::ptr(device),
                category.as_i32(),
                Self::ptr(probe),
                Self::ptr(processing),
                preset.as_i32(),
            )
        };
        Ok(())
    }

    // -- probe / processing configuration ------------------------------------

    fn set_probe_parameter(&self, probe: Handle, param: ProbeParameter, value: i32) -> Result<()> {
        // SAFETY: probe is live; the parameter id is a vendor enum value.
        unsafe { ffi::setProbeParameterInt(Self::ptr(probe), param.as_i32(), value) };
        Ok(())
    }

    fn set_processing_parameter(
        &self,
        processing: Handle,
        param: ProcessingParameter,
        value: i32,
    ) -> Result<()> {
        // SAFETY: processing is live; the parameter id is a vendor enum value.
        unsafe { ffi::setProcessingParameterInt(Self::ptr(processing), param.as_i32(), value) };
        Ok(())
    }

    fn set_processing_flag(
        &self,
        processing: Handle,
        flag: ProcessingFlag,
        enabled: bool,
    ) -> Result<()> {
        // SAFETY: processing is live; BOOL is an int on the vendor side.
        unsafe {
            ffi::setProcessingFlag(Self::ptr(processing), flag.as_i32(), enabled as i32)
        };
        Ok(())
    }

    fn set_processed_data_output(&self, processing: Handle, data: Handle) -> Result<()> {
        // SAFETY: both handles are live; the engine keeps the binding until
        // rebound, and the registry keeps `data` alive while bound.
        unsafe { ffi::setProcessedDataOutput(Self::ptr(processing), Self::ptr(data)) };
        Ok(())
    }

    fn set_complex_data_output(&self, processing: Handle, complex: Handle) -> Result<()> {
        // SAFETY: both handles are live.
        unsafe { ffi::setComplexDataOutput(Self::ptr(processing), Self::ptr(complex)) };
        Ok(())
    }

    fn execute_processing(&self, processing: Handle, raw: Handle) -> Result<()> {
        // SAFETY: both handles are live; raw has been filled by getRawData.
        unsafe { ffi::executeProcessing(Self::ptr(processing), Self::ptr(raw)) };
        Ok(())
    }

    fn determine_surface(&self, volume: Handle, surface: Handle) -> Result<()> {
        // SAFETY: both are live processed-data handles; the engine resizes
        // the surface buffer itself.
        unsafe { ffi::determineSurface(Self::ptr(volume), Self::ptr(surface)) };
        Ok(())
    }

    // -- scan patterns --------------------------------------------------------

    fn create_no_scan_pattern(
        &self,
        probe: Handle,
        scans: i32,
        samples_per_scan: i32,
    ) -> Result<Handle> {
        // SAFETY: probe is live; null return handled.
        let ptr = unsafe { ffi::createNoScanPattern(Self::ptr(probe), scans, samples_per_scan) };
        Self::handle_from_ptr(ResourceKind::ScanPattern, ptr)
    }

    fn create_b_scan_pattern(
        &self,
        probe: Handle,
        range_mm: f64,
        a_scans: i32,
        apodize: bool,
    ) -> Result<Handle> {
        // SAFETY: probe is live; null return handled.
        let ptr = unsafe {
            ffi::createBScanPattern(Self::ptr(probe), range_mm, a_scans, apodize as i32)
        };
        Self::handle_from_ptr(ResourceKind::ScanPattern, ptr)
    }

    fn create_volume_pattern(
        &self,
        probe: Handle,
        range_x_mm: f64,
        size_x: i32,
        range_y_mm: f64,
        size_y: i32,
        apodization: ApodizationType,
        order: AcquisitionOrder,
    ) -> Result<Handle> {
        // SAFETY: probe is live; ids are vendor enum values; null return
        // handled.
        let ptr = unsafe {
            ffi::createVolumePattern(
                Self::ptr(probe),
                range_x_mm,
                size_x,
                range_y_mm,
                size_y,
                apodization.as_i32(),
                order.as_i32(),
            )
        };
        Self::handle_from_ptr(ResourceKind::ScanPattern, ptr)
    }

    fn create_freeform_pattern(
        &self,
        probe: Handle,
        positions: &[f32],
        size_x: i32,
        size_y: i32,
        apodize: bool,
    ) -> Result<Handle> {
        debug_assert_eq!(positions.len() as i32, 2 * size_x * size_y);
        // SAFETY: probe is live; positions holds 2*size_x*size_y contiguous
        // f32 values (validated by the pattern builder) and outlives the
        // call, which copies them.
        let ptr = unsafe {
            ffi::createFreeformScanPattern(
                Self::ptr(probe),
                positions.as_ptr(),
                size_x,
                size_y,
                apodize as i32,
            )
        };
        Self::handle_from_ptr(ResourceKind::ScanPattern, ptr)
    }

    fn rotate_scan_pattern(&self, pattern: Handle, radians: f64) -> Result<()> {
        // SAFETY: pattern is live.
        unsafe { ffi::rotateScanPattern(Self::ptr(pattern), radians) };
        Ok(())
    }

    fn scan_pattern_property(&self, pattern: Handle, prop: ScanPatternProperty) -> Result<i32> {
        // SAFETY: pattern is live; the property id is a vendor enum value.
        Ok(unsafe { ffi::getScanPatternPropertyInt(Self::ptr(pattern), prop.as_i32()) })
    }

    fn scan_pattern_lut(&self, pattern: Handle, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        debug_assert_eq!(xs.len(), ys.len());
        // SAFETY: pattern is live; xs/ys are sized to the pattern's resolved
        // point count by the caller, which is exactly what the engine writes.
        unsafe {
            ffi::getScanPatternLUT(Self::ptr(pattern), xs.as_mut_ptr(), ys.as_mut_ptr())
        };
        Ok(())
    }

    fn expected_acquisition_time_s(&self, pattern: Handle, device: Handle) -> Result<f64> {
        // SAFETY: both handles are live.
        Ok(unsafe { ffi::expectedAcquisitionTime_s(Self::ptr(pattern), Self::ptr(device)) })
    }

    // -- acquisition ----------------------------------------------------------

    fn start_measurement(
        &self,
        device: Handle,
        pattern: Handle,
        mode: AcquisitionMode,
    ) -> Result<()> {
        // SAFETY: device and pattern are live; the mode id is a vendor enum
        // value.
        unsafe {
            ffi::startMeasurement(Self::ptr(device), Self::ptr(pattern), mode.as_i32())
        };
        Ok(())
    }

    fn stop_measurement(&self, device: Handle) -> Result<()> {
        // SAFETY: device is live; safe to call from a thread other than the
        // one blocked in getRawData — the engine unblocks that call.
        unsafe { ffi::stopMeasurement(Self::ptr(device)) };
        Ok(())
    }

    fn get_raw_data(&self, device: Handle, raw: Handle) -> Result<()> {
        // SAFETY: both handles are live; the call blocks until one
        // frame/volume is available or the measurement stops, and resizes the
        // raw buffer itself.
        unsafe { ffi::getRawData(Self::ptr(device), Self::ptr(raw)) };
        Ok(())
    }

    fn get_raw_data_ex(&self, device: Handle, raw: Handle, camera_index: i32) -> Result<Handle> {
        // SAFETY: both handles are live; camera_index selects a camera on
        // multi-spectrometer devices.
        let ptr = unsafe { ffi::getRawDataEx(Self::ptr(device), Self::ptr(raw), camera_index) };
        Self::handle_from_ptr(ResourceKind::RawData, ptr)
    }

    fn append_raw_data(&self, dst: Handle, src: Handle, direction: Direction) -> Result<()> {
        // SAFETY: both handles are live; the direction id is a vendor enum
        // value.
        unsafe { ffi::appendRawData(Self::ptr(dst), Self::ptr(src), direction.as_i32()) };
        Ok(())
    }

    // -- introspection --------------------------------------------------------

    fn raw_data_property(&self, raw: Handle, prop: RawDataProperty) -> Result<i32> {
        // SAFETY: raw is live; the property id is a vendor enum value.
        Ok(unsafe { ffi::getRawDataPropertyInt(Self::ptr(raw), prop.as_i32()) })
    }

    fn data_property(&self, data: Handle, prop: DataProperty) -> Result<i32> {
        // SAFETY: data is live; the property id is a vendor enum value.
        Ok(unsafe { ffi::getDataPropertyInt(Self::ptr(data), prop.as_i32()) })
    }

    fn complex_data_property(&self, complex: Handle, prop: DataProperty) -> Result<i32> {
        // SAFETY: complex is live; the property id is a vendor enum value.
        Ok(unsafe { ffi::getComplexDataPropertyInt(Self::ptr(complex), prop.as_i32()) })
    }

    // -- bulk copy ------------------------------------------------------------

    fn copy_raw_data_content(&self, raw: Handle, dst: &mut [u16]) -> Result<()> {
        // SAFETY: raw is live; dst holds exactly the element count reported
        // by the introspection calls (the marshal layer checked), which is
        // what the engine writes.
        unsafe { ffi::copyRawDataContent(Self::ptr(raw), dst.as_mut_ptr()) };
        Ok(())
    }

    fn copy_data_content(&self, data: Handle, dst: &mut [f32]) -> Result<()> {
        // SAFETY: as above; the engine writes element_count f32 values.
        unsafe { ffi::copyDataContent(Self::ptr(data), dst.as_mut_ptr()) };
        Ok(())
    }

    fn copy_complex_data_content(&self, complex: Handle, dst: &mut [Complex32]) -> Result<()> {
        // SAFETY: as above. Complex32 is repr(C) { re: f32, im: f32 }, the
        // same layout as the vendor's ComplexFloat, so the interleaved pairs
        // land correctly.
        unsafe {
            ffi::copyComplexDataContent(Self::ptr(complex), dst.as_mut_ptr().cast())
        };
        Ok(())
    }

    // -- buffers / export -----------------------------------------------------

    fn append_to_buffer(
        &self,
        buffer: Handle,
        data: Handle,
        colored: Option<Handle>,
    ) -> Result<()> {
        let colored_ptr = colored.map_or(std::ptr::null_mut(), Self::ptr);
        // SAFETY: buffer and data are live; a null colored handle is
        // accepted by the engine.
        unsafe { ffi::appendToBuffer(Self::ptr(buffer), Self::ptr(data), colored_ptr) };
        Ok(())
    }

    fn export_raw_data(&self, raw: Handle, format: RawExportFormat, path: &Path) -> Result<()> {
        let wide = to_wide(path);
        // SAFETY: raw is live; wide is a nul-terminated UTF-16 path that
        // outlives the call.
        unsafe { ffi::exportRawData(Self::ptr(raw), format as i32, wide.as_ptr()) };
        Ok(())
    }

    fn export_complex_data(
        &self,
        complex: Handle,
        format: ComplexExportFormat,
        path: &Path,
    ) -> Result<()> {
        let wide = to_wide(path);
        // SAFETY: complex is live; wide is a nul-terminated UTF-16 path.
        unsafe { ffi::exportComplexData(Self::ptr(complex), format as i32, wide.as_ptr()) };
        Ok(())
    }

    fn export_data_1d(&self, data: Handle, format: Data1dExportFormat, path: &Path) -> Result<()> {
        let wide = to_wide(path);
        // SAFETY: data is live; wide is a nul-terminated UTF-16 path.
        unsafe { ffi::exportData1D(Self::ptr(data), format as i32, wide.as_ptr()) };
        Ok(())
    }

    fn export_data_2d(&self, data: Handle, format: Data2dExportFormat, path: &Path) -> Result<()> {
        let wide = to_wide(path);
        // SAFETY: data is live; wide is a nul-terminated UTF-16 path.
        unsafe { ffi::exportData2D(Self::ptr(data), format as i32, wide.as_ptr()) };
        Ok(())
    }

    fn export_data_3d(&self, data: Handle, format: Data3dExportFormat, path: &Path) -> Result<()> {
        let wide = to_wide(path);
        // SAFETY: data is live; wide is a nul-terminated UTF-16 path.
        unsafe { ffi::exportData3D(Self::ptr(data), format as i32, wide.as_ptr()) };
        Ok(())
    }
}
