//! Handle and enum types shared across the binding layer.
//!
//! Every enum here mirrors an integer-valued enum of the native engine. The
//! numeric ids are part of the vendor ABI and must not be reordered. External
//! inputs (configuration values, script arguments) enter through the
//! `from_i32` constructors so out-of-range integers are rejected at the
//! boundary instead of being passed through to the native side unchecked.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of native resource a [`Handle`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// The OCT device itself.
    Device,
    /// A scan probe attached to a device.
    Probe,
    /// A processing pipeline bound to a device.
    Processing,
    /// A scan pattern built from a probe.
    ScanPattern,
    /// Raw interferometric spectra (u16).
    RawData,
    /// Processed depth-resolved data (f32).
    Data,
    /// Complex spectral data (interleaved f32 pairs).
    ComplexData,
    /// An output buffer aggregator.
    Buffer,
    /// Colorized display data appended alongside processed data.
    ColoredData,
}

impl ResourceKind {
    /// Stable lowercase label used in log output and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Device => "device",
            ResourceKind::Probe => "probe",
            ResourceKind::Processing => "processing",
            ResourceKind::ScanPattern => "scan_pattern",
            ResourceKind::RawData => "raw_data",
            ResourceKind::Data => "data",
            ResourceKind::ComplexData => "complex_data",
            ResourceKind::Buffer => "buffer",
            ResourceKind::ColoredData => "colored_data",
        }
    }

    /// All kinds, for per-kind bookkeeping tables.
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Device,
        ResourceKind::Probe,
        ResourceKind::Processing,
        ResourceKind::ScanPattern,
        ResourceKind::RawData,
        ResourceKind::Data,
        ResourceKind::ComplexData,
        ResourceKind::Buffer,
        ResourceKind::ColoredData,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A typed, opaque reference to a native-side resource.
///
/// The `id` is whatever the engine backend minted for the resource (a pointer
/// value for the real SDK, a counter for the mock). A handle carries no
/// liveness information of its own; the [`crate::registry::ResourceRegistry`]
/// is the authority on whether it may still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    kind: ResourceKind,
    id: u64,
}

impl Handle {
    pub(crate) fn new(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id }
    }

    /// The resource kind this handle refers to.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The backend-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.label(), self.id)
    }
}

/// Element type of a native data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 16-bit camera samples (raw spectra).
    U16,
    /// 32-bit floats (processed data).
    F32,
    /// Interleaved real/imaginary 32-bit float pairs.
    Complex32,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ElementKind::U16 => "u16",
            ElementKind::F32 => "f32",
            ElementKind::Complex32 => "complex32",
        };
        f.write_str(label)
    }
}

/// Three-dimensional buffer shape as reported by the native side.
pub type Shape3 = (usize, usize, usize);

/// How a measurement delivers data to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum AcquisitionMode {
    /// Continuous asynchronous acquisition; frames stream until stopped.
    AsyncContinuous = 0,
    /// Asynchronous acquisition of a finite number of frames.
    AsyncFinite = 1,
    /// Synchronous acquisition; each pull triggers one capture.
    Sync = 2,
}

impl AcquisitionMode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(AcquisitionMode::AsyncContinuous),
            1 => Some(AcquisitionMode::AsyncFinite),
            2 => Some(AcquisitionMode::Sync),
            _ => None,
        }
    }
}

/// Hardware trigger source for the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum TriggerMode {
    /// Internal free-running trigger (default).
    FreeRunning = 0,
    /// Trigger board starts the acquisition externally.
    ExternalStart = 1,
    /// Every A-scan is triggered externally.
    ExternalAScan = 2,
}

impl TriggerMode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TriggerMode::FreeRunning),
            1 => Some(TriggerMode::ExternalStart),
            2 => Some(TriggerMode::ExternalAScan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::FreeRunning => "free_running",
            TriggerMode::ExternalStart => "external_start",
            TriggerMode::ExternalAScan => "external_ascan",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "free_running" => Some(TriggerMode::FreeRunning),
            "external_start" => Some(TriggerMode::ExternalStart),
            "external_ascan" => Some(TriggerMode::ExternalAScan),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean processing toggles of the native pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ProcessingFlag {
    UseOffsetErrors = 0,
    RemoveDcSpectrum = 1,
    RemoveAdvancedDcSpectrum = 2,
    UseApodization = 3,
    UseScanForApodization = 4,
    UseUndersamplingFilter = 5,
    UseDispersionCompensation = 6,
    UseDechirp = 7,
    UseExtendedAdjust = 8,
    FullRangeOutput = 9,
    FilterDc = 10,
    UseAutocorrCompensation = 11,
    UseDefr = 12,
    OnlyWindowing = 13,
    RemoveFixedPattern = 14,
}

impl ProcessingFlag {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ProcessingFlag::UseOffsetErrors),
            1 => Some(ProcessingFlag::RemoveDcSpectrum),
            2 => Some(ProcessingFlag::RemoveAdvancedDcSpectrum),
            3 => Some(ProcessingFlag::UseApodization),
            4 => Some(ProcessingFlag::UseScanForApodization),
            5 => Some(ProcessingFlag::UseUndersamplingFilter),
            6 => Some(ProcessingFlag::UseDispersionCompensation),
            7 => Some(ProcessingFlag::UseDechirp),
            8 => Some(ProcessingFlag::UseExtendedAdjust),
            9 => Some(ProcessingFlag::FullRangeOutput),
            10 => Some(ProcessingFlag::FilterDc),
            11 => Some(ProcessingFlag::UseAutocorrCompensation),
            12 => Some(ProcessingFlag::UseDefr),
            13 => Some(ProcessingFlag::OnlyWindowing),
            14 => Some(ProcessingFlag::RemoveFixedPattern),
            _ => None,
        }
    }
}

/// Integer probe parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ProbeParameter {
    ApodizationCycles = 0,
    Oversampling = 1,
    OversamplingSlowAxis = 2,
    SpeckleReduction = 3,
}

impl ProbeParameter {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Integer processing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ProcessingParameter {
    SpectrumAveraging = 0,
    AScanAveraging = 1,
    BScanAveraging = 2,
    ZeroPadding = 3,
    NumberOfThreads = 4,
    FourierAveraging = 5,
}

impl ProcessingParameter {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Preset category passed to the device preset call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum PresetCategory {
    /// Camera speed vs. sensitivity trade-off presets.
    SpeedSensitivity = 0,
}

impl PresetCategory {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Camera preset slots within a category. The meaning of each slot is
/// device-specific (e.g. slot 1 selects the high-speed 146 kHz line rate on
/// the OCTG series).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum CameraPreset {
    Default = 0,
    Preset1 = 1,
    Preset2 = 2,
    Preset3 = 3,
    Preset4 = 4,
}

impl CameraPreset {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(CameraPreset::Default),
            1 => Some(CameraPreset::Preset1),
            2 => Some(CameraPreset::Preset2),
            3 => Some(CameraPreset::Preset3),
            4 => Some(CameraPreset::Preset4),
            _ => None,
        }
    }
}

/// Float-valued device properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum DeviceProperty {
    FullWellCapacity = 0,
    ZSpacing = 1,
    ZRange = 2,
    SignalAmplitudeMinDb = 3,
    SignalAmplitudeLowDb = 4,
    SignalAmplitudeHighDb = 5,
    SignalAmplitudeMaxDb = 6,
    BinToElectronScaling = 7,
    Temperature = 8,
    SldOnTimeSec = 9,
    CenterWavelengthNm = 10,
    SpectralWidthNm = 11,
    MaxTriggerFrequencyHz = 12,
}

impl DeviceProperty {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Integer properties of a raw data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RawDataProperty {
    Size1 = 0,
    Size2 = 1,
    Size3 = 2,
    NumberOfElements = 3,
    SizeInBytes = 4,
    BytesPerElement = 5,
    LostFrames = 6,
}

impl RawDataProperty {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Integer properties of a processed or complex data buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DataProperty {
    Dimensions = 0,
    Size1 = 1,
    Size2 = 2,
    Size3 = 3,
    NumberOfElements = 4,
    SizeInBytes = 5,
    BytesPerElement = 6,
}

impl DataProperty {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Integer properties of a scan pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ScanPatternProperty {
    /// Points along the fast axis.
    SizeX = 0,
    /// Repetitions along the slow axis.
    SizeY = 1,
    /// Total resolved scanner positions (LUT length).
    Size = 2,
}

impl ScanPatternProperty {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Apodization acquisition strategy for volume patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ApodizationType {
    /// One apodization spectrum for the whole volume.
    OneForAll = 0,
    /// A fresh apodization spectrum per B-scan.
    EachBScan = 1,
}

impl ApodizationType {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ApodizationType::OneForAll),
            1 => Some(ApodizationType::EachBScan),
            _ => None,
        }
    }
}

/// Frame delivery order for volume patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum AcquisitionOrder {
    /// Deliver frame by frame as B-scans complete.
    FrameByFrame = 0,
    /// Deliver the whole volume in one transfer.
    All = 1,
}

impl AcquisitionOrder {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(AcquisitionOrder::FrameByFrame),
            1 => Some(AcquisitionOrder::All),
            _ => None,
        }
    }
}

/// Axis selector for raw-data concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Direction {
    Dim1 = 0,
    Dim2 = 1,
    Dim3 = 2,
}

impl Direction {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Export formats for raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RawExportFormat {
    Raw = 0,
    Srr = 1,
}

/// Export formats for complex data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ComplexExportFormat {
    Raw = 0,
}

/// Export formats for one-dimensional processed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Data1dExportFormat {
    Raw = 0,
    Txt = 1,
    Csv = 2,
    TableTxt = 3,
    Fits = 4,
}

/// Export formats for two-dimensional processed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Data2dExportFormat {
    Srm = 0,
    Raw = 1,
    Txt = 2,
    Csv = 3,
    TableTxt = 4,
    Fits = 5,
}

/// Export formats for three-dimensional processed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Data3dExportFormat {
    Srm = 0,
    Raw = 1,
    Txt = 2,
    Csv = 3,
    Vff = 4,
    Vtk = 5,
    Fits = 6,
    Tiff = 7,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_mode_roundtrip() {
        for mode in [
            TriggerMode::FreeRunning,
            TriggerMode::ExternalStart,
            TriggerMode::ExternalAScan,
        ] {
            assert_eq!(TriggerMode::from_i32(mode.as_i32()), Some(mode));
            assert_eq!(TriggerMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(TriggerMode::from_i32(3), None);
        assert_eq!(TriggerMode::from_str("bogus"), None);
    }

    #[test]
    fn out_of_range_ids_rejected() {
        assert_eq!(AcquisitionMode::from_i32(-1), None);
        assert_eq!(ProcessingFlag::from_i32(15), None);
        assert_eq!(CameraPreset::from_i32(5), None);
        assert_eq!(ApodizationType::from_i32(2), None);
        assert_eq!(AcquisitionOrder::from_i32(9), None);
    }

    #[test]
    fn vendor_ids_are_stable() {
        // These ids are part of the native ABI.
        assert_eq!(ProcessingFlag::RemoveFixedPattern.as_i32(), 14);
        assert_eq!(ProbeParameter::Oversampling.as_i32(), 1);
        assert_eq!(ProcessingParameter::AScanAveraging.as_i32(), 1);
        assert_eq!(RawDataProperty::LostFrames.as_i32(), 6);
        assert_eq!(DeviceProperty::MaxTriggerFrequencyHz.as_i32(), 12);
        assert_eq!(Data3dExportFormat::Tiff as i32, 7);
    }

    #[test]
    fn handle_display() {
        let h = Handle::new(ResourceKind::RawData, 7);
        assert_eq!(h.to_string(), "raw_data#7");
        assert_eq!(h.kind(), ResourceKind::RawData);
    }
}
