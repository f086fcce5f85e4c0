//! Export paths: the engine's own serializers plus a CSV sink.
//!
//! The native engine owns every binary format (RAW/SRM/SRR/Fits/VFF/VTK/
//! TIFF/...); this module only adds liveness checks in front of those entry
//! points. The CSV sink exists for the one artifact the engine does not
//! produce: the extracted surface height map together with the acquisition
//! metadata that makes it interpretable later.

use crate::error::Result;
use crate::pipeline::{AcquisitionConfig, AcquisitionResult};
use crate::registry::ResourceRegistry;
use crate::sdk::SpectralSdk;
use crate::types::{
    ComplexExportFormat, Data1dExportFormat, Data2dExportFormat, Data3dExportFormat, Handle,
    RawExportFormat,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Liveness-checked access to the engine's export serializers.
pub struct DataExporter {
    registry: Arc<ResourceRegistry>,
}

impl DataExporter {
    /// Create an exporter over the given registry.
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    /// Export a raw buffer through the engine.
    pub fn export_raw(&self, raw: Handle, format: RawExportFormat, path: &Path) -> Result<()> {
        self.registry.assert_live(raw)?;
        self.registry.sdk().export_raw_data(raw, format, path)
    }

    /// Export a complex buffer through the engine.
    pub fn export_complex(
        &self,
        complex: Handle,
        format: ComplexExportFormat,
        path: &Path,
    ) -> Result<()> {
        self.registry.assert_live(complex)?;
        self.registry.sdk().export_complex_data(complex, format, path)
    }

    /// Export a 1-D processed buffer through the engine.
    pub fn export_data_1d(
        &self,
        data: Handle,
        format: Data1dExportFormat,
        path: &Path,
    ) -> Result<()> {
        self.registry.assert_live(data)?;
        self.registry.sdk().export_data_1d(data, format, path)
    }

    /// Export a 2-D processed buffer through the engine.
    pub fn export_data_2d(
        &self,
        data: Handle,
        format: Data2dExportFormat,
        path: &Path,
    ) -> Result<()> {
        self.registry.assert_live(data)?;
        self.registry.sdk().export_data_2d(data, format, path)
    }

    /// Export a 3-D processed buffer through the engine.
    pub fn export_data_3d(
        &self,
        data: Handle,
        format: Data3dExportFormat,
        path: &Path,
    ) -> Result<()> {
        self.registry.assert_live(data)?;
        self.registry.sdk().export_data_3d(data, format, path)
    }
}

/// An engine-side output buffer that aggregates processed frames (and
/// optional colorized companions) for batch export.
///
/// Caller-owned like every other handle: release through
/// [`OutputBuffer::release`] or lose it to a registry leak report.
pub struct OutputBuffer {
    registry: Arc<ResourceRegistry>,
    handle: Handle,
}

impl OutputBuffer {
    /// Create an empty aggregator.
    pub fn new(registry: Arc<ResourceRegistry>) -> Result<Self> {
        let handle = registry.sdk().create_memory_buffer()?;
        registry.register(handle);
        Ok(Self { registry, handle })
    }

    /// The native buffer handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Append a processed frame, optionally with its colorized companion.
    pub fn append(&self, data: Handle, colored: Option<Handle>) -> Result<()> {
        self.registry.assert_live(self.handle)?;
        self.registry.assert_live(data)?;
        if let Some(c) = colored {
            self.registry.assert_live(c)?;
        }
        self.registry.sdk().append_to_buffer(self.handle, data, colored)
    }

    /// Release the native buffer.
    pub fn release(self) -> Result<()> {
        self.registry.release(self.handle)
    }
}

/// Serialize a surface height map as CSV, one row per fast-axis position.
pub fn write_surface_csv<W: Write>(surface: &Array2<f32>, writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    for row in surface.rows() {
        csv.serialize(row.to_vec())?;
    }
    csv.flush()?;
    Ok(())
}

/// Serialize a surface height map to a CSV file.
pub fn write_surface_csv_file(surface: &Array2<f32>, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_surface_csv(surface, file)
}

/// Metadata describing one volume acquisition run, written alongside the
/// exported surface so the capture stays interpretable.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeMetadata {
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// A-scans per B-scan.
    pub a_scans_per_b_scan: i32,
    /// B-scans per volume.
    pub b_scans_per_volume: i32,
    /// Fast axis extent in millimetres.
    pub b_scan_length_mm: f64,
    /// Slow axis extent in millimetres.
    pub volume_width_mm: f64,
    /// Averaging factor used on both probe and processing layers.
    pub averaging: i32,
    /// Measured acquisition time in seconds (`-1` on failure).
    pub actual_time_s: f64,
    /// Engine-predicted acquisition time in seconds (`-1` on failure).
    pub expected_time_s: f64,
    /// Dropped B-scans (`-1` on failure).
    pub lost_frames: i32,
}

impl VolumeMetadata {
    /// Combine a run's configuration and result into one record.
    pub fn from_run(config: &AcquisitionConfig, result: &AcquisitionResult) -> Self {
        Self {
            timestamp: Utc::now(),
            a_scans_per_b_scan: config.a_scans_per_b_scan,
            b_scans_per_volume: config.b_scans_per_volume,
            b_scan_length_mm: config.b_scan_length_mm,
            volume_width_mm: config.volume_width_mm,
            averaging: config.averaging,
            actual_time_s: result.actual_time_s,
            expected_time_s: result.expected_time_s,
            lost_frames: result.lost_frames,
        }
    }

    /// Write this record as a single-row CSV file with headers.
    pub fn write_csv_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut csv = csv::Writer::from_writer(file);
        csv.serialize(self)?;
        csv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceKind;
    use crate::sdk::mock::MockSdk;
    use crate::sdk::SpectralSdk;
    use ndarray::array;

    #[test]
    fn surface_csv_rows_match_array_rows() {
        let surface = array![[1.0f32, 2.0], [3.0, 4.0]];
        let mut out = Vec::new();
        write_surface_csv(&surface, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.trim(), "1.0,2.0\n3.0,4.0");
    }

    #[test]
    fn output_buffer_aggregates_processed_frames() {
        let sdk = Arc::new(MockSdk::new());
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        let buffer = OutputBuffer::new(registry.clone()).unwrap();
        let data = registry.register(sdk.create_data().unwrap());

        buffer.append(data, None).unwrap();

        registry.release(data).unwrap();
        assert!(buffer.append(data, None).is_err());

        buffer.release().unwrap();
        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.destroy_count(ResourceKind::Buffer), 1);
    }

    #[test]
    fn engine_export_requires_live_handle() {
        let sdk = Arc::new(MockSdk::new());
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        let exporter = DataExporter::new(registry.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.srr");

        let raw = registry.register(sdk.create_raw_data().unwrap());
        exporter
            .export_raw(raw, RawExportFormat::Srr, &path)
            .unwrap();
        assert!(path.exists());

        registry.release(raw).unwrap();
        assert!(exporter.export_raw(raw, RawExportFormat::Srr, &path).is_err());
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 1);
    }
}
