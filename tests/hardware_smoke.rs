//! Smoke test against a physical OCT device.
//!
//! Requires the vendor SDK, a connected device, and a probe descriptor:
//!
//! ```bash
//! OCT_PROBE_FILE=Probe_Standard_OCTG_LSM04.ini \
//! cargo test --test hardware_smoke --features "spectralradar_hardware,hardware_tests"
//! ```

#![cfg(all(feature = "spectralradar_hardware", feature = "hardware_tests"))]

use oct_daq::pipeline::{run_volume_acquisition, AcquisitionConfig};
use oct_daq::registry::ResourceRegistry;
use oct_daq::sdk::hardware::HardwareSdk;
use oct_daq::types::CameraPreset;
use std::path::PathBuf;
use std::sync::Arc;

#[test]
#[serial_test::serial]
fn hardware_volume_acquisition() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();

    let probe_file = std::env::var("OCT_PROBE_FILE")
        .unwrap_or_else(|_| "Probe_Standard_OCTG_LSM04.ini".to_string());

    let registry = Arc::new(ResourceRegistry::new(HardwareSdk::global()));
    let config = AcquisitionConfig {
        probe_file: PathBuf::from(probe_file),
        a_scans_per_b_scan: 128,
        b_scans_per_volume: 25,
        b_scan_length_mm: 10.0,
        volume_width_mm: 10.0,
        averaging: 3,
        preset: CameraPreset::Preset1,
    };

    let result = run_volume_acquisition(&registry, &config).unwrap();
    assert!(result.succeeded(), "acquisition failed on hardware");
    assert!(result.actual_time_s > 0.0);
    assert!(result.expected_time_s > 0.0);
    assert!(result.lost_frames >= 0);
    assert_eq!(registry.live_count(), 0);
}
