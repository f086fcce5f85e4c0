//! Integration tests for the volume acquisition pipeline.
//!
//! Runs entirely against the mock engine:
//!
//! ```bash
//! cargo test --test volume_pipeline
//! ```
//!
//! The leak matrix injects a failure at every step of the pipeline and
//! asserts that the registry ends with the same live-handle count it
//! started with — the pipeline must never leak a native handle, no matter
//! where it dies.

use oct_daq::export::{write_surface_csv_file, VolumeMetadata};
use oct_daq::pipeline::{run_volume_acquisition, AcquisitionConfig};
use oct_daq::registry::ResourceRegistry;
use oct_daq::sdk::mock::MockSdk;
use oct_daq::types::{CameraPreset, ResourceKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn reference_config() -> AcquisitionConfig {
    AcquisitionConfig {
        probe_file: PathBuf::from("Probe_Standard_OCTG_LSM04.ini"),
        a_scans_per_b_scan: 128,
        b_scans_per_volume: 25,
        b_scan_length_mm: 10.0,
        volume_width_mm: 10.0,
        averaging: 3,
        preset: CameraPreset::Preset1,
    }
}

fn rig() -> (Arc<MockSdk>, Arc<ResourceRegistry>) {
    let sdk = Arc::new(MockSdk::new());
    sdk.set_acquisition_delay(Duration::from_millis(1));
    let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
    (sdk, registry)
}

#[test]
fn end_to_end_volume_acquisition() {
    let (_sdk, registry) = rig();
    let result = run_volume_acquisition(&registry, &reference_config()).unwrap();

    assert!(result.succeeded());
    assert!(result.lost_frames >= 0);
    assert!(result.actual_time_s > 0.0);
    assert!(result.expected_time_s > 0.0);

    let surface = result.surface.as_ref().unwrap();
    assert_eq!(surface.dim(), (128, 25));
    assert_eq!(registry.live_count(), 0);
}

#[test]
fn device_open_failure_yields_sentinel_result_and_no_leaks() {
    let (sdk, registry) = rig();
    sdk.set_fail_device_init(true);

    let result = run_volume_acquisition(&registry, &reference_config()).unwrap();
    assert!(result.surface.is_none());
    assert_eq!(result.actual_time_s, -1.0);
    assert_eq!(result.expected_time_s, -1.0);
    assert_eq!(result.lost_frames, -1);
    assert_eq!(registry.live_count(), 0);
    assert_eq!(sdk.live_native_objects(), 0);
}

#[test]
fn failure_at_every_step_leaks_nothing() {
    // One injection per pipeline step, from configuration through surface
    // extraction. Each run must fail soft and release everything it made.
    let injections: Vec<(&str, Box<dyn Fn(&MockSdk)>)> = vec![
        (
            "probe creation",
            Box::new(|sdk| sdk.set_fail_next_create(Some(ResourceKind::Probe))),
        ),
        (
            "processing creation",
            Box::new(|sdk| sdk.set_fail_next_create(Some(ResourceKind::Processing))),
        ),
        (
            "raw buffer creation",
            Box::new(|sdk| sdk.set_fail_next_create(Some(ResourceKind::RawData))),
        ),
        (
            "volume buffer creation",
            Box::new(|sdk| sdk.set_fail_next_create(Some(ResourceKind::Data))),
        ),
        (
            "pattern creation",
            Box::new(|sdk| sdk.set_fail_next_create(Some(ResourceKind::ScanPattern))),
        ),
        (
            "measurement start",
            Box::new(|sdk| sdk.set_fail_start_measurement(true)),
        ),
        (
            "raw data pull",
            Box::new(|sdk| sdk.set_fail_get_raw_data(true)),
        ),
        (
            "processing execution",
            Box::new(|sdk| sdk.set_fail_execute_processing(true)),
        ),
        (
            "surface determination",
            Box::new(|sdk| sdk.set_fail_determine_surface(true)),
        ),
    ];

    for (step, inject) in injections {
        let (sdk, registry) = rig();
        inject(&sdk);
        let result = run_volume_acquisition(&registry, &reference_config()).unwrap();
        assert!(
            result.surface.is_none(),
            "injected failure at {step} should fail the run"
        );
        assert_eq!(
            registry.live_count(),
            0,
            "injected failure at {step} leaked registry handles"
        );
        assert_eq!(
            sdk.live_native_objects(),
            0,
            "injected failure at {step} leaked native objects"
        );
    }
}

#[test]
fn reported_lost_frames_surface_in_result() {
    let (sdk, registry) = rig();
    sdk.set_lost_frames(2);
    let result = run_volume_acquisition(&registry, &reference_config()).unwrap();
    assert!(result.succeeded());
    assert_eq!(result.lost_frames, 2);
}

#[test]
fn repeated_runs_reuse_the_engine_cleanly() {
    let (sdk, registry) = rig();
    for _ in 0..3 {
        let result = run_volume_acquisition(&registry, &reference_config()).unwrap();
        assert!(result.succeeded());
    }
    assert_eq!(registry.live_count(), 0);
    assert_eq!(sdk.live_native_objects(), 0);
}

#[test]
fn surface_and_metadata_export_round_trip() {
    let (_sdk, registry) = rig();
    let config = reference_config();
    let result = run_volume_acquisition(&registry, &config).unwrap();
    let surface = result.surface.as_ref().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let surface_path = dir.path().join("surface.csv");
    let meta_path = dir.path().join("surface_meta.csv");

    write_surface_csv_file(surface, &surface_path).unwrap();
    VolumeMetadata::from_run(&config, &result)
        .write_csv_file(&meta_path)
        .unwrap();

    let surface_text = std::fs::read_to_string(&surface_path).unwrap();
    assert_eq!(surface_text.lines().count(), 128);
    assert_eq!(surface_text.lines().next().unwrap().split(',').count(), 25);

    let meta_text = std::fs::read_to_string(&meta_path).unwrap();
    assert!(meta_text.contains("a_scans_per_b_scan"));
    assert!(meta_text.contains("128"));
}
