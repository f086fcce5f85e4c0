//! The volume acquisition pipeline.
//!
//! [`run_volume_acquisition`] sequences one full 3-D capture: open the
//! device, attach probe and processing, apply the speed/sensitivity preset,
//! set probe oversampling and processing A-scan averaging to the *same*
//! value (the processed output is scientifically invalid if the two layers
//! disagree), build a volume pattern, acquire, process, extract the surface,
//! and release every native handle in reverse-creation order on every exit
//! path.
//!
//! Expected device and measurement failures never escape this module: they
//! are logged and folded into a sentinel [`AcquisitionResult`] whose
//! `surface` is `None` and whose timing fields are `-1`. Programming errors
//! (use-after-release, malformed configuration) propagate as hard failures,
//! since they indicate a caller bug rather than a device condition.

use crate::error::{OctError, Result};
use crate::marshal::BufferMarshal;
use crate::pattern::ScanPatternBuilder;
use crate::registry::{HandleScope, ResourceRegistry};
use crate::sdk::SpectralSdk;
use crate::session::DeviceSession;
use crate::types::{
    AcquisitionMode, AcquisitionOrder, ApodizationType, CameraPreset, PresetCategory,
    ProbeParameter, ProcessingParameter,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

fn default_preset() -> CameraPreset {
    // High-speed slot; the capture should be scanner-limited, not
    // camera-limited.
    CameraPreset::Preset1
}

/// Geometry and averaging for one volume acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Probe descriptor file understood by the native engine.
    pub probe_file: PathBuf,
    /// A-scans per B-scan (fast axis sample count).
    pub a_scans_per_b_scan: i32,
    /// B-scans per volume (slow axis sample count).
    pub b_scans_per_volume: i32,
    /// Fast axis extent in millimetres.
    pub b_scan_length_mm: f64,
    /// Slow axis extent in millimetres.
    pub volume_width_mm: f64,
    /// Averaging factor applied to probe oversampling *and* processing
    /// A-scan averaging.
    pub averaging: i32,
    /// Speed/sensitivity preset slot.
    #[serde(default = "default_preset")]
    pub preset: CameraPreset,
}

impl AcquisitionConfig {
    fn validate(&self) -> Result<()> {
        if self.a_scans_per_b_scan <= 0
            || self.b_scans_per_volume <= 0
            || self.b_scan_length_mm <= 0.0
            || self.volume_width_mm <= 0.0
        {
            return Err(OctError::InvalidPattern(format!(
                "acquisition geometry must be positive, got {} x {} over {} mm x {} mm",
                self.a_scans_per_b_scan,
                self.b_scans_per_volume,
                self.b_scan_length_mm,
                self.volume_width_mm
            )));
        }
        if self.averaging <= 0 {
            return Err(OctError::InvalidPattern(format!(
                "averaging must be positive, got {}",
                self.averaging
            )));
        }
        Ok(())
    }
}

/// Outcome of one pipeline run. `surface == None` is the failure
/// discriminator; the numeric fields then carry `-1` sentinels.
#[derive(Debug)]
pub struct AcquisitionResult {
    /// Extracted 2-D surface height map, or `None` on failure.
    pub surface: Option<Array2<f32>>,
    /// Measured wall-clock acquisition time in seconds.
    pub actual_time_s: f64,
    /// Engine-predicted acquisition time in seconds.
    pub expected_time_s: f64,
    /// B-scans the engine dropped during the capture.
    pub lost_frames: i32,
}

impl AcquisitionResult {
    /// Whether the acquisition produced a surface.
    pub fn succeeded(&self) -> bool {
        self.surface.is_some()
    }

    fn failed() -> Self {
        Self {
            surface: None,
            actual_time_s: -1.0,
            expected_time_s: -1.0,
            lost_frames: -1,
        }
    }
}

/// Run one scoped volume acquisition against the given registry's engine.
///
/// Returns `Ok` with a sentinel result for expected device failures; every
/// handle created during the run is released before this function returns,
/// success or not.
pub fn run_volume_acquisition(
    registry: &Arc<ResourceRegistry>,
    config: &AcquisitionConfig,
) -> Result<AcquisitionResult> {
    // Malformed configuration is a caller bug; it propagates.
    config.validate()?;

    let span = tracing::info_span!(
        "volume_acquisition",
        a_scans = config.a_scans_per_b_scan,
        b_scans = config.b_scans_per_volume,
        averaging = config.averaging,
    );
    let _guard = span.enter();

    match acquire_volume(registry, config) {
        Ok(result) => Ok(result),
        Err(err) if err.is_recoverable() => {
            tracing::error!(%err, "volume acquisition failed, returning sentinel result");
            Ok(AcquisitionResult::failed())
        }
        Err(err) => Err(err),
    }
}

/// Async wrapper for callers that must stay responsive: the blocking native
/// calls run on a dedicated blocking task.
pub async fn run_volume_acquisition_async(
    registry: Arc<ResourceRegistry>,
    config: AcquisitionConfig,
) -> anyhow::Result<AcquisitionResult> {
    let result =
        tokio::task::spawn_blocking(move || run_volume_acquisition(&registry, &config)).await??;
    Ok(result)
}

fn acquire_volume(
    registry: &Arc<ResourceRegistry>,
    config: &AcquisitionConfig,
) -> Result<AcquisitionResult> {
    // Step 1: session, probe, processing, preset, consistent averaging.
    // Dropping the session closes it, so device/probe/processing are
    // released on every path below.
    let session = DeviceSession::open(registry.clone())?;
    session.attach_probe(&config.probe_file)?;
    session.attach_processing()?;
    session.apply_preset(PresetCategory::SpeedSensitivity, config.preset)?;
    session.set_probe_parameter(ProbeParameter::Oversampling, config.averaging)?;
    session.set_processing_parameter(ProcessingParameter::AScanAveraging, config.averaging)?;

    // Data buffers and the pattern live in a scope released in reverse
    // creation order ahead of the session teardown.
    let mut scope = HandleScope::new(registry.clone());
    let sdk = registry.sdk().clone();
    let raw = scope.track(registry.register(sdk.create_raw_data()?));
    let volume = scope.track(registry.register(sdk.create_data()?));
    let surface = scope.track(registry.register(sdk.create_data()?));

    // Step 2: volume pattern from the configured geometry.
    let builder = ScanPatternBuilder::new(&session);
    let pattern = builder.volume(
        config.b_scan_length_mm,
        config.a_scans_per_b_scan,
        config.volume_width_mm,
        config.b_scans_per_volume,
        ApodizationType::OneForAll,
        AcquisitionOrder::All,
    )?;
    scope.track(pattern.handle());

    // Step 3: timed capture and processing.
    let start = Instant::now();
    session.start_measurement(&pattern, AcquisitionMode::AsyncContinuous)?;
    session.pull_raw_data(raw)?;
    session.bind_processed_output(volume)?;
    session.execute_processing(raw)?;
    session.stop_measurement()?;
    let actual_time_s = start.elapsed().as_secs_f64();

    // Step 4: acquisition quality metadata.
    let marshal = BufferMarshal::new(registry.clone());
    let lost_frames = marshal.raw_lost_frames(raw)?;
    let expected_time_s = session.expected_acquisition_time_s(&pattern)?;

    // Step 5: surface extraction, marshalled out before handles go away.
    registry.assert_live(volume)?;
    registry.assert_live(surface)?;
    sdk.determine_surface(volume, surface)?;
    let surface_map = marshal.read_surface(surface)?;

    tracing::info!(
        actual_time_s,
        expected_time_s,
        lost_frames,
        surface_shape = ?surface_map.dim(),
        "volume acquisition complete"
    );

    // Step 6: explicit, ordered teardown (the guards would do the same on
    // the error paths above).
    drop(scope);
    session.close()?;

    Ok(AcquisitionResult {
        surface: Some(surface_map),
        actual_time_s,
        expected_time_s,
        lost_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;
    use std::time::Duration;

    fn config() -> AcquisitionConfig {
        AcquisitionConfig {
            probe_file: PathBuf::from("Probe_Standard_OCTG_LSM04.ini"),
            a_scans_per_b_scan: 32,
            b_scans_per_volume: 8,
            b_scan_length_mm: 10.0,
            volume_width_mm: 10.0,
            averaging: 2,
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
    fn malformed_config_propagates_as_hard_failure() {
        let (_sdk, registry) = rig();
        let mut bad = config();
        bad.averaging = 0;
        assert!(run_volume_acquisition(&registry, &bad).is_err());
        let mut bad = config();
        bad.a_scans_per_b_scan = -5;
        assert!(run_volume_acquisition(&registry, &bad).is_err());
    }

    #[test]
    fn successful_run_leaves_no_live_handles() {
        let (_sdk, registry) = rig();
        let before = registry.live_count();
        let result = run_volume_acquisition(&registry, &config()).unwrap();
        assert!(result.succeeded());
        assert_eq!(registry.live_count(), before);
    }

    #[test]
    fn averaging_is_applied_to_both_layers() {
        // Expected time scales with oversampling, so a consistent averaging
        // factor shows up in the engine's own estimate.
        let (_sdk, registry) = rig();
        let mut cfg = config();
        cfg.averaging = 1;
        let t1 = run_volume_acquisition(&registry, &cfg).unwrap().expected_time_s;
        cfg.averaging = 3;
        let t3 = run_volume_acquisition(&registry, &cfg).unwrap().expected_time_s;
        assert!((t3 / t1 - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn async_wrapper_runs_off_thread() {
        let (_sdk, registry) = rig();
        let result = run_volume_acquisition_async(registry.clone(), config())
            .await
            .unwrap();
        assert!(result.succeeded());
        assert_eq!(registry.live_count(), 0);
    }
}
