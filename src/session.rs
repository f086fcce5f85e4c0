//! Device session lifecycle and measurement control.
//!
//! A [`DeviceSession`] owns the device handle plus its dependent probe and
//! processing handles and walks the state machine
//! `Opened → Configured → Measuring → Configured → … → Closed`. The native
//! engine does not support concurrent measurement sessions on one device, so
//! all operations serialize on one internal lock; the lock is *not* held
//! across the blocking raw-data pull, which is what makes a cross-thread
//! [`DeviceSession::stop_measurement`] possible as the cancellation
//! primitive.
//!
//! Dropping a session performs a best-effort close so native handles are
//! returned on every exit path, matching the RAII discipline used by the
//! connection managers elsewhere in this codebase.

use crate::error::{OctError, Result};
use crate::pattern::ScanPattern;
use crate::registry::ResourceRegistry;
use crate::sdk::SpectralSdk;
use crate::types::{
    AcquisitionMode, CameraPreset, DeviceProperty, Handle, PresetCategory, ProbeParameter,
    ProcessingFlag, ProcessingParameter, TriggerMode,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Opened,
    Configured,
    Measuring,
    Closed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Opened => "opened",
            SessionState::Configured => "configured",
            SessionState::Measuring => "measuring",
            SessionState::Closed => "closed",
        }
    }
}

struct SessionInner {
    state: SessionState,
    device: Handle,
    probe: Option<Handle>,
    processing: Option<Handle>,
}

/// An open connection to one OCT device.
pub struct DeviceSession {
    registry: Arc<ResourceRegistry>,
    inner: Mutex<SessionInner>,
}

impl DeviceSession {
    /// Open the device. Fails with [`OctError::DeviceInit`] when the native
    /// open call returns a null reference (device not found or driver not
    /// loaded).
    pub fn open(registry: Arc<ResourceRegistry>) -> Result<Self> {
        let device = registry.sdk().init_device()?;
        registry.register(device);
        tracing::info!(%device, "opened OCT device session");
        Ok(Self {
            registry,
            inner: Mutex::new(SessionInner {
                state: SessionState::Opened,
                device,
                probe: None,
                processing: None,
            }),
        })
    }

    fn sdk(&self) -> &Arc<dyn SpectralSdk> {
        self.registry.sdk()
    }

    /// The registry this session releases through.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// The device handle. Valid until [`DeviceSession::close`].
    pub fn device(&self) -> Handle {
        self.inner.lock().unwrap().device
    }

    /// The attached probe handle, if any.
    pub fn probe(&self) -> Option<Handle> {
        self.inner.lock().unwrap().probe
    }

    /// The attached processing handle, if any.
    pub fn processing(&self) -> Option<Handle> {
        self.inner.lock().unwrap().processing
    }

    /// Name of the current state, for logs and error reports.
    pub fn state_name(&self) -> &'static str {
        self.inner.lock().unwrap().state.name()
    }

    fn check_open(inner: &SessionInner, operation: &'static str) -> Result<()> {
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        if inner.state == SessionState::Measuring {
            return Err(OctError::InvalidSessionState {
                state: inner.state.name(),
                operation,
            });
        }
        Ok(())
    }

    // -- attachment ---------------------------------------------------------

    /// Load a probe descriptor and attach the probe to this device.
    pub fn attach_probe(&self, probe_file: &Path) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_open(&inner, "attach_probe")?;
        if inner.probe.is_some() {
            return Err(OctError::InvalidSessionState {
                state: inner.state.name(),
                operation: "attach_probe (probe already attached)",
            });
        }
        let probe = self.sdk().init_probe(inner.device, probe_file)?;
        self.registry.register(probe);
        inner.probe = Some(probe);
        tracing::debug!(%probe, file = %probe_file.display(), "attached probe");
        Ok(probe)
    }

    /// Create a processing context bound to this device.
    pub fn attach_processing(&self) -> Result<Handle> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_open(&inner, "attach_processing")?;
        if inner.processing.is_some() {
            return Err(OctError::InvalidSessionState {
                state: inner.state.name(),
                operation: "attach_processing (processing already attached)",
            });
        }
        let processing = self.sdk().create_processing_for_device(inner.device)?;
        self.registry.register(processing);
        inner.processing = Some(processing);
        tracing::debug!(%processing, "attached processing context");
        Ok(processing)
    }

    // -- configuration (valid only before Measuring) ------------------------

    fn configured_handles(
        inner: &mut SessionInner,
        operation: &'static str,
    ) -> Result<(Handle, Handle, Handle)> {
        Self::check_open(inner, operation)?;
        let probe = inner.probe.ok_or(OctError::InvalidSessionState {
            state: inner.state.name(),
            operation,
        })?;
        let processing = inner.processing.ok_or(OctError::InvalidSessionState {
            state: inner.state.name(),
            operation,
        })?;
        Ok((inner.device, probe, processing))
    }

    /// Apply a camera preset. The native call reconfigures device, probe and
    /// processing together, so both must be attached first.
    pub fn apply_preset(&self, category: PresetCategory, preset: CameraPreset) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (device, probe, processing) = Self::configured_handles(&mut inner, "apply_preset")?;
        self.sdk()
            .set_device_preset(device, category, probe, processing, preset)?;
        inner.state = SessionState::Configured;
        Ok(())
    }

    /// Set an integer probe parameter.
    pub fn set_probe_parameter(&self, param: ProbeParameter, value: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_open(&inner, "set_probe_parameter")?;
        let probe = inner.probe.ok_or(OctError::InvalidSessionState {
            state: inner.state.name(),
            operation: "set_probe_parameter (no probe attached)",
        })?;
        self.sdk().set_probe_parameter(probe, param, value)?;
        inner.state = SessionState::Configured;
        Ok(())
    }

    /// Set an integer processing parameter.
    pub fn set_processing_parameter(&self, param: ProcessingParameter, value: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_open(&inner, "set_processing_parameter")?;
        let processing = inner.processing.ok_or(OctError::InvalidSessionState {
            state: inner.state.name(),
            operation: "set_processing_parameter (no processing attached)",
        })?;
        self.sdk()
            .set_processing_parameter(processing, param, value)?;
        inner.state = SessionState::Configured;
        Ok(())
    }

    /// Toggle a boolean processing stage.
    pub fn set_processing_flag(&self, flag: ProcessingFlag, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_open(&inner, "set_processing_flag")?;
        let processing = inner.processing.ok_or(OctError::InvalidSessionState {
            state: inner.state.name(),
            operation: "set_processing_flag (no processing attached)",
        })?;
        self.sdk().set_processing_flag(processing, flag, enabled)?;
        inner.state = SessionState::Configured;
        Ok(())
    }

    /// Select the scanner trigger source.
    pub fn set_trigger_mode(&self, mode: TriggerMode) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_open(&inner, "set_trigger_mode")?;
        self.sdk().set_trigger_mode(inner.device, mode)?;
        inner.state = SessionState::Configured;
        Ok(())
    }

    // -- processing execution -----------------------------------------------

    fn processing_handle(&self, operation: &'static str) -> Result<Handle> {
        let inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        inner.processing.ok_or(OctError::InvalidSessionState {
            state: inner.state.name(),
            operation,
        })
    }

    /// Bind a processed-data buffer as the processing output. Unlike the
    /// configuration calls this is also valid while `Measuring`, since the
    /// output is rebound per pull in streaming use.
    pub fn bind_processed_output(&self, data: Handle) -> Result<()> {
        let processing = self.processing_handle("bind_processed_output")?;
        self.registry.assert_live(data)?;
        self.sdk().set_processed_data_output(processing, data)
    }

    /// Bind a complex-data buffer as the spectral-domain output.
    pub fn bind_complex_output(&self, complex: Handle) -> Result<()> {
        let processing = self.processing_handle("bind_complex_output")?;
        self.registry.assert_live(complex)?;
        self.sdk().set_complex_data_output(processing, complex)
    }

    /// Run the processing pipeline over a filled raw buffer into the bound
    /// outputs.
    pub fn execute_processing(&self, raw: Handle) -> Result<()> {
        let processing = self.processing_handle("execute_processing")?;
        self.registry.assert_live(raw)?;
        self.sdk().execute_processing(processing, raw)
    }

    // -- device introspection -----------------------------------------------

    /// Read a float-valued device property.
    pub fn device_property_float(&self, prop: DeviceProperty) -> Result<f32> {
        let inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        self.sdk().device_property_float(inner.device, prop)
    }

    /// Calibrated wavelength at a spectrometer pixel, in nanometres.
    pub fn wavelength_at_pixel(&self, pixel: i32) -> Result<f64> {
        let inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        self.sdk().wavelength_at_pixel(inner.device, pixel)
    }

    /// Expected wall-clock time for one acquisition of the pattern.
    pub fn expected_acquisition_time_s(&self, pattern: &ScanPattern) -> Result<f64> {
        let inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        self.registry.assert_live(pattern.handle())?;
        self.sdk()
            .expected_acquisition_time_s(pattern.handle(), inner.device)
    }

    // -- measurement control ------------------------------------------------

    /// Arm the scanner and transition to `Measuring`.
    ///
    /// Fails with [`OctError::MeasurementStart`] when the session is not
    /// `Configured` or the pattern was built from a different probe.
    pub fn start_measurement(&self, pattern: &ScanPattern, mode: AcquisitionMode) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        if inner.state != SessionState::Configured {
            return Err(OctError::MeasurementStart(format!(
                "session is {}, expected configured",
                inner.state.name()
            )));
        }
        if inner.probe != Some(pattern.probe()) {
            return Err(OctError::MeasurementStart(
                "scan pattern belongs to a different probe".into(),
            ));
        }
        self.registry.assert_live(pattern.handle())?;
        self.sdk()
            .start_measurement(inner.device, pattern.handle(), mode)?;
        inner.state = SessionState::Measuring;
        tracing::info!(pattern = %pattern.handle(), ?mode, "measurement started");
        Ok(())
    }

    /// Block until one frame/volume of raw data is available and transfer it
    /// into `raw`.
    ///
    /// Valid only while `Measuring`. The session lock is released for the
    /// duration of the blocking native call so a concurrent
    /// [`DeviceSession::stop_measurement`] can run from another thread; a
    /// pull interrupted by the stop returns
    /// [`OctError::MeasurementStopped`].
    pub fn pull_raw_data(&self, raw: Handle) -> Result<()> {
        let device = {
            let inner = self.inner.lock().unwrap();
            if inner.state == SessionState::Closed {
                return Err(OctError::SessionClosed);
            }
            if inner.state != SessionState::Measuring {
                return Err(OctError::InvalidSessionState {
                    state: inner.state.name(),
                    operation: "pull_raw_data",
                });
            }
            inner.device
        };
        self.registry.assert_live(raw)?;

        self.sdk().get_raw_data(device, raw)?;

        // Cooperative cancellation check: if the native call returned because
        // a concurrent stop tore down the measurement, report the stop rather
        // than handing back a buffer of unspecified content.
        let inner = self.inner.lock().unwrap();
        if inner.state != SessionState::Measuring {
            return Err(OctError::MeasurementStopped);
        }
        Ok(())
    }

    /// Multi-camera variant of [`DeviceSession::pull_raw_data`]: pull from
    /// the camera at `camera_index` on devices with more than one
    /// spectrometer.
    pub fn pull_raw_data_ex(&self, raw: Handle, camera_index: i32) -> Result<()> {
        let device = {
            let inner = self.inner.lock().unwrap();
            if inner.state == SessionState::Closed {
                return Err(OctError::SessionClosed);
            }
            if inner.state != SessionState::Measuring {
                return Err(OctError::InvalidSessionState {
                    state: inner.state.name(),
                    operation: "pull_raw_data_ex",
                });
            }
            inner.device
        };
        self.registry.assert_live(raw)?;

        self.sdk().get_raw_data_ex(device, raw, camera_index)?;

        let inner = self.inner.lock().unwrap();
        if inner.state != SessionState::Measuring {
            return Err(OctError::MeasurementStopped);
        }
        Ok(())
    }

    /// Stop a running measurement and return to `Configured`.
    ///
    /// Idempotent: stopping a session that is not measuring is a no-op. Safe
    /// to call from a different thread than the one blocked in
    /// [`DeviceSession::pull_raw_data`].
    pub fn stop_measurement(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            SessionState::Closed => Err(OctError::SessionClosed),
            SessionState::Measuring => {
                self.sdk().stop_measurement(inner.device)?;
                inner.state = SessionState::Configured;
                tracing::info!("measurement stopped");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn close_inner(&self, inner: &mut SessionInner) -> Result<()> {
        if inner.state == SessionState::Measuring {
            // Best effort; the device is going away either way.
            if let Err(err) = self.sdk().stop_measurement(inner.device) {
                tracing::warn!(%err, "failed to stop measurement during close");
            }
        }
        // Reverse-creation order: processing, then probe, then device.
        if let Some(processing) = inner.processing.take() {
            self.registry.release(processing)?;
        }
        if let Some(probe) = inner.probe.take() {
            self.registry.release(probe)?;
        }
        self.registry.release(inner.device)?;
        inner.state = SessionState::Closed;
        tracing::info!("device session closed");
        Ok(())
    }

    /// Release owned handles (processing, probe, then device) and make the
    /// session unusable. Any further operation fails with
    /// [`OctError::SessionClosed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == SessionState::Closed {
            return Err(OctError::SessionClosed);
        }
        self.close_inner(&mut inner)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SessionState::Closed {
            if let Err(err) = self.close_inner(&mut inner) {
                tracing::warn!(%err, "failed to close device session on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ScanPatternBuilder;
    use crate::sdk::mock::MockSdk;
    use crate::types::ResourceKind;
    use std::path::PathBuf;
    use std::time::Duration;

    fn probe_path() -> PathBuf {
        PathBuf::from("Probe_Standard_OCTG_LSM04.ini")
    }

    fn open_session() -> (Arc<MockSdk>, Arc<ResourceRegistry>, DeviceSession) {
        let sdk = Arc::new(MockSdk::new());
        sdk.set_acquisition_delay(Duration::from_millis(1));
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        let session = DeviceSession::open(registry.clone()).unwrap();
        (sdk, registry, session)
    }

    fn configured_session() -> (Arc<MockSdk>, Arc<ResourceRegistry>, DeviceSession) {
        let (sdk, registry, session) = open_session();
        session.attach_probe(&probe_path()).unwrap();
        session.attach_processing().unwrap();
        session
            .apply_preset(PresetCategory::SpeedSensitivity, CameraPreset::Preset1)
            .unwrap();
        (sdk, registry, session)
    }

    #[test]
    fn open_fails_on_null_device() {
        let sdk = Arc::new(MockSdk::new());
        sdk.set_fail_device_init(true);
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        assert!(matches!(
            DeviceSession::open(registry.clone()),
            Err(OctError::DeviceInit(_))
        ));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn start_requires_configured_state() {
        let (_sdk, _registry, session) = open_session();
        session.attach_probe(&probe_path()).unwrap();
        session.attach_processing().unwrap();
        let pattern = ScanPatternBuilder::new(&session)
            .b_scan(2.0, 64, true)
            .unwrap();
        // No configuration call has happened yet.
        let err = session
            .start_measurement(&pattern, AcquisitionMode::AsyncContinuous)
            .unwrap_err();
        assert!(matches!(err, OctError::MeasurementStart(_)));
    }

    #[test]
    fn configuration_rejected_while_measuring() {
        let (_sdk, _registry, session) = configured_session();
        let pattern = ScanPatternBuilder::new(&session)
            .b_scan(2.0, 64, true)
            .unwrap();
        session
            .start_measurement(&pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();

        let err = session
            .set_probe_parameter(ProbeParameter::Oversampling, 2)
            .unwrap_err();
        assert!(matches!(err, OctError::InvalidSessionState { .. }));
        let err = session
            .set_trigger_mode(TriggerMode::ExternalStart)
            .unwrap_err();
        assert!(matches!(err, OctError::InvalidSessionState { .. }));

        session.stop_measurement().unwrap();
        session
            .set_probe_parameter(ProbeParameter::Oversampling, 2)
            .unwrap();
    }

    #[test]
    fn stop_is_idempotent() {
        let (_sdk, _registry, session) = configured_session();
        session.stop_measurement().unwrap();
        session.stop_measurement().unwrap();
    }

    #[test]
    fn pull_and_stop_round_trip() {
        let (sdk, registry, session) = configured_session();
        let pattern = ScanPatternBuilder::new(&session)
            .b_scan(2.0, 32, true)
            .unwrap();
        let raw = registry.register(sdk.create_raw_data().unwrap());

        session
            .start_measurement(&pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();
        session.pull_raw_data(raw).unwrap();
        session.stop_measurement().unwrap();
        assert_eq!(session.state_name(), "configured");

        registry.release(raw).unwrap();
        registry.release(pattern.handle()).unwrap();
    }

    #[test]
    fn cross_thread_stop_interrupts_pull() {
        let (sdk, registry, session) = configured_session();
        sdk.set_acquisition_delay(Duration::from_secs(30));
        let session = Arc::new(session);
        let pattern = ScanPatternBuilder::new(&session)
            .b_scan(2.0, 32, true)
            .unwrap();
        let raw = registry.register(sdk.create_raw_data().unwrap());

        session
            .start_measurement(&pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();

        let puller = {
            let session = session.clone();
            std::thread::spawn(move || session.pull_raw_data(raw))
        };
        std::thread::sleep(Duration::from_millis(20));
        session.stop_measurement().unwrap();

        assert!(matches!(
            puller.join().unwrap(),
            Err(OctError::MeasurementStopped)
        ));
        registry.release(raw).unwrap();
        registry.release(pattern.handle()).unwrap();
    }

    #[test]
    fn close_releases_in_reverse_order_and_poisons_session() {
        let (sdk, registry, session) = configured_session();
        assert_eq!(registry.live_count(), 3);
        session.close().unwrap();
        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.destroy_count(ResourceKind::Processing), 1);
        assert_eq!(sdk.destroy_count(ResourceKind::Probe), 1);
        assert_eq!(sdk.destroy_count(ResourceKind::Device), 1);

        assert!(matches!(
            session.attach_processing(),
            Err(OctError::SessionClosed)
        ));
        assert!(matches!(session.close(), Err(OctError::SessionClosed)));
    }

    #[test]
    fn drop_closes_the_session() {
        let (sdk, registry, session) = configured_session();
        drop(session);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.destroy_count(ResourceKind::Device), 1);
    }

    #[test]
    fn pattern_from_other_probe_is_rejected() {
        // Two sessions over one engine share the registry, so probe handles
        // stay distinct and the back-reference check can fire.
        let sdk = Arc::new(MockSdk::new());
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        let configure = |session: &DeviceSession| {
            session.attach_probe(&probe_path()).unwrap();
            session.attach_processing().unwrap();
            session
                .apply_preset(PresetCategory::SpeedSensitivity, CameraPreset::Preset1)
                .unwrap();
        };
        let session1 = DeviceSession::open(registry.clone()).unwrap();
        configure(&session1);
        let session2 = DeviceSession::open(registry.clone()).unwrap();
        configure(&session2);

        let foreign = ScanPatternBuilder::new(&session2)
            .b_scan(2.0, 16, false)
            .unwrap();
        let err = session1
            .start_measurement(&foreign, AcquisitionMode::AsyncContinuous)
            .unwrap_err();
        assert!(matches!(err, OctError::MeasurementStart(_)));
    }
}
