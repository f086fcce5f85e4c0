//! Scan pattern construction and geometry readback.
//!
//! A [`ScanPatternBuilder`] borrows an open [`DeviceSession`] and builds
//! pattern handles from its attached probe. Builders hold no mutable state of
//! their own beyond validation; every output is owned by the caller and must
//! be released through the registry when no longer needed. A pattern carries
//! a back-reference to the probe it was built from, which the session checks
//! at `start_measurement` so a pattern can never outlive its probe unnoticed.
//!
//! Free-form patterns take an interleaved X,Y position array whose length
//! must equal `2 * size_x * size_y`. A mismatch is a hard
//! [`InvalidPattern`](crate::error::OctError::InvalidPattern) failure and no
//! native resource is created; the engine would otherwise accept a null
//! pattern handle downstream and scan garbage.

use crate::error::{OctError, Result};
use crate::marshal::validate_positions;
use crate::sdk::SpectralSdk;
use crate::session::DeviceSession;
use crate::types::{
    AcquisitionOrder, ApodizationType, Handle, ResourceKind, ScanPatternProperty,
};

/// A caller-owned scan pattern handle plus the probe it was built from.
#[derive(Debug, Clone, Copy)]
pub struct ScanPattern {
    handle: Handle,
    probe: Handle,
}

impl ScanPattern {
    /// The native pattern handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The probe this pattern was built from.
    pub fn probe(&self) -> Handle {
        self.probe
    }
}

/// Builds scan patterns from a session's attached probe.
pub struct ScanPatternBuilder<'a> {
    session: &'a DeviceSession,
}

impl<'a> ScanPatternBuilder<'a> {
    /// Create a builder over the given session.
    pub fn new(session: &'a DeviceSession) -> Self {
        Self { session }
    }

    fn probe(&self) -> Result<Handle> {
        self.session.probe().ok_or(OctError::InvalidSessionState {
            state: "opened",
            operation: "build scan pattern (no probe attached)",
        })
    }

    fn adopt(&self, handle: Handle, probe: Handle) -> ScanPattern {
        debug_assert_eq!(handle.kind(), ResourceKind::ScanPattern);
        self.session.registry().register(handle);
        ScanPattern { handle, probe }
    }

    /// Stationary-beam pattern: `scan_count` acquisitions of
    /// `samples_per_scan` A-scans each, without scanner movement.
    pub fn point(&self, scan_count: i32, samples_per_scan: i32) -> Result<ScanPattern> {
        if scan_count <= 0 || samples_per_scan <= 0 {
            return Err(OctError::InvalidPattern(format!(
                "point pattern needs positive counts, got {scan_count} x {samples_per_scan}"
            )));
        }
        let probe = self.probe()?;
        let handle = self
            .session
            .registry()
            .sdk()
            .create_no_scan_pattern(probe, scan_count, samples_per_scan)?;
        Ok(self.adopt(handle, probe))
    }

    /// Single B-scan across `range_mm` millimetres of `a_scan_count` A-scans.
    pub fn b_scan(&self, range_mm: f64, a_scan_count: i32, apodize: bool) -> Result<ScanPattern> {
        if a_scan_count <= 0 || range_mm <= 0.0 {
            return Err(OctError::InvalidPattern(format!(
                "B-scan needs a positive range and A-scan count, got {range_mm} mm x {a_scan_count}"
            )));
        }
        let probe = self.probe()?;
        let handle = self
            .session
            .registry()
            .sdk()
            .create_b_scan_pattern(probe, range_mm, a_scan_count, apodize)?;
        Ok(self.adopt(handle, probe))
    }

    /// Rectangular volume raster of `size_x` A-scans per B-scan and `size_y`
    /// B-scans.
    pub fn volume(
        &self,
        range_x_mm: f64,
        size_x: i32,
        range_y_mm: f64,
        size_y: i32,
        apodization: ApodizationType,
        order: AcquisitionOrder,
    ) -> Result<ScanPattern> {
        if size_x <= 0 || size_y <= 0 || range_x_mm <= 0.0 || range_y_mm <= 0.0 {
            return Err(OctError::InvalidPattern(format!(
                "volume needs positive extents, got {range_x_mm} mm x {size_x}, {range_y_mm} mm x {size_y}"
            )));
        }
        let probe = self.probe()?;
        let handle = self.session.registry().sdk().create_volume_pattern(
            probe, range_x_mm, size_x, range_y_mm, size_y, apodization, order,
        )?;
        Ok(self.adopt(handle, probe))
    }

    /// Free-form pattern from interleaved X,Y scanner positions.
    ///
    /// Enforces `positions.len() == 2 * size_x * size_y` before any native
    /// call; on a mismatch nothing is created.
    pub fn freeform(
        &self,
        positions: &[f32],
        size_x: usize,
        size_y: usize,
        apodize: bool,
    ) -> Result<ScanPattern> {
        validate_positions(positions, size_x, size_y)?;
        let probe = self.probe()?;
        let handle = self.session.registry().sdk().create_freeform_pattern(
            probe,
            positions,
            size_x as i32,
            size_y as i32,
            apodize,
        )?;
        Ok(self.adopt(handle, probe))
    }

    /// Rotate a pattern in-plane by `radians`, using the engine's own
    /// transform so device calibration is preserved.
    pub fn rotate(&self, pattern: &ScanPattern, radians: f64) -> Result<()> {
        self.session.registry().assert_live(pattern.handle())?;
        self.session
            .registry()
            .sdk()
            .rotate_scan_pattern(pattern.handle(), radians)
    }

    /// Read back the resolved scanner lookup-table coordinates, for
    /// diagnostics and export.
    pub fn lut(&self, pattern: &ScanPattern) -> Result<(Vec<f64>, Vec<f64>)> {
        let registry = self.session.registry();
        registry.assert_live(pattern.handle())?;
        let sdk = registry.sdk();
        let size = sdk.scan_pattern_property(pattern.handle(), ScanPatternProperty::Size)?;
        let size = usize::try_from(size).unwrap_or(0);
        let mut xs = vec![0.0f64; size];
        let mut ys = vec![0.0f64; size];
        sdk.scan_pattern_lut(pattern.handle(), &mut xs, &mut ys)?;
        Ok((xs, ys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistry;
    use crate::sdk::mock::MockSdk;
    use crate::types::{CameraPreset, PresetCategory};
    use std::path::Path;
    use std::sync::Arc;

    fn session() -> (Arc<MockSdk>, Arc<ResourceRegistry>, DeviceSession) {
        let sdk = Arc::new(MockSdk::new());
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        let session = DeviceSession::open(registry.clone()).unwrap();
        session.attach_probe(Path::new("probe.ini")).unwrap();
        session.attach_processing().unwrap();
        session
            .apply_preset(PresetCategory::SpeedSensitivity, CameraPreset::Default)
            .unwrap();
        (sdk, registry, session)
    }

    #[test]
    fn freeform_length_invariant() {
        let (_sdk, registry, session) = session();
        let builder = ScanPatternBuilder::new(&session);
        let live_before = registry.live_count();

        // 3 x 2 points need exactly 12 interleaved values.
        let good = vec![0.0f32; 12];
        let pattern = builder.freeform(&good, 3, 2, false).unwrap();
        assert_eq!(registry.live_count(), live_before + 1);
        registry.release(pattern.handle()).unwrap();

        let bad = vec![0.0f32; 11];
        let err = builder.freeform(&bad, 3, 2, false).unwrap_err();
        assert!(matches!(err, OctError::InvalidPattern(_)));
        // Failure creates no native resource.
        assert_eq!(registry.live_count(), live_before);
    }

    #[test]
    fn builders_reject_degenerate_geometry() {
        let (_sdk, _registry, session) = session();
        let builder = ScanPatternBuilder::new(&session);
        assert!(builder.point(0, 128).is_err());
        assert!(builder.b_scan(-1.0, 128, true).is_err());
        assert!(builder
            .volume(
                10.0,
                0,
                10.0,
                25,
                ApodizationType::OneForAll,
                AcquisitionOrder::All
            )
            .is_err());
    }

    #[test]
    fn volume_pattern_reports_geometry() {
        let (sdk, registry, session) = session();
        let builder = ScanPatternBuilder::new(&session);
        let pattern = builder
            .volume(
                10.0,
                128,
                10.0,
                25,
                ApodizationType::OneForAll,
                AcquisitionOrder::All,
            )
            .unwrap();
        assert_eq!(
            sdk.scan_pattern_property(pattern.handle(), ScanPatternProperty::SizeX)
                .unwrap(),
            128
        );
        assert_eq!(
            sdk.scan_pattern_property(pattern.handle(), ScanPatternProperty::SizeY)
                .unwrap(),
            25
        );
        registry.release(pattern.handle()).unwrap();
    }

    #[test]
    fn rotation_by_zero_is_identity() {
        let (_sdk, registry, session) = session();
        let builder = ScanPatternBuilder::new(&session);
        let pattern = builder.b_scan(4.0, 16, true).unwrap();

        let (xs0, ys0) = builder.lut(&pattern).unwrap();
        builder.rotate(&pattern, 0.0).unwrap();
        let (xs1, ys1) = builder.lut(&pattern).unwrap();

        for (a, b) in xs0.iter().zip(&xs1) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in ys0.iter().zip(&ys1) {
            assert!((a - b).abs() < 1e-12);
        }
        registry.release(pattern.handle()).unwrap();
    }

    #[test]
    fn rotation_round_trip_returns_to_origin() {
        let (_sdk, registry, session) = session();
        let builder = ScanPatternBuilder::new(&session);
        let pattern = builder.b_scan(4.0, 16, true).unwrap();
        let theta = 0.7;

        let (xs0, ys0) = builder.lut(&pattern).unwrap();
        builder.rotate(&pattern, theta).unwrap();
        builder.rotate(&pattern, -theta).unwrap();
        let (xs1, ys1) = builder.lut(&pattern).unwrap();

        for (a, b) in xs0.iter().zip(&xs1) {
            assert!((a - b).abs() < 1e-9);
        }
        for (a, b) in ys0.iter().zip(&ys1) {
            assert!((a - b).abs() < 1e-9);
        }
        registry.release(pattern.handle()).unwrap();
    }

    #[test]
    fn rotate_after_release_fails_loudly() {
        let (_sdk, registry, session) = session();
        let builder = ScanPatternBuilder::new(&session);
        let pattern = builder.b_scan(4.0, 16, true).unwrap();
        registry.release(pattern.handle()).unwrap();
        assert!(matches!(
            builder.rotate(&pattern, 0.1),
            Err(OctError::UseAfterRelease(_))
        ));
    }
}
