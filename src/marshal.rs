//! Checked transfers between native buffers and caller-side arrays.
//!
//! The native bulk-copy entry points are length-unchecked: they write as many
//! elements as the source buffer holds, no matter how large the destination
//! is. Everything in this module therefore queries the authoritative shape
//! from the native side first and refuses the copy unless the caller's array
//! matches exactly — shape, element type (enforced statically by the array's
//! element parameter) and contiguous row-major layout.
//!
//! Caller-side buffers are `ndarray` arrays: `Array3<u16>` for raw spectra,
//! `Array3<f32>` for processed data, `Array3<Complex32>` for complex spectral
//! data, and `Array2<f32>` for extracted surfaces. All native buffers are
//! row-major and tightly packed, so a standard-layout `ndarray` maps onto
//! them without any stride translation.

use crate::error::{OctError, Result};
use crate::registry::ResourceRegistry;
use crate::sdk::SpectralSdk;
use crate::types::{
    DataProperty, Direction, ElementKind, Handle, RawDataProperty, ResourceKind, Shape3,
};
use ndarray::{Array2, Array3};
use num_complex::Complex32;
use std::sync::Arc;

/// Shape- and liveness-checked marshalling over a registry's backend.
pub struct BufferMarshal {
    registry: Arc<ResourceRegistry>,
}

impl BufferMarshal {
    /// Create a marshaller over the given registry.
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self { registry }
    }

    fn sdk(&self) -> &Arc<dyn SpectralSdk> {
        self.registry.sdk()
    }

    // -- shape queries ------------------------------------------------------

    /// Query the shape of a raw buffer from the native side.
    pub fn raw_shape(&self, raw: Handle) -> Result<Shape3> {
        debug_assert_eq!(raw.kind(), ResourceKind::RawData);
        self.registry.assert_live(raw)?;
        let sdk = self.sdk();
        Ok((
            sdk.raw_data_property(raw, RawDataProperty::Size1)? as usize,
            sdk.raw_data_property(raw, RawDataProperty::Size2)? as usize,
            sdk.raw_data_property(raw, RawDataProperty::Size3)? as usize,
        ))
    }

    /// Frames the engine dropped while filling a raw buffer.
    pub fn raw_lost_frames(&self, raw: Handle) -> Result<i32> {
        debug_assert_eq!(raw.kind(), ResourceKind::RawData);
        self.registry.assert_live(raw)?;
        self.sdk().raw_data_property(raw, RawDataProperty::LostFrames)
    }

    /// Query dimensionality and shape of a processed buffer.
    pub fn data_shape(&self, data: Handle) -> Result<(usize, Shape3)> {
        debug_assert_eq!(data.kind(), ResourceKind::Data);
        self.registry.assert_live(data)?;
        let sdk = self.sdk();
        let dims = sdk.data_property(data, DataProperty::Dimensions)? as usize;
        let shape = (
            sdk.data_property(data, DataProperty::Size1)? as usize,
            sdk.data_property(data, DataProperty::Size2)? as usize,
            sdk.data_property(data, DataProperty::Size3)? as usize,
        );
        Ok((dims, shape))
    }

    /// Query the shape of a complex buffer.
    pub fn complex_shape(&self, complex: Handle) -> Result<Shape3> {
        debug_assert_eq!(complex.kind(), ResourceKind::ComplexData);
        self.registry.assert_live(complex)?;
        let sdk = self.sdk();
        Ok((
            sdk.complex_data_property(complex, DataProperty::Size1)? as usize,
            sdk.complex_data_property(complex, DataProperty::Size2)? as usize,
            sdk.complex_data_property(complex, DataProperty::Size3)? as usize,
        ))
    }

    // -- checked copies into caller arrays ----------------------------------

    /// Copy raw u16 samples into a caller array of exactly matching shape.
    pub fn copy_raw_into(&self, raw: Handle, dst: &mut Array3<u16>) -> Result<()> {
        let src_shape = self.raw_shape(raw)?;
        let slice = checked_slice(dst, src_shape, ElementKind::U16)?;
        self.sdk().copy_raw_data_content(raw, slice)
    }

    /// Copy processed f32 samples into a caller array of exactly matching
    /// shape.
    pub fn copy_data_into(&self, data: Handle, dst: &mut Array3<f32>) -> Result<()> {
        let (_, src_shape) = self.data_shape(data)?;
        let slice = checked_slice(dst, src_shape, ElementKind::F32)?;
        self.sdk().copy_data_content(data, slice)
    }

    /// Copy complex samples into a caller array of exactly matching shape.
    pub fn copy_complex_into(&self, complex: Handle, dst: &mut Array3<Complex32>) -> Result<()> {
        let src_shape = self.complex_shape(complex)?;
        let slice = checked_slice(dst, src_shape, ElementKind::Complex32)?;
        self.sdk().copy_complex_data_content(complex, slice)
    }

    /// Concatenate one raw buffer onto another along the given axis, e.g.
    /// to stack successively pulled volumes along the slow axis.
    pub fn append_raw(&self, dst: Handle, src: Handle, direction: Direction) -> Result<()> {
        debug_assert_eq!(dst.kind(), ResourceKind::RawData);
        debug_assert_eq!(src.kind(), ResourceKind::RawData);
        self.registry.assert_live(dst)?;
        self.registry.assert_live(src)?;
        self.sdk().append_raw_data(dst, src, direction)
    }

    // -- allocating readers -------------------------------------------------

    /// Allocate a correctly shaped array and copy a raw buffer into it.
    pub fn read_raw(&self, raw: Handle) -> Result<Array3<u16>> {
        let shape = self.raw_shape(raw)?;
        let mut out = Array3::zeros(shape);
        self.copy_raw_into(raw, &mut out)?;
        Ok(out)
    }

    /// Allocate a correctly shaped array and copy a processed buffer into it.
    pub fn read_data(&self, data: Handle) -> Result<Array3<f32>> {
        let (_, shape) = self.data_shape(data)?;
        let mut out = Array3::zeros(shape);
        self.copy_data_into(data, &mut out)?;
        Ok(out)
    }

    /// Allocate a correctly shaped array and copy a complex buffer into it.
    pub fn read_complex(&self, complex: Handle) -> Result<Array3<Complex32>> {
        let shape = self.complex_shape(complex)?;
        let mut out = Array3::from_elem(shape, Complex32::new(0.0, 0.0));
        self.copy_complex_into(complex, &mut out)?;
        Ok(out)
    }

    /// Read a 2-D surface buffer (a height map) into an `Array2<f32>`.
    ///
    /// The native side stores 2-D data with `Size3 == 1`; anything else is a
    /// shape mismatch against the expected two-dimensional destination.
    pub fn read_surface(&self, surface: Handle) -> Result<Array2<f32>> {
        let (dims, shape) = self.data_shape(surface)?;
        if dims != 2 || shape.2 != 1 {
            return Err(OctError::ShapeMismatch {
                src_shape: shape,
                src_kind: ElementKind::F32,
                dst_shape: (shape.0, shape.1, 1),
                dst_kind: ElementKind::F32,
            });
        }
        let mut volume = Array3::zeros(shape);
        {
            let slice = checked_slice(&mut volume, shape, ElementKind::F32)?;
            self.sdk().copy_data_content(surface, slice)?;
        }
        let (rows, cols, _) = shape;
        let flat = volume.into_raw_vec_and_offset().0;
        Array2::from_shape_vec((rows, cols), flat).map_err(|_| OctError::NonContiguousBuffer)
    }
}

/// Validate an interleaved X,Y scanner position array for a free-form
/// pattern of `size_x * size_y` points.
///
/// The array must hold exactly `2 * size_x * size_y` values (so it is always
/// even-length). A mismatch fails with `InvalidPattern` and nothing is
/// created on the native side.
pub fn validate_positions(positions: &[f32], size_x: usize, size_y: usize) -> Result<()> {
    let expected = 2 * size_x * size_y;
    if size_x == 0 || size_y == 0 {
        return Err(OctError::InvalidPattern(format!(
            "pattern extent must be non-zero, got {size_x} x {size_y}"
        )));
    }
    if positions.len() != expected {
        return Err(OctError::InvalidPattern(format!(
            "position array has {} elements, expected {} (2 * {} * {})",
            positions.len(),
            expected,
            size_x,
            size_y
        )));
    }
    Ok(())
}

/// Verify shape equality and standard layout, returning the destination's
/// contiguous storage. Runs before any native copy.
fn checked_slice<T>(
    dst: &mut Array3<T>,
    src_shape: Shape3,
    kind: ElementKind,
) -> Result<&mut [T]> {
    let dst_shape = dst.dim();
    if dst_shape != src_shape {
        return Err(OctError::ShapeMismatch {
            src_shape,
            src_kind: kind,
            dst_shape,
            dst_kind: kind,
        });
    }
    dst.as_slice_mut().ok_or(OctError::NonContiguousBuffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::{MockSdk, SPECTRUM_SAMPLES};
    use crate::types::{AcquisitionMode, AcquisitionOrder, ApodizationType};
    use std::path::Path;
    use std::time::Duration;

    struct Rig {
        sdk: Arc<MockSdk>,
        registry: Arc<ResourceRegistry>,
        marshal: BufferMarshal,
        raw: Handle,
    }

    fn filled_raw_rig() -> Rig {
        let sdk = Arc::new(MockSdk::new());
        sdk.set_acquisition_delay(Duration::from_millis(1));
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        let marshal = BufferMarshal::new(registry.clone());

        let dev = registry.register(sdk.init_device().unwrap());
        let probe = registry.register(sdk.init_probe(dev, Path::new("probe.ini")).unwrap());
        let pattern = registry.register(
            sdk.create_volume_pattern(
                probe,
                4.0,
                8,
                4.0,
                2,
                ApodizationType::OneForAll,
                AcquisitionOrder::All,
            )
            .unwrap(),
        );
        let raw = registry.register(sdk.create_raw_data().unwrap());
        sdk.start_measurement(dev, pattern, AcquisitionMode::AsyncContinuous)
            .unwrap();
        sdk.get_raw_data(dev, raw).unwrap();
        sdk.stop_measurement(dev).unwrap();

        Rig {
            sdk,
            registry,
            marshal,
            raw,
        }
    }

    #[test]
    fn queried_shape_matches_pattern_geometry() {
        let rig = filled_raw_rig();
        assert_eq!(rig.marshal.raw_shape(rig.raw).unwrap(), (SPECTRUM_SAMPLES, 8, 2));
        assert_eq!(rig.marshal.raw_lost_frames(rig.raw).unwrap(), 0);
    }

    #[test]
    fn mismatched_destination_never_reaches_native_copy() {
        let rig = filled_raw_rig();
        let mut wrong = Array3::<u16>::zeros((SPECTRUM_SAMPLES, 4, 2));
        let err = rig.marshal.copy_raw_into(rig.raw, &mut wrong).unwrap_err();
        assert!(matches!(err, OctError::ShapeMismatch { .. }));
        // The destination stays untouched.
        assert!(wrong.iter().all(|&v| v == 0));
    }

    #[test]
    fn round_trip_preserves_shape() {
        let rig = filled_raw_rig();
        let volume = rig.marshal.read_raw(rig.raw).unwrap();
        assert_eq!(volume.dim(), rig.marshal.raw_shape(rig.raw).unwrap());
        // Shape query is stable across the copy.
        assert_eq!(rig.marshal.raw_shape(rig.raw).unwrap(), (SPECTRUM_SAMPLES, 8, 2));
    }

    #[test]
    fn copy_after_release_is_use_after_release() {
        let rig = filled_raw_rig();
        rig.registry.release(rig.raw).unwrap();
        let mut dst = Array3::<u16>::zeros((SPECTRUM_SAMPLES, 8, 2));
        assert!(matches!(
            rig.marshal.copy_raw_into(rig.raw, &mut dst),
            Err(OctError::UseAfterRelease(_))
        ));
    }

    #[test]
    fn non_contiguous_destination_is_rejected() {
        let rig = filled_raw_rig();
        let base = Array3::<u16>::zeros((SPECTRUM_SAMPLES, 8, 2));
        // Reversing an axis breaks standard layout without changing shape.
        let mut flipped = base;
        flipped.invert_axis(ndarray::Axis(1));
        assert_eq!(flipped.dim(), (SPECTRUM_SAMPLES, 8, 2));
        assert!(flipped.as_slice_mut().is_none());
        let err = rig.marshal.copy_raw_into(rig.raw, &mut flipped).unwrap_err();
        assert!(matches!(err, OctError::NonContiguousBuffer));
    }

    #[test]
    fn append_stacks_volumes_along_slow_axis() {
        let rig = filled_raw_rig();
        let second = rig.registry.register(rig.sdk.create_raw_data().unwrap());
        // An empty destination adopts the source wholesale.
        rig.marshal
            .append_raw(second, rig.raw, Direction::Dim3)
            .unwrap();
        assert_eq!(rig.marshal.raw_shape(second).unwrap(), (SPECTRUM_SAMPLES, 8, 2));
        rig.marshal
            .append_raw(second, rig.raw, Direction::Dim3)
            .unwrap();
        assert_eq!(rig.marshal.raw_shape(second).unwrap(), (SPECTRUM_SAMPLES, 8, 4));

        rig.registry.release(second).unwrap();
        assert!(matches!(
            rig.marshal.append_raw(second, rig.raw, Direction::Dim3),
            Err(OctError::UseAfterRelease(_))
        ));
    }

    #[test]
    fn freeform_position_validation() {
        assert!(validate_positions(&[0.0; 24], 4, 3).is_ok());
        assert!(matches!(
            validate_positions(&[0.0; 23], 4, 3),
            Err(OctError::InvalidPattern(_))
        ));
        assert!(matches!(
            validate_positions(&[], 0, 3),
            Err(OctError::InvalidPattern(_))
        ));
    }
}
