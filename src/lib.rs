//! # OCT Device Binding and Acquisition Pipeline
//!
//! This crate binds an application to a SpectralRadar-based optical-
//! coherence-tomography (OCT) imaging device. The native engine stays a
//! black box behind the [`sdk::SpectralSdk`] trait; everything above it is
//! safe Rust concerned with the two places where mistakes turn into memory
//! corruption or silently wrong science: native resource lifetimes and
//! multi-dimensional buffer transfers across the FFI boundary.
//!
//! ## Crate Structure
//!
//! - **`types`**: typed handles and the integer enums of the vendor ABI,
//!   validated at the boundary.
//! - **`error`**: the [`OctError`](error::OctError) taxonomy splitting
//!   device conditions, caller data errors and programming errors.
//! - **`sdk`**: the native operation set as a trait, with a deterministic
//!   mock engine (default) and the `spectralradar-sys` hardware shim behind
//!   the `spectralradar_hardware` feature.
//! - **`registry`**: live-handle tracking; the single release path that
//!   turns double-free and use-after-release into typed errors.
//! - **`marshal`**: shape-checked transfers between native buffers and
//!   `ndarray` arrays; the native copies are length-unchecked, so nothing
//!   crosses without a verified shape.
//! - **`session`**: the per-device state machine
//!   (`Opened → Configured → Measuring → Closed`) with blocking pulls and
//!   cross-thread stop as the cancellation primitive.
//! - **`pattern`**: scan pattern builders (point, B-scan, volume, free-form),
//!   rotation via the engine transform, and LUT readback.
//! - **`pipeline`**: the orchestrated volume acquisition — capture, process,
//!   surface extraction, and guaranteed handle release on every path.
//! - **`export`**: the engine's serializers plus a CSV sink for surfaces and
//!   acquisition metadata.

pub mod error;
pub mod export;
pub mod marshal;
pub mod pattern;
pub mod pipeline;
pub mod registry;
pub mod sdk;
pub mod session;
pub mod types;

pub use error::{OctError, Result};
pub use export::{DataExporter, OutputBuffer};
pub use marshal::BufferMarshal;
pub use pattern::{ScanPattern, ScanPatternBuilder};
pub use pipeline::{
    run_volume_acquisition, run_volume_acquisition_async, AcquisitionConfig, AcquisitionResult,
};
pub use registry::{HandleScope, ResourceRegistry};
pub use sdk::SpectralSdk;
pub use session::DeviceSession;
pub use types::{AcquisitionMode, Handle, ResourceKind, TriggerMode};
