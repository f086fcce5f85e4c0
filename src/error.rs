//! Custom error types for the binding layer.
//!
//! This module defines the primary error type, [`OctError`], for the crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way
//! to handle the failure modes of the native engine and of the safe layer on
//! top of it.
//!
//! Errors fall into three broad categories:
//!
//! 1. **Device conditions** — `DeviceInit`, `HandleCreation`,
//!    `MeasurementStart`, `MeasurementStopped`, `NativeCall`. Expected at
//!    runtime; the acquisition pipeline recovers from these by cleaning up
//!    and returning a sentinel result.
//! 2. **Caller data errors** — `ShapeMismatch`, `InvalidPattern`. Recoverable
//!    by the caller (resize the destination, fix the position array) and
//!    never reach the native copy path.
//! 3. **Programming errors** — `UseAfterRelease`, `DoubleRelease`,
//!    `SessionClosed`. These indicate a caller bug and are propagated as hard
//!    failures rather than converted into sentinel results.

use crate::types::{ElementKind, Handle, ResourceKind, Shape3};
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, OctError>;

/// Primary error type for the OCT binding layer.
#[derive(Error, Debug)]
pub enum OctError {
    /// The native device open call returned a null reference (device not
    /// found or driver not loaded). Fatal to the session, not the process.
    #[error("device initialization failed: {0}")]
    DeviceInit(String),

    /// A native create call returned a null handle.
    #[error("failed to create native {kind} resource")]
    HandleCreation {
        /// Kind of the resource whose creation failed.
        kind: ResourceKind,
    },

    /// A handle was used after it was released. Programming error.
    #[error("handle {0} used after release")]
    UseAfterRelease(Handle),

    /// A handle was released twice. Programming error; the second release
    /// does not reach the native destroy path.
    #[error("handle {0} released more than once")]
    DoubleRelease(Handle),

    /// A caller-provided buffer does not match the native buffer's shape or
    /// element type. Checked before any native copy, because the native copy
    /// is length-unchecked.
    #[error(
        "destination shape {dst_shape:?} ({dst_kind}) does not match \
         source shape {src_shape:?} ({src_kind})"
    )]
    ShapeMismatch {
        /// Shape reported by the native side.
        src_shape: Shape3,
        /// Element kind of the native buffer.
        src_kind: ElementKind,
        /// Shape of the caller-provided destination.
        dst_shape: Shape3,
        /// Element kind of the caller-provided destination.
        dst_kind: ElementKind,
    },

    /// A caller-provided buffer is not contiguous row-major storage.
    #[error("destination buffer must be contiguous row-major storage")]
    NonContiguousBuffer,

    /// Scan pattern parameters are inconsistent; no native resource was
    /// created.
    #[error("invalid scan pattern: {0}")]
    InvalidPattern(String),

    /// Measurement could not be started in the current session state, or the
    /// pattern belongs to a different probe.
    #[error("cannot start measurement: {0}")]
    MeasurementStart(String),

    /// A blocking data pull observed a concurrent `stop_measurement`.
    #[error("measurement stopped while waiting for data")]
    MeasurementStopped,

    /// The session was closed; no further operations are possible.
    #[error("device session is closed")]
    SessionClosed,

    /// An operation was attempted in a session state that does not allow it.
    #[error("operation not allowed in session state {state}: {operation}")]
    InvalidSessionState {
        /// State the session was in.
        state: &'static str,
        /// Operation that was rejected.
        operation: &'static str,
    },

    /// Any unexpected native failure code not covered above.
    #[error("native call '{call}' failed with status {code}")]
    NativeCall {
        /// Name of the native entry point.
        call: &'static str,
        /// Status code it returned.
        code: i32,
    },

    /// Export sink I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV sink failure while serializing an array or metadata.
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),
}

impl OctError {
    /// Whether this error is an expected device/measurement condition the
    /// acquisition pipeline converts into a sentinel result, as opposed to a
    /// programming error that should propagate.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            OctError::UseAfterRelease(_) | OctError::DoubleRelease(_) | OctError::SessionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Handle, ResourceKind};

    #[test]
    fn recoverability_split() {
        let dev = OctError::DeviceInit("no device".into());
        assert!(dev.is_recoverable());

        let handle = Handle::new(ResourceKind::Probe, 3);
        assert!(!OctError::UseAfterRelease(handle).is_recoverable());
        assert!(!OctError::DoubleRelease(handle).is_recoverable());
        assert!(!OctError::SessionClosed.is_recoverable());
    }

    #[test]
    fn messages_name_the_handle() {
        let handle = Handle::new(ResourceKind::RawData, 12);
        let msg = OctError::UseAfterRelease(handle).to_string();
        assert!(msg.contains("raw_data#12"));
    }
}
