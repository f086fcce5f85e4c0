//! Live-handle tracking and the single release path for native resources.
//!
//! Every native create is paired with exactly one native destroy, and the
//! [`ResourceRegistry`] is the sole component allowed to emit the destroy
//! call. Components register handles after creation, assert liveness before
//! touching a handle's native reference, and release through the registry so
//! double-free and use-after-release become typed, reportable errors instead
//! of native crashes.
//!
//! The registry's live set is the only process-wide shared mutable state in
//! the crate and sits behind a single mutex, so multiple sessions in one
//! process stay consistent.

use crate::error::{OctError, Result};
use crate::sdk::SpectralSdk;
use crate::types::{Handle, ResourceKind};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RegistryInner {
    live: HashSet<Handle>,
    released: HashSet<Handle>,
}

/// Tracks live handles per kind and enforces create/destroy pairing.
pub struct ResourceRegistry {
    sdk: Arc<dyn SpectralSdk>,
    inner: Mutex<RegistryInner>,
}

impl ResourceRegistry {
    /// Create a registry over the given engine backend.
    pub fn new(sdk: Arc<dyn SpectralSdk>) -> Self {
        Self {
            sdk,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// The engine backend this registry releases through.
    pub fn sdk(&self) -> &Arc<dyn SpectralSdk> {
        &self.sdk
    }

    /// Mark a freshly created handle as live. Called by the component that
    /// issued the native create, immediately after it succeeds.
    pub fn register(&self, handle: Handle) -> Handle {
        let mut inner = self.inner.lock().unwrap();
        let fresh = inner.live.insert(handle);
        debug_assert!(fresh, "handle {handle} registered twice");
        inner.released.remove(&handle);
        tracing::trace!(%handle, "registered native handle");
        handle
    }

    /// Release a handle, issuing the native destroy exactly once.
    ///
    /// Releasing an unknown or already-released handle returns
    /// [`OctError::DoubleRelease`] without reaching the native destroy path;
    /// it is reported, not fatal.
    pub fn release(&self, handle: Handle) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.live.remove(&handle) {
                return Err(OctError::DoubleRelease(handle));
            }
            inner.released.insert(handle);
        }
        tracing::debug!(%handle, "releasing native handle");
        self.sdk.destroy(handle)
    }

    /// Fail with [`OctError::UseAfterRelease`] if the handle is not live.
    /// Every marshalling and control operation calls this before touching a
    /// handle's native reference.
    pub fn assert_live(&self, handle: Handle) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if inner.live.contains(&handle) {
            Ok(())
        } else {
            Err(OctError::UseAfterRelease(handle))
        }
    }

    /// Number of live handles across all kinds.
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    /// Number of live handles of one kind.
    pub fn live_count_of(&self, kind: ResourceKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .live
            .iter()
            .filter(|h| h.kind() == kind)
            .count()
    }
}

/// RAII scope that releases its tracked handles in reverse-creation order
/// when dropped, on every exit path.
///
/// Handles already released through other owners (e.g. a session close) are
/// skipped silently; any other release failure is logged and swallowed, since
/// a cleanup path must not mask the original error.
pub struct HandleScope {
    registry: Arc<ResourceRegistry>,
    handles: Vec<Handle>,
}

impl HandleScope {
    /// Open a scope over the given registry.
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            handles: Vec::new(),
        }
    }

    /// Track a handle for release when the scope closes.
    pub fn track(&mut self, handle: Handle) -> Handle {
        self.handles.push(handle);
        handle
    }
}

impl Drop for HandleScope {
    fn drop(&mut self) {
        for handle in self.handles.drain(..).rev() {
            match self.registry.release(handle) {
                Ok(()) => {}
                Err(OctError::DoubleRelease(_)) => {
                    // Another owner (e.g. session close) got there first.
                }
                Err(err) => {
                    tracing::warn!(%handle, %err, "failed to release handle during scope cleanup");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;

    fn registry() -> (Arc<MockSdk>, Arc<ResourceRegistry>) {
        let sdk = Arc::new(MockSdk::new());
        let registry = Arc::new(ResourceRegistry::new(sdk.clone()));
        (sdk, registry)
    }

    #[test]
    fn release_is_idempotent_with_single_native_destroy() {
        let (sdk, registry) = registry();
        let raw = registry.register(sdk.create_raw_data().unwrap());

        assert_eq!(registry.live_count(), 1);
        registry.release(raw).unwrap();
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 1);

        // Second release reports, does not reach the native destroy again.
        let err = registry.release(raw).unwrap_err();
        assert!(matches!(err, OctError::DoubleRelease(_)));
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 1);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn unknown_handle_release_reports() {
        let (_sdk, registry) = registry();
        let bogus = Handle::new(ResourceKind::Data, 999);
        assert!(matches!(
            registry.release(bogus),
            Err(OctError::DoubleRelease(_))
        ));
    }

    #[test]
    fn assert_live_after_release() {
        let (sdk, registry) = registry();
        let data = registry.register(sdk.create_data().unwrap());
        registry.assert_live(data).unwrap();
        registry.release(data).unwrap();
        assert!(matches!(
            registry.assert_live(data),
            Err(OctError::UseAfterRelease(_))
        ));
    }

    #[test]
    fn live_count_per_kind() {
        let (sdk, registry) = registry();
        let raw = registry.register(sdk.create_raw_data().unwrap());
        let _data = registry.register(sdk.create_data().unwrap());
        assert_eq!(registry.live_count_of(ResourceKind::RawData), 1);
        assert_eq!(registry.live_count_of(ResourceKind::Data), 1);
        assert_eq!(registry.live_count_of(ResourceKind::Device), 0);
        registry.release(raw).unwrap();
        assert_eq!(registry.live_count_of(ResourceKind::RawData), 0);
    }

    #[test]
    fn scope_releases_in_reverse_order_on_drop() {
        let (sdk, registry) = registry();
        {
            let mut scope = HandleScope::new(registry.clone());
            scope.track(registry.register(sdk.create_raw_data().unwrap()));
            scope.track(registry.register(sdk.create_data().unwrap()));
            assert_eq!(registry.live_count(), 2);
        }
        assert_eq!(registry.live_count(), 0);
        assert_eq!(sdk.destroy_count(ResourceKind::RawData), 1);
        assert_eq!(sdk.destroy_count(ResourceKind::Data), 1);
    }

    #[test]
    fn scope_skips_handles_released_elsewhere() {
        let (sdk, registry) = registry();
        let data = registry.register(sdk.create_data().unwrap());
        {
            let mut scope = HandleScope::new(registry.clone());
            scope.track(data);
            registry.release(data).unwrap();
        }
        // Exactly one destroy despite scope cleanup also running.
        assert_eq!(sdk.destroy_count(ResourceKind::Data), 1);
    }
}
