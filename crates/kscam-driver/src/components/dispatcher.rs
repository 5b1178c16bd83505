//! Device Event Dispatcher
//!
//! The SDK accepts one plain function pointer per session plus an opaque
//! context token. [`event_callback`] is that function: it resolves the token
//! in a process-wide registry to the owning session's [`EventTarget`] and
//! routes the event.
//!
//! - Image received: raise the frame-ready signal.
//! - Feature changed: overwrite the catalogued value, re-fetch its
//!   descriptor and mark the host property dirty.
//! - Transport error, bus reset: logged only.
//!
//! Events that name a handle other than the session's own are rejected.
//! The dispatcher never commits features; it runs on the SDK's thread.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use kscam_core::PropertySet;

use crate::components::acquisition::FrameReadySignal;
use crate::components::binding::property_names;
use crate::components::catalog::FeatureCatalog;
use crate::sdk::{CameraEvent, CameraHandle, ContextToken};

static TARGETS: Lazy<Mutex<HashMap<ContextToken, Weak<EventTarget>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// Routing destination of one open session.
pub struct EventTarget {
    handle: CameraHandle,
    catalog: Arc<FeatureCatalog>,
    properties: Arc<PropertySet>,
    frame_ready: Arc<FrameReadySignal>,
    handled: AtomicU64,
    rejected: AtomicU64,
}

impl std::fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTarget")
            .field("handle", &self.handle)
            .field("handled", &self.handled())
            .field("rejected", &self.rejected())
            .finish()
    }
}

impl EventTarget {
    /// Route events of `catalog`'s handle into these components.
    pub fn new(
        catalog: Arc<FeatureCatalog>,
        properties: Arc<PropertySet>,
        frame_ready: Arc<FrameReadySignal>,
    ) -> Self {
        Self {
            handle: catalog.handle(),
            catalog,
            properties,
            frame_ready,
            handled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Handle this target accepts events for.
    pub fn handle(&self) -> CameraHandle {
        self.handle
    }

    /// Events applied so far.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Events rejected for naming a foreign handle.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Route one event.
    pub fn dispatch(&self, handle: CameraHandle, event: &CameraEvent) {
        if handle != self.handle {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                handle,
                session = self.handle,
                ?event,
                "rejected event for foreign camera handle"
            );
            return;
        }
        self.handled.fetch_add(1, Ordering::Relaxed);

        match event {
            CameraEvent::ImageReceived {
                frame_no, remained, ..
            } => {
                tracing::trace!(frame_no, remained, "image received");
                self.frame_ready.set();
            }
            CameraEvent::FeatureChanged {
                feature_id,
                variant,
                ..
            } => {
                tracing::debug!(feature = %feature_id, value = ?variant, "feature changed by device");
                if let Err(e) = self.catalog.refresh(*feature_id, variant.clone()) {
                    tracing::warn!(feature = %feature_id, kind = %e.kind(), error = %e, "feature refresh failed");
                }
                for name in property_names(*feature_id) {
                    self.properties.mark_dirty(name);
                }
            }
            CameraEvent::ExposureEnd { tick } => tracing::trace!(tick, "exposure end"),
            CameraEvent::TriggerReady { tick } => tracing::trace!(tick, "trigger ready"),
            CameraEvent::DeviceCapture { tick } => tracing::trace!(tick, "device capture"),
            CameraEvent::AeStay { tick } => tracing::debug!(tick, "auto exposure settled"),
            CameraEvent::AeRunning { tick } => tracing::debug!(tick, "auto exposure running"),
            CameraEvent::AeDisable { tick } => tracing::debug!(tick, "auto exposure disabled"),
            CameraEvent::TransError {
                tick,
                usb_error,
                driver_error,
                received_size,
                setting_size,
            } => {
                tracing::error!(
                    tick,
                    usb_error,
                    driver_error,
                    received_size,
                    setting_size,
                    "transfer error"
                );
            }
            CameraEvent::BusReset {
                code,
                image_cleared,
            } => {
                tracing::error!(?code, image_cleared, "bus reset");
            }
        }
    }
}

/// Register `target` and return the context token to hand to the SDK.
///
/// The registry holds a weak reference; dropping the target is enough to
/// stop delivery, but [`unregister`] should still be called on close.
pub fn register(target: &Arc<EventTarget>) -> ContextToken {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    TARGETS.lock().insert(token, Arc::downgrade(target));
    tracing::debug!(token, handle = target.handle(), "event target registered");
    token
}

/// Remove a registration. Unknown tokens are ignored.
pub fn unregister(token: ContextToken) {
    if TARGETS.lock().remove(&token).is_some() {
        tracing::debug!(token, "event target unregistered");
    }
}

/// Number of live registrations.
pub fn registered() -> usize {
    TARGETS
        .lock()
        .values()
        .filter(|t| t.strong_count() > 0)
        .count()
}

/// Entry point registered with the SDK for every session.
pub fn event_callback(handle: CameraHandle, event: &CameraEvent, context: ContextToken) {
    // Resolve under the lock, dispatch without it.
    let target = TARGETS.lock().get(&context).and_then(Weak::upgrade);
    match target {
        Some(target) => target.dispatch(handle, event),
        None => tracing::warn!(handle, context, "event for unknown session dropped"),
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;
    use crate::sdk::{FeatureId, KsCamSdk, Variant};
    use serial_test::serial;
    use std::time::Duration;

    fn target() -> (Arc<MockSdk>, Arc<EventTarget>) {
        let sdk = Arc::new(MockSdk::new());
        sdk.open_devices().unwrap();
        let handle = sdk.open(0).unwrap();
        let catalog = Arc::new(FeatureCatalog::new(sdk.clone(), handle));
        catalog.build().unwrap();
        let target = Arc::new(EventTarget::new(
            catalog,
            Arc::new(PropertySet::new()),
            Arc::new(FrameReadySignal::new()),
        ));
        (sdk, target)
    }

    #[test]
    #[serial]
    fn image_event_raises_signal() {
        let (_sdk, target) = target();
        let token = register(&target);
        event_callback(
            target.handle(),
            &CameraEvent::ImageReceived {
                tick: 1,
                frame_no: 1,
                remained: 1,
            },
            token,
        );
        assert!(target.frame_ready.wait(Duration::from_millis(1)));
        unregister(token);
    }

    #[test]
    #[serial]
    fn foreign_handle_rejected() {
        let (_sdk, target) = target();
        let token = register(&target);
        event_callback(
            target.handle() + 100,
            &CameraEvent::ImageReceived {
                tick: 1,
                frame_no: 1,
                remained: 1,
            },
            token,
        );
        assert_eq!(target.rejected(), 1);
        assert_eq!(target.handled(), 0);
        assert!(!target.frame_ready.is_set());
        unregister(token);
    }

    #[test]
    #[serial]
    fn feature_change_updates_catalog_and_broadcasts() {
        let (_sdk, target) = target();
        let token = register(&target);
        let mut changes = target.properties.subscribe_changes();

        event_callback(
            target.handle(),
            &CameraEvent::FeatureChanged {
                tick: 2,
                feature_id: FeatureId::ExposureTime,
                variant: Variant::UInt32(42_000),
            },
            token,
        );

        assert_eq!(target.catalog.exposure_us().unwrap(), 42_000);
        assert_eq!(changes.try_recv().unwrap().name, "Exposure");
        unregister(token);
    }

    #[test]
    #[serial]
    fn dropped_target_stops_delivery() {
        let (_sdk, target) = target();
        let token = register(&target);
        let before = registered();
        drop(target);
        assert_eq!(registered(), before - 1);
        // Delivery to a dead token is a logged no-op.
        event_callback(
            1,
            &CameraEvent::AeStay { tick: 0 },
            token,
        );
        unregister(token);
    }
}
