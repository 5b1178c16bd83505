//! KsCam Connection Management
//!
//! Device enumeration and the open/close lifecycle of one camera session.
//! A [`Session`] only exists once the device has been opened successfully;
//! a failed open leaves nothing behind. Closing is idempotent.

use std::sync::Arc;

use kscam_core::{CameraError, CameraResult};

use crate::sdk::{CameraHandle, DeviceInfo, KsCamSdk, SdkResultExt};

/// Enumerate every connected device (simulators included).
pub fn list_devices(sdk: &dyn KsCamSdk) -> CameraResult<Vec<DeviceInfo>> {
    let devices = sdk.open_devices().op("OpenDevices")?;
    tracing::debug!(count = devices.len(), "devices enumerated");
    Ok(devices)
}

/// An open device.
pub struct Session {
    sdk: Arc<dyn KsCamSdk>,
    handle: CameraHandle,
    device: DeviceInfo,
    open: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("device", &self.device.camera_name)
            .field("open", &self.open)
            .finish()
    }
}

impl Session {
    /// Open the device named `camera_name`, or the first enumerated device
    /// when no name is given.
    pub fn open(sdk: Arc<dyn KsCamSdk>, camera_name: Option<&str>) -> CameraResult<Self> {
        let devices = list_devices(sdk.as_ref()).map_err(|e| {
            tracing::error!(kind = %e.kind(), error = %e, "device enumeration failed");
            CameraError::Initialization(e.to_string())
        })?;

        let device = match camera_name {
            Some(name) => devices.iter().find(|d| d.camera_name == name),
            None => devices.first(),
        }
        .cloned()
        .ok_or_else(|| {
            let wanted = camera_name.unwrap_or("any camera");
            tracing::error!(wanted, available = devices.len(), "no matching device");
            CameraError::Initialization(format!("device not found: {}", wanted))
        })?;

        let handle = sdk.open(device.index).map_err(|code| {
            tracing::error!(device = %device.camera_name, %code, "device open failed");
            CameraError::Initialization(format!(
                "open {}: {}",
                device.camera_name,
                code.into_error("Open")
            ))
        })?;

        tracing::info!(
            handle,
            device = %device.camera_name,
            device_type = device.device_type.as_str(),
            serial = device.serial_no,
            "camera opened"
        );

        Ok(Self {
            sdk,
            handle,
            device,
            open: true,
        })
    }

    /// SDK handle; stays valid until `close`.
    pub fn handle(&self) -> CameraHandle {
        self.handle
    }

    /// Device the session was opened on.
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Ri2 bodies carry the color-processing feature set.
    pub fn is_ri2(&self) -> bool {
        self.device.device_type.is_color_capable()
    }

    /// False after `close`.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Close the device and release the enumeration. Safe to call twice.
    pub fn close(&mut self) -> CameraResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let closed = self.sdk.close(self.handle).op("Close");
        if let Err(code) = self.sdk.close_devices() {
            tracing::warn!(%code, "releasing device enumeration failed");
        }
        tracing::info!(handle = self.handle, "camera closed");
        closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.open {
            tracing::warn!(handle = self.handle, "Session dropped while open; closing");
            if let Err(e) = self.close() {
                tracing::error!(kind = %e.kind(), error = %e, "close on drop failed");
            }
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;
    use crate::sdk::DeviceType;

    #[test]
    fn opens_first_device_by_default() {
        let sdk = Arc::new(MockSdk::new());
        let mut session = Session::open(sdk.clone(), None).unwrap();
        assert_eq!(session.device().device_type, DeviceType::Ri2Simulator);
        assert!(session.is_ri2());
        assert_eq!(sdk.open_sessions(), 1);

        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(sdk.open_sessions(), 0);
    }

    #[test]
    fn opens_by_name() {
        let sdk = Arc::new(MockSdk::new());
        let session = Session::open(sdk, Some("DS-Qi2 Simulator")).unwrap();
        assert_eq!(session.device().device_type, DeviceType::Qi2Simulator);
        assert!(!session.is_ri2());
    }

    #[test]
    fn unknown_name_is_initialization_error() {
        let sdk = Arc::new(MockSdk::new());
        let err = Session::open(sdk.clone(), Some("DS-Fi3")).unwrap_err();
        assert!(matches!(err, CameraError::Initialization(_)));
        assert_eq!(sdk.open_sessions(), 0);
    }

    #[test]
    fn failed_open_leaves_no_session() {
        let sdk = Arc::new(MockSdk::new());
        sdk.fail_open(true);
        assert!(Session::open(sdk.clone(), None).is_err());
        assert_eq!(sdk.open_sessions(), 0);
    }

    #[test]
    fn drop_closes() {
        let sdk = Arc::new(MockSdk::new());
        drop(Session::open(sdk.clone(), None).unwrap());
        assert_eq!(sdk.open_sessions(), 0);
    }
}
