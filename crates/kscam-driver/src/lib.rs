//! Nikon KsCam Camera Driver (DS-Ri2 / DS-Qi2)
//!
//! Component layout:
//! - Connection: enumeration and the device session
//! - Catalog: local mirror of the device feature table
//! - Binding: host properties backed by catalog entries
//! - Dispatcher: device events routed back to the owning session
//! - Acquisition: snapshots, sequences and pixel conversion
//!
//! The SDK is reached through the [`sdk::KsCamSdk`] trait; the default
//! `mock` feature provides a simulator implementing it.

pub mod components;
pub mod config;
pub mod sdk;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use kscam_core::capabilities::{
    Commandable, ExposureControl, FrameProducer, Parameterized, Triggerable,
};
use kscam_core::{
    CameraError, CameraResult, DriverError, DriverErrorKind, Frame, FrameSink, PropertySet,
    PropertyValue,
};

use crate::components::acquisition::{Acquisition, AcquisitionState, FrameReadySignal};
use crate::components::binding::{bind_properties, property_name, BindingContext, EXPOSURE};
use crate::components::catalog::FeatureCatalog;
use crate::components::connection::{list_devices, Session};
use crate::components::dispatcher::{self, EventTarget};
use crate::components::features::{ImageGeometry, TriggerMode, COMPONENT_NAMES};
use crate::components::sequence::SequenceSnapshot;
use crate::sdk::{
    CameraHandle, Command, ContextToken, DeviceInfo, FeatureDesc, FeatureId, KsCamSdk,
    SdkResultExt,
};

pub use crate::components::features::{ExposureMode, MeteringMode, Preset, SignalOutput};
pub use crate::config::{ConfigLoadError, KsCamConfig};

/// Driver name attached to classified driver errors.
pub const DRIVER_TYPE: &str = "kscam";

/// Everything that exists only while the device is open.
///
/// Field order is drop order: the acquisition (and its worker) goes before
/// the session.
struct OpenCamera {
    acquisition: Arc<Acquisition>,
    catalog: Arc<FeatureCatalog>,
    target: Arc<EventTarget>,
    token: ContextToken,
    session: Session,
}

impl OpenCamera {
    fn open(
        sdk: &Arc<dyn KsCamSdk>,
        config: &KsCamConfig,
        sink: &Arc<dyn FrameSink>,
        properties: &Arc<PropertySet>,
    ) -> CameraResult<Self> {
        let mut session = Session::open(sdk.clone(), config.camera_name.as_deref())?;
        match Self::assemble(sdk, config, sink, properties, &session) {
            Ok((catalog, acquisition, target)) => {
                let token = dispatcher::register(&target);
                let handle = session.handle();
                if let Err(code) =
                    sdk.set_event_callback(handle, Some(dispatcher::event_callback), token)
                {
                    tracing::error!(handle, %code, "event callback registration failed");
                    dispatcher::unregister(token);
                    properties.clear();
                    if let Err(e) = session.close() {
                        tracing::warn!(kind = %e.kind(), error = %e, "close after failed initialization");
                    }
                    return Err(CameraError::Initialization(format!(
                        "event callback: {}",
                        code.into_error("SetEventCallback")
                    )));
                }
                Ok(Self {
                    acquisition,
                    catalog,
                    target,
                    token,
                    session,
                })
            }
            Err(e) => {
                tracing::error!(kind = %e.kind(), error = %e, "camera initialization failed");
                properties.clear();
                if let Err(close_err) = session.close() {
                    tracing::warn!(kind = %close_err.kind(), error = %close_err, "close after failed initialization");
                }
                Err(match e {
                    CameraError::Initialization(_) => e,
                    other => CameraError::Initialization(other.to_string()),
                })
            }
        }
    }

    fn assemble(
        sdk: &Arc<dyn KsCamSdk>,
        config: &KsCamConfig,
        sink: &Arc<dyn FrameSink>,
        properties: &Arc<PropertySet>,
        session: &Session,
    ) -> CameraResult<(Arc<FeatureCatalog>, Arc<Acquisition>, Arc<EventTarget>)> {
        let catalog = Arc::new(FeatureCatalog::new(sdk.clone(), session.handle()));
        catalog.build()?;

        let frame_ready = Arc::new(FrameReadySignal::new());
        let acquisition = Arc::new(Acquisition::new(
            sdk.clone(),
            catalog.clone(),
            frame_ready.clone(),
            sink.clone(),
            config.acquisition_settings(),
        ));
        acquisition.update_image_settings()?;

        let ctx = BindingContext {
            catalog: catalog.clone(),
            acquisition: acquisition.clone(),
            device: session.device().clone(),
        };
        bind_properties(&ctx, properties)?;

        let target = Arc::new(EventTarget::new(
            catalog.clone(),
            properties.clone(),
            frame_ready,
        ));
        Ok((catalog, acquisition, target))
    }

    fn handle(&self) -> CameraHandle {
        self.session.handle()
    }

    fn close(mut self, sdk: &dyn KsCamSdk, properties: &PropertySet) -> CameraResult<()> {
        if let Err(e) = self.acquisition.stop_sequence() {
            tracing::warn!(kind = %e.kind(), error = %e, "stopping sequence on shutdown failed");
        }
        let handle = self.handle();
        if let Err(code) = sdk.set_event_callback(handle, None, self.token) {
            tracing::warn!(handle, %code, "clearing event callback failed");
        }
        dispatcher::unregister(self.token);
        tracing::debug!(
            handle,
            events = self.target.handled(),
            rejected = self.target.rejected(),
            "event delivery stopped"
        );
        // Property hooks hold the acquisition and catalog.
        properties.clear();
        self.session.close()
    }
}

/// Driver for Nikon DS-Ri2 and DS-Qi2 cameras.
///
/// Construct with [`KsCamDriver::new`], then [`initialize`](Self::initialize)
/// to open the device. Call [`shutdown`](Self::shutdown) before dropping;
/// dropping an open driver closes it with a warning.
pub struct KsCamDriver {
    sdk: Arc<dyn KsCamSdk>,
    config: KsCamConfig,
    sink: Arc<dyn FrameSink>,
    properties: Arc<PropertySet>,
    camera: Mutex<Option<OpenCamera>>,
}

impl std::fmt::Debug for KsCamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KsCamDriver")
            .field("camera_name", &self.config.camera_name)
            .field("open", &self.is_open())
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl KsCamDriver {
    /// Driver for the device named in `config` (or the first one). Nothing is opened yet.
    pub fn new(sdk: Arc<dyn KsCamSdk>, config: KsCamConfig, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sdk,
            config,
            sink,
            properties: Arc::new(PropertySet::new()),
            camera: Mutex::new(None),
        }
    }

    /// Create and initialize in one step.
    pub fn open(
        sdk: Arc<dyn KsCamSdk>,
        config: KsCamConfig,
        sink: Arc<dyn FrameSink>,
    ) -> CameraResult<Self> {
        let driver = Self::new(sdk, config, sink);
        driver.initialize()?;
        Ok(driver)
    }

    /// Open the device, build the feature catalog and register properties.
    ///
    /// Any failure leaves the driver closed with no properties. Calling it
    /// on an open driver does nothing.
    pub fn initialize(&self) -> CameraResult<()> {
        let mut slot = self.camera.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.config.validate().map_err(|e| {
            let err = CameraError::from(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                e.to_string(),
            ));
            tracing::error!(kind = %err.kind(), error = %err, "refusing to open with invalid config");
            err
        })?;
        let camera = OpenCamera::open(&self.sdk, &self.config, &self.sink, &self.properties)?;
        tracing::info!(
            handle = camera.handle(),
            features = camera.catalog.len(),
            properties = self.properties.len(),
            "KsCam driver initialized"
        );
        *slot = Some(camera);
        Ok(())
    }

    /// Stop any sequence, detach from device events and close the device.
    /// Safe to call more than once.
    pub fn shutdown(&self) -> CameraResult<()> {
        let Some(camera) = self.camera.lock().take() else {
            return Ok(());
        };
        let result = camera.close(self.sdk.as_ref(), &self.properties);
        tracing::info!("KsCam driver shut down");
        result
    }

    /// Whether a device session is open.
    pub fn is_open(&self) -> bool {
        self.camera.lock().is_some()
    }

    /// Enumerate connected devices without opening one.
    pub fn list_devices(&self) -> CameraResult<Vec<DeviceInfo>> {
        let devices = list_devices(self.sdk.as_ref())?;
        if !self.is_open() {
            if let Err(code) = self.sdk.close_devices() {
                tracing::warn!(%code, "releasing device enumeration failed");
            }
        }
        Ok(devices)
    }

    /// Settings the driver was built with.
    pub fn config(&self) -> &KsCamConfig {
        &self.config
    }

    /// Property registry; empty while closed.
    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Static information about the open device.
    pub fn device(&self) -> CameraResult<DeviceInfo> {
        self.with_camera(|c| Ok(c.session.device().clone()))
    }

    /// SDK handle of the open session.
    pub fn handle(&self) -> CameraResult<CameraHandle> {
        self.with_camera(|c| Ok(c.handle()))
    }

    fn with_camera<T>(&self, f: impl FnOnce(&OpenCamera) -> CameraResult<T>) -> CameraResult<T> {
        match self.camera.lock().as_ref() {
            Some(camera) => f(camera),
            None => Err(CameraError::NotInitialized),
        }
    }

    fn acquisition(&self) -> CameraResult<Arc<Acquisition>> {
        self.with_camera(|c| Ok(c.acquisition.clone()))
    }

    // ---- exposure -----------------------------------------------------------

    /// Exposure in milliseconds.
    pub fn exposure_ms(&self) -> CameraResult<f64> {
        let value = self.properties.get_value(EXPOSURE)?;
        value.as_f64().ok_or_else(|| CameraError::InvalidValue {
            name: EXPOSURE.to_string(),
            value: format!("{:?}", value),
        })
    }

    /// Set the exposure in milliseconds. The device value is quantized.
    pub fn set_exposure_ms(&self, ms: f64) -> CameraResult<()> {
        self.properties.set_value(EXPOSURE, PropertyValue::Float(ms))
    }

    // ---- geometry -----------------------------------------------------------

    /// Output buffer layout of the active format.
    pub fn geometry(&self) -> CameraResult<ImageGeometry> {
        Ok(self.acquisition()?.geometry())
    }

    /// Current region as (x, y, width, height).
    pub fn get_roi(&self) -> CameraResult<(u32, u32, u32, u32)> {
        let geometry = self.geometry()?;
        Ok((0, 0, geometry.width, geometry.height))
    }

    /// Arbitrary regions are not supported; pick a ROI format instead.
    pub fn set_roi(&self, x: u32, y: u32, width: u32, height: u32) -> CameraResult<()> {
        tracing::warn!(x, y, width, height, "arbitrary ROI rejected");
        Err(CameraError::Unsupported(
            "arbitrary ROI; select a ROI format instead".into(),
        ))
    }

    /// Select the largest format of the current color mode.
    pub fn clear_roi(&self) -> CameraResult<()> {
        let (current, desc) = self.with_camera(|c| {
            Ok((
                c.catalog.format()?,
                c.catalog.descriptor(FeatureId::Format)?,
            ))
        })?;
        let FeatureDesc::FormatList(list) = desc else {
            return Err(CameraError::UnknownFeature(FeatureId::Format.raw()));
        };
        let full = list
            .iter()
            .filter(|e| e.format.color == current.color)
            .max_by_key(|e| u64::from(e.width) * u64::from(e.height))
            .ok_or_else(|| CameraError::Unsupported("no full-frame format".into()))?;
        if full.format == current {
            return Ok(());
        }
        self.properties.set_value(
            property_name(FeatureId::Format),
            PropertyValue::String(full.comment.clone()),
        )
    }

    /// Only 1x binning exists; anything else is `Unsupported`.
    pub fn set_binning(&self, binning: u32) -> CameraResult<()> {
        if binning == 1 {
            return Ok(());
        }
        Err(CameraError::Unsupported(format!("binning {}", binning)))
    }

    /// Single-letter name of color component `index`.
    pub fn component_name(&self, index: usize) -> CameraResult<&'static str> {
        COMPONENT_NAMES
            .get(index..=index)
            .ok_or_else(|| CameraError::OutOfRange {
                name: "component".into(),
                value: index as f64,
                min: 0.0,
                max: (COMPONENT_NAMES.len() - 1) as f64,
            })
    }

    // ---- acquisition --------------------------------------------------------

    /// Expose and retrieve a single image. Blocks for up to the exposure
    /// time plus the snapshot margin.
    pub fn snap_image(&self) -> CameraResult<()> {
        self.acquisition()?.snap_image()
    }

    /// Copy of the most recent image.
    pub fn image_buffer(&self) -> CameraResult<Frame> {
        Ok(self.acquisition()?.image())
    }

    /// Acquisition controller state.
    pub fn state(&self) -> CameraResult<AcquisitionState> {
        Ok(self.acquisition()?.state())
    }

    /// Start a sequence of `count` images. See [`Acquisition::start_sequence`].
    pub fn start_sequence(
        &self,
        count: u64,
        interval: Duration,
        stop_on_overflow: bool,
    ) -> CameraResult<()> {
        self.acquisition()?
            .start_sequence(count, interval, stop_on_overflow)
    }

    /// Sequence that runs until stopped, using the configured overflow policy.
    pub fn start_continuous(&self, interval: Duration) -> CameraResult<()> {
        self.start_sequence(u64::MAX, interval, self.config.stop_on_overflow)
    }

    /// Stop the running sequence. No-op when idle or closed.
    pub fn stop_sequence(&self) -> CameraResult<()> {
        match self.acquisition() {
            Ok(acquisition) => acquisition.stop_sequence(),
            Err(CameraError::NotInitialized) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// True while a sequence is running or stopping. False when closed.
    pub fn is_capturing(&self) -> bool {
        self.acquisition()
            .map(|a| a.is_capturing())
            .unwrap_or(false)
    }

    /// Frame rate, image counter and timing of the current or last sequence.
    pub fn sequence_stats(&self) -> CameraResult<SequenceSnapshot> {
        Ok(self.acquisition()?.sequence_stats())
    }

    /// Pause frame delivery. Returns false when no sequence is running.
    pub fn suspend_sequence(&self) -> CameraResult<bool> {
        Ok(self.acquisition()?.suspend_sequence())
    }

    /// Continue after [`suspend_sequence`](Self::suspend_sequence).
    pub fn resume_sequence(&self) -> CameraResult<bool> {
        Ok(self.acquisition()?.resume_sequence())
    }

    // ---- commands -----------------------------------------------------------

    fn run_command(&self, mut command: Command) -> CameraResult<Command> {
        let handle = self.handle()?;
        let name = command.name();
        self.sdk.command(handle, &mut command).op(name)?;
        tracing::debug!(handle, command = name, "command executed");
        Ok(command)
    }

    /// Run one of the named device commands. Returns a JSON result object.
    pub fn command(&self, name: &str) -> CameraResult<serde_json::Value> {
        match name {
            "one_push_ae" => {
                self.run_command(Command::OnePushAe)?;
            }
            "one_push_white_balance" => {
                self.run_command(Command::OnePushWhiteBalance)?;
            }
            "soft_trigger" => {
                self.acquisition()?.soft_trigger()?;
            }
            "trigger_cancel" => {
                self.run_command(Command::OnePushTriggerCancel)?;
            }
            "frame_size" => {
                let info = self.acquisition()?.frame_size();
                return serde_json::to_value(info)
                    .map_err(|e| CameraError::InvalidValue {
                        name: name.to_string(),
                        value: e.to_string(),
                    });
            }
            "is_transfer_started" => {
                let started = self.acquisition()?.is_transfer_started()?;
                return Ok(json!({ "started": started }));
            }
            other => return Err(CameraError::Unsupported(format!("command '{}'", other))),
        }
        Ok(json!({ "ok": true }))
    }

    fn selected_trigger_mode(&self) -> CameraResult<Option<String>> {
        self.with_camera(|c| c.catalog.selected_comment(FeatureId::TriggerMode))
    }
}

impl Drop for KsCamDriver {
    fn drop(&mut self) {
        if let Some(camera) = self.camera.get_mut().take() {
            tracing::warn!("KsCamDriver dropped while open; closing");
            if let Err(e) = camera.close(self.sdk.as_ref(), &self.properties) {
                tracing::error!(kind = %e.kind(), error = %e, "close on drop failed");
            }
        }
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// Run blocking driver work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> CameraResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

#[async_trait]
impl ExposureControl for KsCamDriver {
    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        let properties = self.properties.clone();
        blocking(move || properties.set_value(EXPOSURE, PropertyValue::Float(seconds * 1000.0)))
            .await
    }

    async fn get_exposure(&self) -> Result<f64> {
        Ok(self.exposure_ms()? / 1000.0)
    }
}

#[async_trait]
impl Triggerable for KsCamDriver {
    /// Switch to software triggering.
    async fn arm(&self) -> Result<()> {
        let properties = self.properties.clone();
        blocking(move || {
            properties.set_value(
                property_name(FeatureId::TriggerMode),
                PropertyValue::String(TriggerMode::Soft.as_str().to_string()),
            )
        })
        .await
    }

    async fn trigger(&self) -> Result<()> {
        let acquisition = self.acquisition()?;
        blocking(move || acquisition.soft_trigger()).await
    }

    async fn is_armed(&self) -> Result<bool> {
        Ok(self.selected_trigger_mode()?.as_deref() == Some(TriggerMode::Soft.as_str()))
    }
}

#[async_trait]
impl FrameProducer for KsCamDriver {
    async fn start_stream(&self) -> Result<()> {
        let acquisition = self.acquisition()?;
        let stop_on_overflow = self.config.stop_on_overflow;
        blocking(move || acquisition.start_sequence(u64::MAX, Duration::ZERO, stop_on_overflow))
            .await
    }

    async fn start_stream_finite(&self, frame_limit: Option<u32>) -> Result<()> {
        let Some(limit) = frame_limit else {
            return self.start_stream().await;
        };
        let acquisition = self.acquisition()?;
        let stop_on_overflow = self.config.stop_on_overflow;
        blocking(move || {
            acquisition.start_sequence(u64::from(limit), Duration::ZERO, stop_on_overflow)
        })
        .await
    }

    async fn stop_stream(&self) -> Result<()> {
        let Ok(acquisition) = self.acquisition() else {
            return Ok(());
        };
        blocking(move || acquisition.stop_sequence()).await
    }

    fn resolution(&self) -> (u32, u32) {
        self.geometry()
            .map(|g| (g.width, g.height))
            .unwrap_or((0, 0))
    }

    async fn is_streaming(&self) -> Result<bool> {
        Ok(self.is_capturing())
    }

    fn frame_count(&self) -> u64 {
        self.sequence_stats()
            .map(|s| s.image_counter)
            .unwrap_or(0)
    }
}

impl Parameterized for KsCamDriver {
    fn parameters(&self) -> &PropertySet {
        &self.properties
    }
}

#[async_trait]
impl Commandable for KsCamDriver {
    async fn execute_command(
        &self,
        command: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(self.command(command)?)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;
    use kscam_core::BoundedFrameSink;
    use serial_test::serial;

    fn driver() -> (Arc<MockSdk>, KsCamDriver) {
        let sdk = Arc::new(MockSdk::new());
        let driver = KsCamDriver::new(
            sdk.clone(),
            KsCamConfig::default(),
            Arc::new(BoundedFrameSink::new(4)),
        );
        (sdk, driver)
    }

    #[test]
    #[serial]
    fn queries_before_initialize_fail() {
        let (_sdk, driver) = driver();
        assert!(matches!(driver.snap_image(), Err(CameraError::NotInitialized)));
        assert!(driver.stop_sequence().is_ok());
        assert!(!driver.is_capturing());
        assert!(driver.properties().is_empty());
    }

    #[test]
    #[serial]
    fn component_names() {
        let (_sdk, driver) = driver();
        assert_eq!(driver.component_name(0).unwrap(), "R");
        assert_eq!(driver.component_name(3).unwrap(), "A");
        assert!(driver.component_name(4).is_err());
    }

    #[test]
    #[serial]
    fn roi_and_binning_requests() {
        let (_sdk, driver) = driver();
        driver.initialize().unwrap();
        assert!(matches!(
            driver.set_roi(10, 10, 100, 100),
            Err(CameraError::Unsupported(_))
        ));
        assert!(driver.set_binning(1).is_ok());
        assert!(matches!(driver.set_binning(2), Err(CameraError::Unsupported(_))));

        driver.clear_roi().unwrap();
        assert_eq!(driver.get_roi().unwrap(), (0, 0, 4908, 3264));
        driver.shutdown().unwrap();
    }

    #[test]
    #[serial]
    fn unknown_command_rejected() {
        let (_sdk, driver) = driver();
        driver.initialize().unwrap();
        assert!(matches!(
            driver.command("self_destruct"),
            Err(CameraError::Unsupported(_))
        ));
        driver.shutdown().unwrap();
    }
}
