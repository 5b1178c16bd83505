//! Acquisition Controller
//!
//! Turns the single frame-ready signal raised by the event dispatcher into
//! either a blocking snapshot or a streaming sequence.
//!
//! ```text
//!            snap_image()                  start_sequence()
//!   Idle ──────────────► ArmedSingle     Idle ──────────────► Streaming
//!    ▲                        │            ▲                      │
//!    └────── always ──────────┘            └──── Stopping ◄───────┘
//!                                             stop / count reached
//! ```
//!
//! Every wait on the frame-ready signal carries a timeout of the current
//! exposure plus a margin. A timed-out wait is never escalated: the
//! snapshot still pulls whatever frame the device holds and the sequence
//! simply runs its next cycle.
//!
//! The pixel lock covers only the copy-out and hand-off to the sink, never
//! the frame wait.

use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kscam_core::limits::{MAX_RAW_FRAME_BYTES, SNAP_TIMEOUT_MARGIN, STREAM_TIMEOUT_MARGIN};
use kscam_core::{CameraError, CameraResult, Frame, FrameSink, ImageBuffer};

use crate::components::catalog::FeatureCatalog;
use crate::components::convert::{copy_mono16, rgb24_to_bgra};
use crate::components::features::{ImageGeometry, TriggerMode};
use crate::components::sequence::{
    SequenceCycle, SequenceSnapshot, SequenceStats, SequenceWorker,
};
use crate::sdk::{
    CameraHandle, Command, FeatureDesc, FeatureId, FrameSizeInfo, KsCamSdk, SdkResultExt, Variant,
    IMAGE_BUFFER_NUM_DEFAULT,
};

// =============================================================================
// Frame-ready signal
// =============================================================================

/// Auto-reset binary event raised once per received image.
///
/// `set` wakes one waiter; a successful `wait` consumes the signal.
#[derive(Debug, Default)]
pub struct FrameReadySignal {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl FrameReadySignal {
    /// Unsignalled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal and wake one waiter.
    pub fn set(&self) {
        *self.ready.lock() = true;
        self.cond.notify_one();
    }

    /// Block until signalled or `timeout` expires. Returns whether the
    /// signal was received.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock();
        if !*ready {
            self.cond.wait_while_for(&mut ready, |r| !*r, timeout);
        }
        std::mem::replace(&mut *ready, false)
    }

    /// Drop a pending signal.
    pub fn reset(&self) {
        *self.ready.lock() = false;
    }

    /// Whether a signal is pending.
    pub fn is_set(&self) -> bool {
        *self.ready.lock()
    }
}

// =============================================================================
// State
// =============================================================================

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    /// Nothing in flight
    Idle,
    /// Snapshot in flight
    ArmedSingle,
    /// Sequence worker active
    Streaming,
    /// Stop requested, worker not yet joined
    Stopping,
}

impl AcquisitionState {
    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::ArmedSingle => "armed_single",
            AcquisitionState::Streaming => "streaming",
            AcquisitionState::Stopping => "stopping",
        }
    }
}

/// Tunables of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// Hardware buffers requested on start-transfer
    pub image_buffer_count: u32,
    /// Added to the exposure time for the snapshot frame wait
    pub snap_timeout_margin: Duration,
    /// Added to the exposure time for each sequence frame wait
    pub stream_timeout_margin: Duration,
    /// Source label written into frame metadata
    pub camera_label: String,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            image_buffer_count: IMAGE_BUFFER_NUM_DEFAULT,
            snap_timeout_margin: SNAP_TIMEOUT_MARGIN,
            stream_timeout_margin: STREAM_TIMEOUT_MARGIN,
            camera_label: "KsCam".into(),
        }
    }
}

/// Output image plus the raw transfer buffer it is converted from.
#[derive(Debug, Default)]
struct PixelStore {
    image: ImageBuffer,
    raw: Vec<u8>,
}

// =============================================================================
// Controller
// =============================================================================

/// Snapshot and sequence orchestration for one open device.
pub struct Acquisition {
    sdk: Arc<dyn KsCamSdk>,
    handle: CameraHandle,
    catalog: Arc<FeatureCatalog>,
    frame_ready: Arc<FrameReadySignal>,
    sink: Arc<dyn FrameSink>,
    settings: AcquisitionSettings,
    state: Mutex<AcquisitionState>,
    geometry: RwLock<ImageGeometry>,
    frame_size: RwLock<FrameSizeInfo>,
    pixels: Mutex<PixelStore>,
    stats: SequenceStats,
    worker: Mutex<Option<SequenceWorker>>,
    snapshots: AtomicU64,
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("handle", &self.handle)
            .field("state", &*self.state.lock())
            .field("geometry", &*self.geometry.read())
            .finish()
    }
}

impl Acquisition {
    /// Controller for one open device. Geometry is computed by [`update_image_settings`](Self::update_image_settings).
    pub fn new(
        sdk: Arc<dyn KsCamSdk>,
        catalog: Arc<FeatureCatalog>,
        frame_ready: Arc<FrameReadySignal>,
        sink: Arc<dyn FrameSink>,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            handle: catalog.handle(),
            sdk,
            catalog,
            frame_ready,
            sink,
            settings,
            state: Mutex::new(AcquisitionState::Idle),
            geometry: RwLock::new(ImageGeometry::default()),
            frame_size: RwLock::new(FrameSizeInfo::default()),
            pixels: Mutex::new(PixelStore::default()),
            stats: SequenceStats::default(),
            worker: Mutex::new(None),
            snapshots: AtomicU64::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    /// Layout of the output buffer.
    pub fn geometry(&self) -> ImageGeometry {
        *self.geometry.read()
    }

    /// Raw frame size reported by the device, info block included.
    pub fn frame_size(&self) -> FrameSizeInfo {
        *self.frame_size.read()
    }

    /// Tunables in use.
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Recompute the image geometry from the active format, resize the
    /// output buffer and re-query the raw frame size.
    pub fn update_image_settings(&self) -> CameraResult<ImageGeometry> {
        let format = self.catalog.format()?;
        let geometry = ImageGeometry::from_format(format).map_err(|e| {
            tracing::error!(?format, "format has no known geometry");
            e
        })?;
        let info = self.query_frame_size()?;
        let raw_len = info.frame_size as usize;
        if raw_len > MAX_RAW_FRAME_BYTES {
            return Err(CameraError::FrameTooLarge {
                bytes: raw_len,
                max_bytes: MAX_RAW_FRAME_BYTES,
            });
        }

        {
            let mut store = self.pixels.lock();
            store
                .image
                .resize(geometry.width, geometry.height, geometry.bytes_per_pixel)?;
            store.raw.clear();
            store.raw.resize(raw_len, 0);
        }
        *self.geometry.write() = geometry;
        *self.frame_size.write() = info;

        tracing::debug!(
            width = geometry.width,
            height = geometry.height,
            bytes_per_pixel = geometry.bytes_per_pixel,
            raw_frame_bytes = raw_len,
            "image settings updated"
        );
        Ok(geometry)
    }

    fn query_frame_size(&self) -> CameraResult<FrameSizeInfo> {
        let mut command = Command::GetFrameSize(FrameSizeInfo::default());
        self.sdk
            .command(self.handle, &mut command)
            .op("GetFrameSize")?;
        match command {
            Command::GetFrameSize(info) => Ok(info),
            _ => Err(CameraError::device("GetFrameSize", 0, "no frame size returned")),
        }
    }

    // ---- device commands ----------------------------------------------------

    /// Start frame transfer. Clears any stale frame-ready signal first.
    pub fn start_transfer(&self) -> CameraResult<()> {
        self.frame_ready.reset();
        let mut command = Command::StartFrameTransfer {
            image_buffer_num: self.settings.image_buffer_count,
        };
        self.sdk
            .command(self.handle, &mut command)
            .op("StartFrameTransfer")
    }

    /// Stop the device frame transfer.
    pub fn stop_transfer(&self) -> CameraResult<()> {
        self.sdk
            .command(self.handle, &mut Command::StopFrameTransfer)
            .op("StopFrameTransfer")
    }

    /// Issue one software trigger.
    pub fn soft_trigger(&self) -> CameraResult<()> {
        self.sdk
            .command(self.handle, &mut Command::OnePushSoftTrigger)
            .op("OnePushSoftTrigger")
    }

    /// Ask the device whether a transfer is running.
    pub fn is_transfer_started(&self) -> CameraResult<bool> {
        let mut command = Command::IsTransferStarted { started: false };
        self.sdk
            .command(self.handle, &mut command)
            .op("IsTransferStarted")?;
        Ok(matches!(command, Command::IsTransferStarted { started: true }))
    }

    /// Exposure time plus `margin`, with the exposure truncated to whole
    /// milliseconds.
    fn frame_timeout(&self, margin: Duration) -> CameraResult<Duration> {
        let exposure_ms = u64::from(self.catalog.exposure_us()? / 1000);
        Ok(Duration::from_millis(exposure_ms) + margin)
    }

    fn trigger_mode_is_soft(&self) -> bool {
        matches!(
            self.catalog.selected_comment(FeatureId::TriggerMode),
            Ok(Some(ref comment)) if comment == TriggerMode::Soft.as_str()
        )
    }

    // ---- snapshot -----------------------------------------------------------

    /// Expose and grab a single image into the output buffer.
    ///
    /// Always returns to `Idle`. A frame wait that times out is logged and
    /// the frame pull is attempted anyway.
    pub fn snap_image(&self) -> CameraResult<()> {
        {
            let mut state = self.state.lock();
            if *state != AcquisitionState::Idle {
                return Err(CameraError::Busy);
            }
            *state = AcquisitionState::ArmedSingle;
        }

        let result = self.snap_armed();
        *self.state.lock() = AcquisitionState::Idle;
        result
    }

    fn snap_armed(&self) -> CameraResult<()> {
        let timeout = self.frame_timeout(self.settings.snap_timeout_margin)?;
        self.start_transfer()?;

        if self.trigger_mode_is_soft() {
            if let Err(e) = self.soft_trigger() {
                tracing::warn!(kind = %e.kind(), error = %e, "soft trigger failed");
            }
        }

        let signalled = self.frame_ready.wait(timeout);
        if !signalled {
            tracing::warn!(?timeout, "snapshot frame wait timed out");
        }

        if let Err(e) = self.stop_transfer() {
            tracing::warn!(kind = %e.kind(), error = %e, "stop transfer after snapshot failed");
        }

        match self.grab_frame() {
            Ok(()) => {
                self.snapshots.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if !signalled => {
                tracing::warn!(kind = %e.kind(), error = %e, "no frame available after snapshot timeout");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Pull the newest frame from the device into the output buffer.
    pub fn grab_frame(&self) -> CameraResult<()> {
        let mut store = self.pixels.lock();
        self.grab_into(&mut store)
    }

    fn grab_into(&self, store: &mut PixelStore) -> CameraResult<()> {
        let geometry = self.geometry();
        let PixelStore { image, raw } = store;

        let info = self
            .sdk
            .get_image(self.handle, true, raw)
            .map_err(|code| {
                tracing::error!(%code, "image retrieval failed");
                code.into_error("GetImage")
            })?;
        tracing::trace!(remained = info.remained, bytes = info.image_size, "frame retrieved");

        if geometry.color {
            rgb24_to_bgra(image.pixels_mut(), raw, geometry.width, geometry.height)
        } else {
            copy_mono16(image.pixels_mut(), raw, geometry.width, geometry.height)
        }
    }

    /// Owned copy of the output buffer.
    pub fn image(&self) -> Frame {
        let geometry = self.geometry();
        self.pixels.lock().image.to_frame(
            self.snapshots.load(Ordering::Relaxed),
            geometry.components,
            geometry.bit_depth,
        )
    }

    // ---- sequence -----------------------------------------------------------

    /// Start a sequence of `count` images, at most one per `interval`.
    ///
    /// Fails with `Busy` when a snapshot or sequence is already running; the
    /// running acquisition is left untouched.
    pub fn start_sequence(
        self: &Arc<Self>,
        count: u64,
        interval: Duration,
        stop_on_overflow: bool,
    ) -> CameraResult<()> {
        {
            let mut state = self.state.lock();
            if *state != AcquisitionState::Idle {
                return Err(CameraError::Busy);
            }
            *state = AcquisitionState::Streaming;
        }

        if let Err(e) = self.launch(count, interval, stop_on_overflow) {
            tracing::error!(kind = %e.kind(), error = %e, "sequence start failed");
            *self.state.lock() = AcquisitionState::Idle;
            return Err(e);
        }
        Ok(())
    }

    fn launch(
        self: &Arc<Self>,
        count: u64,
        interval: Duration,
        stop_on_overflow: bool,
    ) -> CameraResult<()> {
        let mut slot = self.worker.lock();
        // Reap the thread of a sequence that ended on its own.
        if let Some(mut finished) = slot.take() {
            finished.stop();
        }

        self.sink.prepare_for_acquisition()?;
        self.stats.begin(stop_on_overflow);
        self.force_free_running()?;
        self.start_transfer()?;

        let cycle: Arc<dyn SequenceCycle> = self.clone();
        match SequenceWorker::spawn(cycle, count, interval) {
            Ok(worker) => {
                *slot = Some(worker);
                tracing::info!(count, ?interval, stop_on_overflow, "sequence started");
                Ok(())
            }
            Err(e) => {
                if let Err(stop_err) = self.stop_transfer() {
                    tracing::warn!(kind = %stop_err.kind(), error = %stop_err, "stop transfer after failed start");
                }
                Err(e)
            }
        }
    }

    /// Streaming requires free-running capture.
    fn force_free_running(&self) -> CameraResult<()> {
        let entry = self.catalog.entry(FeatureId::TriggerMode)?;
        let off = match &entry.descriptor {
            FeatureDesc::ElementList(list) => list
                .iter()
                .find(|e| e.comment == TriggerMode::Off.as_str())
                .map(|e| e.value),
            _ => None,
        }
        .unwrap_or(TriggerMode::Off.to_raw());

        if entry.value != Variant::UInt32(off) {
            tracing::info!("switching trigger mode off for streaming");
            self.catalog.update(FeatureId::TriggerMode, |v| {
                *v = Variant::UInt32(off);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Stop the running sequence and join its worker. No-op when idle.
    ///
    /// The thread of a sequence that already ended on its own is reaped
    /// without touching the device.
    pub fn stop_sequence(&self) -> CameraResult<()> {
        let Some(mut worker) = self.worker.lock().take() else {
            return Ok(());
        };

        {
            let mut state = self.state.lock();
            if *state != AcquisitionState::Streaming {
                drop(state);
                worker.stop();
                tracing::trace!("reaped finished sequence worker");
                return Ok(());
            }
            *state = AcquisitionState::Stopping;
        }
        if let Err(e) = self.stop_transfer() {
            tracing::warn!(kind = %e.kind(), error = %e, "stop transfer failed");
        }
        worker.stop();

        let mut state = self.state.lock();
        if *state == AcquisitionState::Stopping {
            *state = AcquisitionState::Idle;
        }
        tracing::info!("sequence stopped");
        Ok(())
    }

    /// Running or stopping.
    pub fn is_capturing(&self) -> bool {
        matches!(
            self.state(),
            AcquisitionState::Streaming | AcquisitionState::Stopping
        )
    }

    /// Pause delivery without stopping the transfer. False when nothing runs.
    pub fn suspend_sequence(&self) -> bool {
        match self.worker.lock().as_ref() {
            Some(worker) if worker.is_running() => {
                worker.suspend();
                true
            }
            _ => false,
        }
    }

    /// Undo [`suspend_sequence`](Self::suspend_sequence). False when there is no worker.
    pub fn resume_sequence(&self) -> bool {
        match self.worker.lock().as_ref() {
            Some(worker) => {
                worker.resume();
                true
            }
            None => false,
        }
    }

    /// Statistics of the current or last sequence.
    pub fn sequence_stats(&self) -> SequenceSnapshot {
        self.stats.snapshot()
    }

    /// Hand the output buffer to the sink with sequence metadata.
    ///
    /// On overflow with stop-on-overflow disabled, the sink is cleared and
    /// the same frame inserted once more.
    fn insert_image(&self, image: &ImageBuffer) -> CameraResult<()> {
        let geometry = self.geometry();
        let metadata = self.stats.next_metadata(&self.settings.camera_label);
        let frame = image.to_frame(
            metadata.image_number,
            geometry.components,
            geometry.bit_depth,
        );

        match self.sink.insert_image(&frame, &metadata) {
            Err(CameraError::BufferOverflow) if !self.stats.stop_on_overflow() => {
                tracing::warn!(
                    sink = self.sink.name(),
                    image_number = metadata.image_number,
                    "sink overflow; clearing and re-inserting"
                );
                self.sink.clear_buffer();
                self.sink.insert_image(&frame, &metadata)
            }
            other => other,
        }
    }
}

impl SequenceCycle for Acquisition {
    fn run_cycle(&self) -> CameraResult<()> {
        let started = Instant::now();
        let timeout = self.frame_timeout(self.settings.stream_timeout_margin)?;

        if !self.frame_ready.wait(timeout) {
            tracing::warn!(?timeout, "sequence frame wait timed out");
            return Ok(());
        }

        {
            let mut store = self.pixels.lock();
            if let Err(e) = self.grab_into(&mut store) {
                tracing::warn!(kind = %e.kind(), error = %e, "frame dropped");
                return Ok(());
            }
            self.insert_image(&store.image)?;
        }

        self.stats.record_frame_interval(started.elapsed());
        Ok(())
    }

    fn sequence_finished(&self, cycles: u64) {
        if let Err(e) = self.stop_transfer() {
            tracing::warn!(kind = %e.kind(), error = %e, "stop transfer at sequence end failed");
        }
        {
            let mut state = self.state.lock();
            if *state == AcquisitionState::Streaming {
                *state = AcquisitionState::Idle;
            }
        }
        let stats = self.stats.snapshot();
        tracing::info!(
            cycles,
            images = stats.image_counter,
            fps = stats.frames_per_second,
            "sequence finished"
        );
        self.sink.acquisition_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_is_auto_reset() {
        let signal = FrameReadySignal::new();
        signal.set();
        assert!(signal.is_set());
        assert!(signal.wait(Duration::from_millis(1)));
        assert!(!signal.is_set());
        assert!(!signal.wait(Duration::from_millis(5)));
    }

    #[test]
    fn signal_wakes_waiter() {
        let signal = Arc::new(FrameReadySignal::new());
        let setter = signal.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            setter.set();
        });
        assert!(signal.wait(Duration::from_secs(2)));
        t.join().unwrap();
    }

    #[test]
    fn reset_discards_stale_signal() {
        let signal = FrameReadySignal::new();
        signal.set();
        signal.reset();
        assert!(!signal.wait(Duration::from_millis(1)));
    }

    #[test]
    fn default_settings() {
        let settings = AcquisitionSettings::default();
        assert_eq!(settings.image_buffer_count, 5);
        assert_eq!(settings.snap_timeout_margin, Duration::from_millis(100));
        assert_eq!(settings.stream_timeout_margin, Duration::from_millis(300));
        assert_eq!(AcquisitionState::ArmedSingle.as_str(), "armed_single");
    }
}
