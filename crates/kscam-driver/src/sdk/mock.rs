//! Simulated KsCam SDK
//!
//! Deterministic stand-in for the vendor SDK, modelled on the Ri2 and Qi2
//! simulator devices the real SDK enumerates. It keeps per-session feature
//! state, validates commits against its own descriptors, runs a free-running
//! frame clock while transfer is active and delivers events through the
//! registered callback.
//!
//! Failure injection hooks let tests exercise the error paths: failed
//! commits, failed descriptor queries, failed opens, empty feature tables,
//! suppressed frames and arbitrary device-originated events.
//!
//! Events are always delivered with the simulator lock released.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    Area, AreaDesc, CameraEvent, CameraHandle, Command, ContextToken, DeviceInfo, DeviceType,
    EventCallback, FeatureDesc, FeatureId, FeatureValue, Format, FormatColor, FormatMode,
    FrameSizeInfo, ImageInfo, KsCamSdk, ListElement, MultiExposureTime, Position, PositionDesc,
    RangeDesc, ResultCode, SdkResult, TriggerOption, TriggerOptionDesc, Variant,
    IMAGE_BUFFER_NUM_MAX, IMAGE_BUFFER_NUM_MIN,
};
use crate::components::features::{
    supported_formats, ExposureMode, MeteringMode, Preset, SignalOutput, TriggerMode,
    SENSOR_HEIGHT, SENSOR_WIDTH,
};

/// Shortest simulated frame period.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(2);

/// Exposure the simulator starts with (microseconds).
pub const DEFAULT_EXPOSURE_US: u32 = 10_000;

/// Exposure the simulated one-push AE settles on (microseconds).
pub const ONE_PUSH_AE_EXPOSURE_US: u32 = 20_000;

/// Format every simulated device starts in.
pub const DEFAULT_MODE: FormatMode = FormatMode::Avg1636x1088;

/// Metering area size floor, in pixels of the active mode.
const METERING_MIN: u32 = 16;

/// Byte `index` of simulated frame `frame_no`.
pub fn pattern_byte(frame_no: u32, index: usize) -> u8 {
    ((index as u64 + u64::from(frame_no)) % 251) as u8
}

// =============================================================================
// State
// =============================================================================

struct Transfer {
    running: Arc<AtomicBool>,
}

struct Session {
    device_index: u32,
    device_type: DeviceType,
    features: BTreeMap<FeatureId, Variant>,
    callback: Option<(EventCallback, ContextToken)>,
    transfer: Option<Transfer>,
    buffer_num: u32,
    frame_no: u32,
    last_frame: Option<u32>,
    remained: u32,
    frame_dropless: bool,
}

impl Session {
    fn format(&self) -> Format {
        match self.features.get(&FeatureId::Format) {
            Some(Variant::Format(f)) => *f,
            _ => Format {
                color: FormatColor::Mono16,
                mode: DEFAULT_MODE,
            },
        }
    }

    fn u32_feature(&self, id: FeatureId) -> u32 {
        self.features
            .get(&id)
            .and_then(Variant::as_u32)
            .unwrap_or_default()
    }

    fn exposure_us(&self) -> u32 {
        self.u32_feature(FeatureId::ExposureTime)
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_micros(u64::from(self.exposure_us())).max(MIN_FRAME_INTERVAL)
    }

    fn trigger_mode(&self) -> TriggerMode {
        TriggerMode::from_raw(self.u32_feature(FeatureId::TriggerMode))
    }
}

#[derive(Default)]
struct Failures {
    open: bool,
    commits: u32,
    descriptor: Option<FeatureId>,
    empty_features: bool,
    suppress_frames: bool,
    get_image: bool,
}

struct MockState {
    devices: Vec<DeviceInfo>,
    enumerated: bool,
    sessions: HashMap<CameraHandle, Session>,
    next_handle: CameraHandle,
    failures: Failures,
    commands: Vec<&'static str>,
    commits: u64,
}

// =============================================================================
// MockSdk
// =============================================================================

/// Simulated SDK with an Ri2 and a Qi2 simulator device by default.
pub struct MockSdk {
    state: Arc<Mutex<MockState>>,
    epoch: Instant,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    /// Two simulators: "DS-Ri2 Simulator" (color) and "DS-Qi2 Simulator" (mono).
    pub fn new() -> Self {
        Self::with_devices(&[DeviceType::Ri2Simulator, DeviceType::Qi2Simulator])
    }

    /// Simulator enumerating one device per entry of `types`.
    pub fn with_devices(types: &[DeviceType]) -> Self {
        let devices = types
            .iter()
            .enumerate()
            .map(|(i, &device_type)| device_info(i as u32, device_type))
            .collect();
        Self {
            state: Arc::new(Mutex::new(MockState {
                devices,
                enumerated: false,
                sessions: HashMap::new(),
                next_handle: 0x1000,
                failures: Failures::default(),
                commands: Vec::new(),
                commits: 0,
            })),
            epoch: Instant::now(),
        }
    }

    // ---- failure injection --------------------------------------------------

    /// Make opens fail while set.
    pub fn fail_open(&self, fail: bool) {
        self.state.lock().failures.open = fail;
    }

    /// Fail the next `count` bulk commits.
    pub fn fail_next_commits(&self, count: u32) {
        self.state.lock().failures.commits = count;
    }

    /// Fail descriptor queries for `id`.
    pub fn fail_descriptor(&self, id: Option<FeatureId>) {
        self.state.lock().failures.descriptor = id;
    }

    /// Make the bulk feature query return no features.
    pub fn report_no_features(&self, empty: bool) {
        self.state.lock().failures.empty_features = empty;
    }

    /// Stop producing frames while transfer is running.
    pub fn suppress_frames(&self, suppress: bool) {
        self.state.lock().failures.suppress_frames = suppress;
    }

    /// Make image pulls fail while set.
    pub fn fail_get_image(&self, fail: bool) {
        self.state.lock().failures.get_image = fail;
    }

    // ---- inspection ---------------------------------------------------------

    /// Names of the commands issued so far, oldest first.
    pub fn command_log(&self) -> Vec<&'static str> {
        self.state.lock().commands.clone()
    }

    /// Forget recorded commands.
    pub fn clear_command_log(&self) {
        self.state.lock().commands.clear();
    }

    /// Number of successful bulk commits.
    pub fn commit_count(&self) -> u64 {
        self.state.lock().commits
    }

    /// Device-side value of a feature.
    pub fn device_value(&self, handle: CameraHandle, id: FeatureId) -> Option<Variant> {
        self.state
            .lock()
            .sessions
            .get(&handle)
            .and_then(|s| s.features.get(&id).cloned())
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether a frame transfer is running on `handle`.
    pub fn is_transfer_running(&self, handle: CameraHandle) -> bool {
        self.state
            .lock()
            .sessions
            .get(&handle)
            .is_some_and(|s| s.transfer.is_some())
    }

    // ---- device-originated activity ----------------------------------------

    /// Change a feature on the device side and notify the session.
    pub fn device_change_feature(&self, handle: CameraHandle, id: FeatureId, variant: Variant) {
        {
            let mut state = self.state.lock();
            if let Some(session) = state.sessions.get_mut(&handle) {
                session.features.insert(id, variant.clone());
            }
        }
        deliver(
            &self.state,
            handle,
            handle,
            &CameraEvent::FeatureChanged {
                tick: self.tick(),
                feature_id: id,
                variant,
            },
        );
    }

    /// Deliver an arbitrary event to the session's callback.
    pub fn inject_event(&self, handle: CameraHandle, event: CameraEvent) {
        deliver(&self.state, handle, handle, &event);
    }

    /// Deliver an event through `session`'s callback while claiming it came
    /// from `claimed_handle`.
    pub fn inject_event_as(
        &self,
        session: CameraHandle,
        claimed_handle: CameraHandle,
        event: CameraEvent,
    ) {
        deliver(&self.state, session, claimed_handle, &event);
    }

    fn tick(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    // ---- internals ----------------------------------------------------------

    fn start_transfer(&self, handle: CameraHandle, buffer_num: u32) -> SdkResult<()> {
        if !(IMAGE_BUFFER_NUM_MIN..=IMAGE_BUFFER_NUM_MAX).contains(&buffer_num) {
            return Err(ResultCode::InvalidArg);
        }

        let running = {
            let mut state = self.state.lock();
            let session = state.sessions.get_mut(&handle).ok_or(ResultCode::Handle)?;
            if session.transfer.is_some() {
                return Ok(());
            }
            let running = Arc::new(AtomicBool::new(true));
            session.transfer = Some(Transfer {
                running: running.clone(),
            });
            session.buffer_num = buffer_num;
            session.remained = 0;
            session.last_frame = None;
            running
        };

        let state = self.state.clone();
        let epoch = self.epoch;
        std::thread::Builder::new()
            .name("kscam-sim-clock".into())
            .spawn(move || frame_clock(state, handle, running, epoch))
            .map_err(|_| ResultCode::OutOfMemory)?;
        Ok(())
    }

    fn stop_transfer(&self, handle: CameraHandle) -> SdkResult<()> {
        let mut state = self.state.lock();
        let session = state.sessions.get_mut(&handle).ok_or(ResultCode::Handle)?;
        if let Some(transfer) = session.transfer.take() {
            transfer.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn soft_trigger(&self, handle: CameraHandle) -> SdkResult<()> {
        let (running, interval) = {
            let state = self.state.lock();
            let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
            let Some(transfer) = &session.transfer else {
                return Err(ResultCode::Unexpected);
            };
            (transfer.running.clone(), session.frame_interval())
        };

        let state = self.state.clone();
        let epoch = self.epoch;
        std::thread::Builder::new()
            .name("kscam-sim-trigger".into())
            .spawn(move || {
                std::thread::sleep(interval);
                if running.load(Ordering::SeqCst) {
                    emit_frame(&state, handle, epoch);
                }
            })
            .map_err(|_| ResultCode::OutOfMemory)?;
        Ok(())
    }

    /// Apply `changes` on the device and announce them from the SDK thread.
    fn announce_changes(&self, handle: CameraHandle, changes: Vec<(FeatureId, Variant)>) {
        if changes.is_empty() {
            return;
        }
        {
            let mut state = self.state.lock();
            if let Some(session) = state.sessions.get_mut(&handle) {
                for (id, variant) in &changes {
                    session.features.insert(*id, variant.clone());
                }
            }
        }
        let state = self.state.clone();
        let epoch = self.epoch;
        let _ = std::thread::Builder::new()
            .name("kscam-sim-event".into())
            .spawn(move || {
                for (feature_id, variant) in changes {
                    let event = CameraEvent::FeatureChanged {
                        tick: epoch.elapsed().as_millis() as u64,
                        feature_id,
                        variant,
                    };
                    deliver(&state, handle, handle, &event);
                }
            });
    }
}

fn device_info(index: u32, device_type: DeviceType) -> DeviceInfo {
    let model = match device_type {
        DeviceType::Ri2 | DeviceType::Ri2Simulator => "DS-Ri2",
        DeviceType::Qi2 | DeviceType::Qi2Simulator => "DS-Qi2",
        DeviceType::Unknown => "DS-Unknown",
    };
    let camera_name = if device_type.is_simulator() {
        format!("{} Simulator", model)
    } else {
        model.to_string()
    };
    DeviceInfo {
        index,
        camera_name,
        device_type,
        serial_no: 100_001 + index,
        fw_version: "1.10".into(),
        fpga_version: "2.03".into(),
        fx3_version: "1.05".into(),
        usb_version: "3.0".into(),
        driver_version: "1.2.0.0".into(),
    }
}

fn deliver(
    state: &Arc<Mutex<MockState>>,
    session: CameraHandle,
    claimed_handle: CameraHandle,
    event: &CameraEvent,
) {
    let target = state
        .lock()
        .sessions
        .get(&session)
        .and_then(|s| s.callback);
    if let Some((callback, context)) = target {
        callback(claimed_handle, event, context);
    }
}

fn emit_frame(state: &Arc<Mutex<MockState>>, handle: CameraHandle, epoch: Instant) {
    let event = {
        let mut guard = state.lock();
        if guard.failures.suppress_frames {
            return;
        }
        let Some(session) = guard.sessions.get_mut(&handle) else {
            return;
        };
        session.frame_no = session.frame_no.wrapping_add(1);
        session.last_frame = Some(session.frame_no);
        session.remained = (session.remained + 1).min(session.buffer_num);
        CameraEvent::ImageReceived {
            tick: epoch.elapsed().as_millis() as u64,
            frame_no: session.frame_no,
            remained: session.remained,
        }
    };
    deliver(state, handle, handle, &event);
}

fn frame_clock(
    state: Arc<Mutex<MockState>>,
    handle: CameraHandle,
    running: Arc<AtomicBool>,
    epoch: Instant,
) {
    loop {
        let (interval, free_running) = {
            let guard = state.lock();
            match guard.sessions.get(&handle) {
                Some(session) => (
                    session.frame_interval(),
                    session.trigger_mode() == TriggerMode::Off,
                ),
                None => return,
            }
        };
        std::thread::sleep(interval);
        if !running.load(Ordering::SeqCst) {
            return;
        }
        if free_running {
            emit_frame(&state, handle, epoch);
        }
    }
}

// =============================================================================
// Feature tables
// =============================================================================

fn uint_range(min: u32, max: u32, res: u32, def: u32) -> RangeDesc {
    RangeDesc {
        min: Variant::UInt32(min),
        max: Variant::UInt32(max),
        res: Variant::UInt32(res),
        def: Variant::UInt32(def),
    }
}

fn int_range(min: i32, max: i32, def: i32) -> RangeDesc {
    RangeDesc {
        min: Variant::Int32(min),
        max: Variant::Int32(max),
        res: Variant::Int32(1),
        def: Variant::Int32(def),
    }
}

fn exposure_bias_elements() -> Vec<ListElement> {
    (0u32..=12)
        .map(|value| {
            let ev = value as i32 - 6;
            ListElement {
                value,
                comment: if ev > 0 {
                    format!("+{}", ev)
                } else {
                    ev.to_string()
                },
            }
        })
        .collect()
}

fn capture_mode_elements() -> Vec<ListElement> {
    vec![
        ListElement {
            value: 0,
            comment: "Normal".into(),
        },
        ListElement {
            value: 1,
            comment: "HighSpeed".into(),
        },
    ]
}

/// Full sensor grid, in pixels of `mode`, that an ROI mode crops from.
fn roi_grid(mode: FormatMode) -> Option<(u32, u32)> {
    match mode {
        FormatMode::Roi2454x1632 => Some((SENSOR_WIDTH, SENSOR_HEIGHT)),
        FormatMode::AvgRoi818x544 => Some((SENSOR_WIDTH / 3, SENSOR_HEIGHT / 3)),
        FormatMode::Roi804x804 => Some((1608, 1608)),
        _ => None,
    }
}

fn position_desc(format: Format) -> PositionDesc {
    match (roi_grid(format.mode), format.mode.dimensions()) {
        (Some((gw, gh)), Some((w, h))) => PositionDesc {
            min: Position { x: 0, y: 0 },
            max: Position {
                x: gw - w,
                y: gh - h,
            },
        },
        // Non-ROI formats report a degenerate range.
        _ => PositionDesc {
            min: Position { x: 1, y: 1 },
            max: Position { x: 1, y: 1 },
        },
    }
}

fn area_desc(format: Format) -> AreaDesc {
    let (w, h) = format.mode.dimensions().unwrap_or((SENSOR_WIDTH, SENSOR_HEIGHT));
    AreaDesc {
        min: Area {
            left: 0,
            top: 0,
            width: METERING_MIN,
            height: METERING_MIN,
        },
        max: Area {
            left: w - METERING_MIN,
            top: h - METERING_MIN,
            width: w,
            height: h,
        },
    }
}

fn full_area(format: Format) -> Area {
    let (w, h) = format.mode.dimensions().unwrap_or((SENSOR_WIDTH, SENSOR_HEIGHT));
    Area {
        left: 0,
        top: 0,
        width: w,
        height: h,
    }
}

fn feature_ids(device_type: DeviceType) -> Vec<FeatureId> {
    let mut ids = vec![
        FeatureId::ExposureMode,
        FeatureId::ExposureBias,
        FeatureId::ExposureTime,
        FeatureId::Gain,
        FeatureId::MeteringMode,
        FeatureId::MeteringArea,
        FeatureId::ExposureTimeLimit,
        FeatureId::GainLimit,
        FeatureId::CaptureMode,
        FeatureId::Brightness,
    ];
    if device_type.is_color_capable() {
        ids.extend([
            FeatureId::Sharpness,
            FeatureId::Hue,
            FeatureId::Saturation,
            FeatureId::WhiteBalanceRed,
            FeatureId::WhiteBalanceBlue,
            FeatureId::Presets,
        ]);
    }
    ids.extend([
        FeatureId::TriggerOption,
        FeatureId::MultiExposureTime,
        FeatureId::SignalExposureEnd,
        FeatureId::SignalTriggerReady,
        FeatureId::SignalDeviceCapture,
        FeatureId::ExposureOutput,
        FeatureId::Format,
        FeatureId::RoiPosition,
        FeatureId::TriggerMode,
    ]);
    ids
}

fn default_format(device_type: DeviceType) -> Format {
    Format {
        color: if device_type.is_color_capable() {
            FormatColor::Rgb24
        } else {
            FormatColor::Mono16
        },
        mode: DEFAULT_MODE,
    }
}

fn default_value(id: FeatureId, format: Format) -> Variant {
    match id {
        FeatureId::ExposureMode => Variant::UInt32(ExposureMode::Manual.to_raw()),
        FeatureId::ExposureBias => Variant::UInt32(6),
        FeatureId::ExposureTime => Variant::UInt32(DEFAULT_EXPOSURE_US),
        FeatureId::Gain => Variant::UInt32(100),
        FeatureId::MeteringMode => Variant::UInt32(MeteringMode::Average.to_raw()),
        FeatureId::MeteringArea => Variant::Area(full_area(format)),
        FeatureId::ExposureTimeLimit => Variant::UInt32(1_000_000),
        FeatureId::GainLimit => Variant::UInt32(6400),
        FeatureId::CaptureMode => Variant::UInt32(0),
        FeatureId::Brightness
        | FeatureId::Sharpness
        | FeatureId::Hue
        | FeatureId::Saturation
        | FeatureId::WhiteBalanceRed
        | FeatureId::WhiteBalanceBlue => Variant::Int32(0),
        FeatureId::Presets => Variant::UInt32(Preset::Default.to_raw()),
        FeatureId::TriggerOption => Variant::TriggerOption(TriggerOption {
            frame_count: 1,
            delay_time: 0,
        }),
        FeatureId::MultiExposureTime => {
            let mut m = MultiExposureTime {
                num: 1,
                ..Default::default()
            };
            m.exposure_times[0] = DEFAULT_EXPOSURE_US;
            Variant::MultiExposureTime(m)
        }
        FeatureId::SignalExposureEnd
        | FeatureId::SignalTriggerReady
        | FeatureId::SignalDeviceCapture
        | FeatureId::ExposureOutput => Variant::UInt32(SignalOutput::Off.to_raw()),
        FeatureId::Format => Variant::Format(format),
        FeatureId::RoiPosition => Variant::Position(Position { x: 0, y: 0 }),
        FeatureId::TriggerMode => Variant::UInt32(TriggerMode::Off.to_raw()),
        FeatureId::OnePushWhiteBalance
        | FeatureId::OnePushSoftTrigger
        | FeatureId::OnePushTriggerCancel => Variant::Bool(false),
    }
}

fn descriptor(id: FeatureId, session: &Session) -> FeatureDesc {
    let format = session.format();
    match id {
        FeatureId::ExposureMode => FeatureDesc::ElementList(ExposureMode::elements()),
        FeatureId::ExposureBias => FeatureDesc::ElementList(exposure_bias_elements()),
        FeatureId::ExposureTime => {
            FeatureDesc::Range(uint_range(100, 120_000_000, 100, DEFAULT_EXPOSURE_US))
        }
        FeatureId::Gain => FeatureDesc::Range(uint_range(100, 6400, 1, 100)),
        FeatureId::MeteringMode => FeatureDesc::ElementList(MeteringMode::elements()),
        FeatureId::MeteringArea => FeatureDesc::Area(area_desc(format)),
        FeatureId::ExposureTimeLimit => {
            FeatureDesc::Range(uint_range(100, 120_000_000, 100, 1_000_000))
        }
        FeatureId::GainLimit => FeatureDesc::Range(uint_range(100, 6400, 1, 6400)),
        FeatureId::CaptureMode => FeatureDesc::ElementList(capture_mode_elements()),
        FeatureId::Brightness => FeatureDesc::Range(int_range(-50, 50, 0)),
        FeatureId::Sharpness => FeatureDesc::Range(int_range(-3, 5, 0)),
        FeatureId::Hue | FeatureId::Saturation => FeatureDesc::Range(int_range(-5, 5, 0)),
        FeatureId::WhiteBalanceRed | FeatureId::WhiteBalanceBlue => {
            FeatureDesc::Range(int_range(-30, 30, 0))
        }
        FeatureId::Presets => FeatureDesc::ElementList(Preset::elements()),
        FeatureId::TriggerOption => FeatureDesc::TriggerOption(TriggerOptionDesc {
            frame_count: uint_range(1, 255, 1, 1),
            delay_time: int_range(0, 10_000, 0),
        }),
        FeatureId::MultiExposureTime => {
            FeatureDesc::Range(uint_range(100, 120_000_000, 100, DEFAULT_EXPOSURE_US))
        }
        FeatureId::SignalExposureEnd
        | FeatureId::SignalTriggerReady
        | FeatureId::SignalDeviceCapture
        | FeatureId::ExposureOutput => FeatureDesc::ElementList(SignalOutput::elements()),
        FeatureId::Format => {
            FeatureDesc::FormatList(supported_formats(session.device_type.is_color_capable()))
        }
        FeatureId::RoiPosition => FeatureDesc::Position(position_desc(format)),
        FeatureId::TriggerMode => FeatureDesc::ElementList(TriggerMode::elements()),
        FeatureId::OnePushWhiteBalance
        | FeatureId::OnePushSoftTrigger
        | FeatureId::OnePushTriggerCancel => FeatureDesc::Unknown,
    }
}

fn in_range(desc: &RangeDesc, value: &Variant) -> bool {
    match (desc.bounds(), value.as_f64()) {
        (Some((min, max)), Some(v)) => v >= min && v <= max,
        _ => false,
    }
}

fn validate(desc: &FeatureDesc, current: &Variant, value: &Variant) -> bool {
    if current.kind() != value.kind() {
        return false;
    }
    match (desc, value) {
        (FeatureDesc::Range(range), Variant::MultiExposureTime(m)) => {
            m.num >= 1
                && (m.num as usize) <= m.exposure_times.len()
                && m.exposure_times[..m.num as usize]
                    .iter()
                    .all(|t| in_range(range, &Variant::UInt32(*t)))
        }
        (FeatureDesc::Range(range), v) => in_range(range, v),
        (FeatureDesc::ElementList(list), Variant::UInt32(v)) => {
            list.iter().any(|e| e.value == *v)
        }
        (FeatureDesc::FormatList(list), Variant::Format(f)) => {
            list.iter().any(|e| e.format == *f)
        }
        (FeatureDesc::Area(d), Variant::Area(a)) => {
            (d.min.left..=d.max.left).contains(&a.left)
                && (d.min.top..=d.max.top).contains(&a.top)
                && (d.min.width..=d.max.width).contains(&a.width)
                && (d.min.height..=d.max.height).contains(&a.height)
        }
        (FeatureDesc::Position(d), Variant::Position(p)) => {
            // Degenerate ranges accept any position; the device ignores it.
            d.min.x == d.max.x
                || ((d.min.x..=d.max.x).contains(&p.x) && (d.min.y..=d.max.y).contains(&p.y))
        }
        (FeatureDesc::TriggerOption(d), Variant::TriggerOption(t)) => {
            in_range(&d.frame_count, &Variant::UInt32(t.frame_count))
                && in_range(&d.delay_time, &Variant::Int32(t.delay_time))
        }
        _ => false,
    }
}

fn fill_frame(buffer: &mut [u8], frame_no: u32) {
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = pattern_byte(frame_no, i);
    }
}

// =============================================================================
// KsCamSdk
// =============================================================================

impl KsCamSdk for MockSdk {
    fn open_devices(&self) -> SdkResult<Vec<DeviceInfo>> {
        let mut state = self.state.lock();
        state.enumerated = true;
        Ok(state.devices.clone())
    }

    fn close_devices(&self) -> SdkResult<()> {
        self.state.lock().enumerated = false;
        Ok(())
    }

    fn open(&self, index: u32) -> SdkResult<CameraHandle> {
        let mut state = self.state.lock();
        if state.failures.open {
            return Err(ResultCode::AccessDenied);
        }
        if !state.enumerated {
            return Err(ResultCode::Unexpected);
        }
        let device_type = state
            .devices
            .get(index as usize)
            .map(|d| d.device_type)
            .ok_or(ResultCode::InvalidArg)?;
        if state.sessions.values().any(|s| s.device_index == index) {
            return Err(ResultCode::AccessDenied);
        }

        let format = default_format(device_type);
        let features = feature_ids(device_type)
            .into_iter()
            .map(|id| (id, default_value(id, format)))
            .collect();

        let handle = state.next_handle;
        state.next_handle += 1;
        state.sessions.insert(
            handle,
            Session {
                device_index: index,
                device_type,
                features,
                callback: None,
                transfer: None,
                buffer_num: 0,
                frame_no: 0,
                last_frame: None,
                remained: 0,
                frame_dropless: false,
            },
        );
        Ok(handle)
    }

    fn close(&self, handle: CameraHandle) -> SdkResult<()> {
        let mut state = self.state.lock();
        let session = state.sessions.remove(&handle).ok_or(ResultCode::Handle)?;
        if let Some(transfer) = session.transfer {
            transfer.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn get_all_features(&self, handle: CameraHandle) -> SdkResult<Vec<FeatureValue>> {
        let state = self.state.lock();
        let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
        if state.failures.empty_features {
            return Ok(Vec::new());
        }
        Ok(session
            .features
            .iter()
            .map(|(id, v)| FeatureValue::new(*id, v.clone()))
            .collect())
    }

    fn get_feature_desc(&self, handle: CameraHandle, id: FeatureId) -> SdkResult<FeatureDesc> {
        let state = self.state.lock();
        let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
        if state.failures.descriptor == Some(id) {
            return Err(ResultCode::Fail);
        }
        if !session.features.contains_key(&id) {
            return Err(ResultCode::InvalidArg);
        }
        Ok(descriptor(id, session))
    }

    fn set_features(&self, handle: CameraHandle, values: &[FeatureValue]) -> SdkResult<()> {
        let changes = {
            let mut state = self.state.lock();
            if state.failures.commits > 0 {
                state.failures.commits -= 1;
                return Err(ResultCode::Fail);
            }
            let session = state.sessions.get_mut(&handle).ok_or(ResultCode::Handle)?;

            for value in values {
                let current = session
                    .features
                    .get(&value.id)
                    .ok_or(ResultCode::InvalidArg)?;
                if !validate(&descriptor(value.id, session), current, &value.variant) {
                    return Err(ResultCode::InvalidArg);
                }
            }

            let old_format = session.format();
            for value in values {
                session.features.insert(value.id, value.variant.clone());
            }
            let new_format = session.format();
            state.commits += 1;

            // Format-dependent features follow a format change.
            let mut changes = Vec::new();
            if new_format != old_format {
                changes.push((FeatureId::MeteringArea, Variant::Area(full_area(new_format))));
                let pos = position_desc(new_format);
                changes.push((
                    FeatureId::RoiPosition,
                    Variant::Position(Position {
                        x: pos.min.x.min(pos.max.x),
                        y: pos.min.y.min(pos.max.y),
                    }),
                ));
            }
            changes
        };
        self.announce_changes(handle, changes);
        Ok(())
    }

    fn command(&self, handle: CameraHandle, command: &mut Command) -> SdkResult<()> {
        {
            let mut state = self.state.lock();
            if !state.sessions.contains_key(&handle) {
                return Err(ResultCode::Handle);
            }
            state.commands.push(command.name());
        }

        match command {
            Command::StartFrameTransfer { image_buffer_num } => {
                self.start_transfer(handle, *image_buffer_num)
            }
            Command::StopFrameTransfer => self.stop_transfer(handle),
            Command::OnePushSoftTrigger => self.soft_trigger(handle),
            Command::OnePushTriggerCancel => Ok(()),
            Command::OnePushAe => {
                let manual = {
                    let state = self.state.lock();
                    let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
                    ExposureMode::from_raw(session.u32_feature(FeatureId::ExposureMode))
                        == ExposureMode::Manual
                };
                if !manual {
                    return Err(ResultCode::Unexpected);
                }
                self.announce_changes(
                    handle,
                    vec![(
                        FeatureId::ExposureTime,
                        Variant::UInt32(ONE_PUSH_AE_EXPOSURE_US),
                    )],
                );
                Ok(())
            }
            Command::OnePushWhiteBalance => {
                let color = {
                    let state = self.state.lock();
                    let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
                    session.device_type.is_color_capable()
                };
                if !color {
                    return Err(ResultCode::NotImplemented);
                }
                self.announce_changes(
                    handle,
                    vec![
                        (FeatureId::WhiteBalanceRed, Variant::Int32(2)),
                        (FeatureId::WhiteBalanceBlue, Variant::Int32(-1)),
                    ],
                );
                Ok(())
            }
            Command::GetFrameSize(info) => {
                let state = self.state.lock();
                let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
                let format = session.format();
                let (w, h) = format.mode.dimensions().ok_or(ResultCode::Unexpected)?;
                let bpp = format.color.raw_bytes_per_pixel();
                *info = FrameSizeInfo {
                    // One extra row carries the image info block.
                    frame_size: w * (h + 1) * bpp,
                    frame_interval: session.frame_interval().as_micros() as u32,
                    rshutter_delay: h * 10,
                };
                Ok(())
            }
            Command::IsTransferStarted { started } => {
                let state = self.state.lock();
                let session = state.sessions.get(&handle).ok_or(ResultCode::Handle)?;
                *started = session.transfer.is_some();
                Ok(())
            }
            Command::FrameDropless { set, on_off } => {
                let mut state = self.state.lock();
                let session = state.sessions.get_mut(&handle).ok_or(ResultCode::Handle)?;
                if *set {
                    session.frame_dropless = *on_off;
                } else {
                    *on_off = session.frame_dropless;
                }
                Ok(())
            }
            Command::GetSdkVersion(version) => {
                *version = "1.1.0.0 (simulator)".to_string();
                Ok(())
            }
        }
    }

    fn get_image(
        &self,
        handle: CameraHandle,
        newest: bool,
        buffer: &mut [u8],
    ) -> SdkResult<ImageInfo> {
        let (frame_no, image_bytes, remained) = {
            let mut state = self.state.lock();
            if state.failures.get_image {
                return Err(ResultCode::Fail);
            }
            let session = state.sessions.get_mut(&handle).ok_or(ResultCode::Handle)?;
            let frame_no = session.last_frame.ok_or(ResultCode::Fail)?;
            let format = session.format();
            let (w, h) = format.mode.dimensions().ok_or(ResultCode::Unexpected)?;
            let image_bytes = (w * h * format.color.raw_bytes_per_pixel()) as usize;
            session.remained = if newest {
                0
            } else {
                session.remained.saturating_sub(1)
            };
            (frame_no, image_bytes, session.remained)
        };

        if buffer.len() < image_bytes {
            return Err(ResultCode::InvalidArg);
        }
        fill_frame(&mut buffer[..image_bytes], frame_no);
        let info_block = &mut buffer[image_bytes..];
        info_block.fill(0);
        let tag = frame_no.to_le_bytes();
        let n = tag.len().min(info_block.len());
        info_block[..n].copy_from_slice(&tag[..n]);

        Ok(ImageInfo {
            image_size: buffer.len() as u32,
            remained,
        })
    }

    fn set_event_callback(
        &self,
        handle: CameraHandle,
        callback: Option<EventCallback>,
        context: ContextToken,
    ) -> SdkResult<()> {
        let mut state = self.state.lock();
        let session = state.sessions.get_mut(&handle).ok_or(ResultCode::Handle)?;
        session.callback = callback.map(|cb| (cb, context));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_first(sdk: &MockSdk) -> CameraHandle {
        sdk.open_devices().unwrap();
        sdk.open(0).unwrap()
    }

    #[test]
    fn enumerates_simulators() {
        let sdk = MockSdk::new();
        let devices = sdk.open_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].camera_name, "DS-Ri2 Simulator");
        assert_eq!(devices[1].device_type, DeviceType::Qi2Simulator);
    }

    #[test]
    fn open_requires_enumeration_and_is_exclusive() {
        let sdk = MockSdk::new();
        assert_eq!(sdk.open(0), Err(ResultCode::Unexpected));
        let handle = open_first(&sdk);
        assert_eq!(sdk.open(0), Err(ResultCode::AccessDenied));
        sdk.close(handle).unwrap();
        assert_eq!(sdk.close(handle), Err(ResultCode::Handle));
    }

    #[test]
    fn qi2_lacks_color_features() {
        let sdk = MockSdk::new();
        sdk.open_devices().unwrap();
        let handle = sdk.open(1).unwrap();
        let ids: Vec<_> = sdk
            .get_all_features(handle)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert!(!ids.contains(&FeatureId::Hue));
        assert!(ids.contains(&FeatureId::Gain));
    }

    #[test]
    fn commit_validates_range_and_kind() {
        let sdk = MockSdk::new();
        let handle = open_first(&sdk);
        let bad = FeatureValue::new(FeatureId::Gain, Variant::UInt32(10_000));
        assert_eq!(sdk.set_features(handle, &[bad]), Err(ResultCode::InvalidArg));
        let wrong_kind = FeatureValue::new(FeatureId::Gain, Variant::Int32(200));
        assert_eq!(
            sdk.set_features(handle, &[wrong_kind]),
            Err(ResultCode::InvalidArg)
        );
        let good = FeatureValue::new(FeatureId::Gain, Variant::UInt32(800));
        sdk.set_features(handle, &[good]).unwrap();
        assert_eq!(
            sdk.device_value(handle, FeatureId::Gain),
            Some(Variant::UInt32(800))
        );
    }

    #[test]
    fn roi_descriptor_depends_on_format() {
        let sdk = MockSdk::new();
        let handle = open_first(&sdk);
        let FeatureDesc::Position(full) = sdk
            .get_feature_desc(handle, FeatureId::RoiPosition)
            .unwrap()
        else {
            panic!("position descriptor expected");
        };
        assert_eq!(full.min.x, full.max.x);

        let roi = Format {
            color: FormatColor::Rgb24,
            mode: FormatMode::AvgRoi818x544,
        };
        sdk.set_features(handle, &[FeatureValue::new(FeatureId::Format, Variant::Format(roi))])
            .unwrap();
        let FeatureDesc::Position(cropped) = sdk
            .get_feature_desc(handle, FeatureId::RoiPosition)
            .unwrap()
        else {
            panic!("position descriptor expected");
        };
        assert_eq!(cropped.max, Position { x: 818, y: 544 });
    }

    #[test]
    fn frame_size_includes_info_row() {
        let sdk = MockSdk::new();
        let handle = open_first(&sdk);
        let mut cmd = Command::GetFrameSize(FrameSizeInfo::default());
        sdk.command(handle, &mut cmd).unwrap();
        let Command::GetFrameSize(info) = cmd else {
            panic!("command changed shape");
        };
        assert_eq!(info.frame_size, 1636 * 1089 * 3);
        assert_eq!(sdk.command_log(), vec!["GetFrameSize"]);
    }

    #[test]
    fn get_image_requires_a_frame() {
        let sdk = MockSdk::new();
        let handle = open_first(&sdk);
        let mut buf = vec![0u8; 1636 * 1089 * 3];
        assert_eq!(sdk.get_image(handle, true, &mut buf), Err(ResultCode::Fail));
    }
}
