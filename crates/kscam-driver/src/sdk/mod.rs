//! KsCam SDK boundary
//!
//! Typed rendition of the vendor camera SDK: result codes, feature
//! identifiers, the feature value sum type, descriptors, commands, events and
//! device information. The [`KsCamSdk`] trait is the only way the driver talks
//! to a device; the `mock` feature provides a simulator implementation.
//!
//! All calls are synchronous and may block on USB transport. Async callers
//! must go through `spawn_blocking`.

#[cfg(feature = "mock")]
pub mod mock;

use kscam_core::CameraError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-session device handle.
pub type CameraHandle = u32;

/// Opaque value handed back to the event callback; locates the owning session.
pub type ContextToken = usize;

/// Result of an SDK call.
pub type SdkResult<T> = Result<T, ResultCode>;

/// Event callback registered per session.
///
/// Invoked from the SDK's own thread. Must not issue feature commits.
pub type EventCallback = fn(CameraHandle, &CameraEvent, ContextToken);

/// Maximum number of exposure entries in a multi-exposure program.
pub const MULTI_EXPOSURE_MAX: usize = 15;

/// Fewest transfer buffers the SDK accepts.
pub const IMAGE_BUFFER_NUM_MIN: u32 = 1;
/// Most transfer buffers the SDK accepts.
pub const IMAGE_BUFFER_NUM_MAX: u32 = 128;
/// Buffer count the SDK uses when none is given.
pub const IMAGE_BUFFER_NUM_DEFAULT: u32 = 5;

// =============================================================================
// Result codes
// =============================================================================

/// Nonzero SDK result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Unexpected failure (-1)
    Unexpected,
    /// Not implemented (-2)
    NotImplemented,
    /// Out of memory (-3)
    OutOfMemory,
    /// Invalid argument (-4)
    InvalidArg,
    /// No such interface (-5)
    NoInterface,
    /// Invalid pointer (-6)
    Pointer,
    /// Invalid handle (-7)
    Handle,
    /// Operation aborted (-8)
    Abort,
    /// Generic failure (-9)
    Fail,
    /// Access denied (-10)
    AccessDenied,
    /// Any other nonzero code
    Other(i32),
}

impl ResultCode {
    /// Interpret a raw code. Zero is success and yields `None`.
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => None,
            -1 => Some(ResultCode::Unexpected),
            -2 => Some(ResultCode::NotImplemented),
            -3 => Some(ResultCode::OutOfMemory),
            -4 => Some(ResultCode::InvalidArg),
            -5 => Some(ResultCode::NoInterface),
            -6 => Some(ResultCode::Pointer),
            -7 => Some(ResultCode::Handle),
            -8 => Some(ResultCode::Abort),
            -9 => Some(ResultCode::Fail),
            -10 => Some(ResultCode::AccessDenied),
            other => Some(ResultCode::Other(other)),
        }
    }

    /// Raw code.
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Unexpected => -1,
            ResultCode::NotImplemented => -2,
            ResultCode::OutOfMemory => -3,
            ResultCode::InvalidArg => -4,
            ResultCode::NoInterface => -5,
            ResultCode::Pointer => -6,
            ResultCode::Handle => -7,
            ResultCode::Abort => -8,
            ResultCode::Fail => -9,
            ResultCode::AccessDenied => -10,
            ResultCode::Other(code) => code,
        }
    }

    /// Symbolic name.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Unexpected => "Unexpected",
            ResultCode::NotImplemented => "NotImplemented",
            ResultCode::OutOfMemory => "OutOfMemory",
            ResultCode::InvalidArg => "InvalidArg",
            ResultCode::NoInterface => "NoInterface",
            ResultCode::Pointer => "Pointer",
            ResultCode::Handle => "Handle",
            ResultCode::Abort => "Abort",
            ResultCode::Fail => "Fail",
            ResultCode::AccessDenied => "AccessDenied",
            ResultCode::Other(_) => "Unknown",
        }
    }

    /// Convert into a `CameraError::Device` for `operation`.
    pub fn into_error(self, operation: &str) -> CameraError {
        CameraError::device(operation, self.code(), self.as_str())
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// Attach the failing operation name to an SDK result.
pub(crate) trait SdkResultExt<T> {
    fn op(self, operation: &str) -> Result<T, CameraError>;
}

impl<T> SdkResultExt<T> for SdkResult<T> {
    fn op(self, operation: &str) -> Result<T, CameraError> {
        self.map_err(|code| code.into_error(operation))
    }
}

// =============================================================================
// Feature identifiers
// =============================================================================

/// Stable integer keys of the device features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum FeatureId {
    /// Auto exposure mode (element list)
    ExposureMode = 1,
    /// Exposure compensation step (element list)
    ExposureBias = 2,
    /// Exposure time in microseconds
    ExposureTime = 3,
    /// Analog gain
    Gain = 4,
    /// Auto exposure metering mode
    MeteringMode = 5,
    /// Auto exposure metering area
    MeteringArea = 6,
    /// Upper bound for auto exposure, microseconds
    ExposureTimeLimit = 7,
    /// Upper bound for auto gain
    GainLimit = 8,
    /// Capture mode (element list)
    CaptureMode = 9,
    /// Brightness
    Brightness = 13,
    /// Sharpness (Ri2)
    Sharpness = 14,
    /// Hue (Ri2)
    Hue = 15,
    /// Saturation (Ri2)
    Saturation = 16,
    /// White balance red gain (Ri2)
    WhiteBalanceRed = 18,
    /// White balance blue gain (Ri2)
    WhiteBalanceBlue = 19,
    /// One-push white balance command (Ri2)
    OnePushWhiteBalance = 25,
    /// Color processing preset (Ri2)
    Presets = 26,
    /// Frames per trigger and trigger delay
    TriggerOption = 33,
    /// One-push software trigger command
    OnePushSoftTrigger = 34,
    /// Multi exposure program
    MultiExposureTime = 35,
    /// Exposure-end signal output
    SignalExposureEnd = 36,
    /// Trigger-ready signal output
    SignalTriggerReady = 37,
    /// Device-capture signal output
    SignalDeviceCapture = 38,
    /// Exposure output line
    ExposureOutput = 39,
    /// One-push trigger cancel command
    OnePushTriggerCancel = 40,
    /// Image format
    Format = 80,
    /// ROI position
    RoiPosition = 81,
    /// Trigger mode (element list)
    TriggerMode = 82,
}

impl FeatureId {
    /// Every known identifier.
    pub const ALL: [FeatureId; 28] = [
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
        FeatureId::Sharpness,
        FeatureId::Hue,
        FeatureId::Saturation,
        FeatureId::WhiteBalanceRed,
        FeatureId::WhiteBalanceBlue,
        FeatureId::OnePushWhiteBalance,
        FeatureId::Presets,
        FeatureId::TriggerOption,
        FeatureId::OnePushSoftTrigger,
        FeatureId::MultiExposureTime,
        FeatureId::SignalExposureEnd,
        FeatureId::SignalTriggerReady,
        FeatureId::SignalDeviceCapture,
        FeatureId::ExposureOutput,
        FeatureId::OnePushTriggerCancel,
        FeatureId::Format,
        FeatureId::RoiPosition,
        FeatureId::TriggerMode,
    ];

    /// Identifier for a raw key, if known.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.raw() == raw)
    }

    /// Raw key.
    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Readable feature name, also used as the host property name.
    pub fn name(self) -> &'static str {
        match self {
            FeatureId::ExposureMode => "ExposureMode",
            FeatureId::ExposureBias => "ExposureBias",
            FeatureId::ExposureTime => "ExposureTime",
            FeatureId::Gain => "Gain",
            FeatureId::MeteringMode => "MeteringMode",
            FeatureId::MeteringArea => "MeteringArea",
            FeatureId::ExposureTimeLimit => "ExposureTimeLimit",
            FeatureId::GainLimit => "GainLimit",
            FeatureId::CaptureMode => "CaptureMode",
            FeatureId::Brightness => "Brightness",
            FeatureId::Sharpness => "Sharpness",
            FeatureId::Hue => "Hue",
            FeatureId::Saturation => "Saturation",
            FeatureId::WhiteBalanceRed => "WhiteBalanceRed",
            FeatureId::WhiteBalanceBlue => "WhiteBalanceBlue",
            FeatureId::OnePushWhiteBalance => "OnePushWhiteBalance",
            FeatureId::Presets => "Presets",
            FeatureId::TriggerOption => "TriggerOption",
            FeatureId::OnePushSoftTrigger => "OnePushSoftTrigger",
            FeatureId::MultiExposureTime => "MultiExposureTime",
            FeatureId::SignalExposureEnd => "SignalExposureEnd",
            FeatureId::SignalTriggerReady => "SignalTriggerReady",
            FeatureId::SignalDeviceCapture => "SignalDeviceCapture",
            FeatureId::ExposureOutput => "ExposureOutput",
            FeatureId::OnePushTriggerCancel => "OnePushTriggerCancel",
            FeatureId::Format => "Format",
            FeatureId::RoiPosition => "RoiPosition",
            FeatureId::TriggerMode => "TriggerMode",
        }
    }
}

/// Name for a raw feature identifier; unknown identifiers map to "Unknown".
pub fn feature_name(raw: u32) -> &'static str {
    FeatureId::from_raw(raw).map_or("Unknown", FeatureId::name)
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Format
// =============================================================================

/// Pixel encoding reported by the format feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatColor {
    /// Not reported
    Unknown,
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed YUV 4:4:4
    Yuv444,
    /// 16-bit monochrome
    Mono16,
}

impl FormatColor {
    /// Decode a device value.
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => FormatColor::Rgb24,
            2 => FormatColor::Yuv444,
            3 => FormatColor::Mono16,
            _ => FormatColor::Unknown,
        }
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            FormatColor::Unknown => 0,
            FormatColor::Rgb24 => 1,
            FormatColor::Yuv444 => 2,
            FormatColor::Mono16 => 3,
        }
    }

    /// Bytes per pixel of the raw transfer.
    pub fn raw_bytes_per_pixel(self) -> u32 {
        match self {
            FormatColor::Rgb24 | FormatColor::Yuv444 => 3,
            FormatColor::Mono16 => 2,
            FormatColor::Unknown => 0,
        }
    }
}

/// Resolution mode reported by the format feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatMode {
    /// Not reported
    Unknown,
    /// Full 16M
    Full4908x3264,
    /// ROI
    Roi2454x1632,
    /// 1/3 average
    Avg1636x1088,
    /// 1/3 average and ROI
    AvgRoi818x544,
    /// Full
    Full1608x1608,
    /// ROI
    Roi804x804,
    /// 1/3 average
    Avg536x536,
}

impl FormatMode {
    /// Every known mode.
    pub const ALL: [FormatMode; 7] = [
        FormatMode::Full4908x3264,
        FormatMode::Roi2454x1632,
        FormatMode::Avg1636x1088,
        FormatMode::AvgRoi818x544,
        FormatMode::Full1608x1608,
        FormatMode::Roi804x804,
        FormatMode::Avg536x536,
    ];

    /// Decode a device value.
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => FormatMode::Full4908x3264,
            2 => FormatMode::Roi2454x1632,
            3 => FormatMode::Avg1636x1088,
            4 => FormatMode::AvgRoi818x544,
            5 => FormatMode::Full1608x1608,
            6 => FormatMode::Roi804x804,
            7 => FormatMode::Avg536x536,
            _ => FormatMode::Unknown,
        }
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            FormatMode::Unknown => 0,
            FormatMode::Full4908x3264 => 1,
            FormatMode::Roi2454x1632 => 2,
            FormatMode::Avg1636x1088 => 3,
            FormatMode::AvgRoi818x544 => 4,
            FormatMode::Full1608x1608 => 5,
            FormatMode::Roi804x804 => 6,
            FormatMode::Avg536x536 => 7,
        }
    }

    /// Fixed (width, height) of this mode. `None` for `Unknown`.
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            FormatMode::Unknown => None,
            FormatMode::Full4908x3264 => Some((4908, 3264)),
            FormatMode::Roi2454x1632 => Some((2454, 1632)),
            FormatMode::Avg1636x1088 => Some((1636, 1088)),
            FormatMode::AvgRoi818x544 => Some((818, 544)),
            FormatMode::Full1608x1608 => Some((1608, 1608)),
            FormatMode::Roi804x804 => Some((804, 804)),
            FormatMode::Avg536x536 => Some((536, 536)),
        }
    }

    /// Whether the mode crops the sensor (ROI position is movable).
    pub fn is_roi(self) -> bool {
        matches!(
            self,
            FormatMode::Roi2454x1632 | FormatMode::AvgRoi818x544 | FormatMode::Roi804x804
        )
    }
}

/// Image format: color encoding plus resolution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
    /// Pixel encoding
    pub color: FormatColor,
    /// Resolution mode
    pub mode: FormatMode,
}

// =============================================================================
// Feature values
// =============================================================================

/// Rectangle on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Area {
    /// Left edge
    pub left: u32,
    /// Top edge
    pub top: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// Point on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal offset
    pub x: u32,
    /// Vertical offset
    pub y: u32,
}

/// Trigger parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerOption {
    /// Frames captured per trigger
    pub frame_count: u32,
    /// Delay before exposure
    pub delay_time: i32,
}

/// Multi exposure program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultiExposureTime {
    /// Entries in use
    pub num: u32,
    /// Exposure time per entry, microseconds
    pub exposure_times: [u32; MULTI_EXPOSURE_MAX],
}

/// Discriminant of a [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantKind {
    /// `i32`
    Int32,
    /// `u32`
    UInt32,
    /// `i64`
    Int64,
    /// `u64`
    UInt64,
    /// `f64`
    Double,
    /// `bool`
    Bool,
    /// Wide string
    WStr,
    /// [`Area`]
    Area,
    /// [`Position`]
    Position,
    /// [`TriggerOption`]
    TriggerOption,
    /// [`MultiExposureTime`]
    MultiExposureTime,
    /// [`Format`]
    Format,
}

/// Payload of one feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    /// Signed 32-bit
    Int32(i32),
    /// Unsigned 32-bit
    UInt32(u32),
    /// Signed 64-bit
    Int64(i64),
    /// Unsigned 64-bit
    UInt64(u64),
    /// Double
    Double(f64),
    /// Boolean
    Bool(bool),
    /// Wide string
    WStr(String),
    /// Rectangle
    Area(Area),
    /// Point
    Position(Position),
    /// Trigger parameters
    TriggerOption(TriggerOption),
    /// Multi exposure program
    MultiExposureTime(MultiExposureTime),
    /// Image format
    Format(Format),
}

impl Variant {
    /// Discriminant of this payload.
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Int32(_) => VariantKind::Int32,
            Variant::UInt32(_) => VariantKind::UInt32,
            Variant::Int64(_) => VariantKind::Int64,
            Variant::UInt64(_) => VariantKind::UInt64,
            Variant::Double(_) => VariantKind::Double,
            Variant::Bool(_) => VariantKind::Bool,
            Variant::WStr(_) => VariantKind::WStr,
            Variant::Area(_) => VariantKind::Area,
            Variant::Position(_) => VariantKind::Position,
            Variant::TriggerOption(_) => VariantKind::TriggerOption,
            Variant::MultiExposureTime(_) => VariantKind::MultiExposureTime,
            Variant::Format(_) => VariantKind::Format,
        }
    }

    /// Scalar numeric payload as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Int32(v) => Some(f64::from(*v)),
            Variant::UInt32(v) => Some(f64::from(*v)),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Scalar integer payload as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Int32(v) => Some(i64::from(*v)),
            Variant::UInt32(v) => Some(i64::from(*v)),
            Variant::Int64(v) => Some(*v),
            Variant::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Unsigned scalar payload, converting non-negative `Int32`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Variant::UInt32(v) => Some(*v),
            Variant::Int32(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }
}

/// Current value of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureValue {
    /// Feature
    pub id: FeatureId,
    /// Payload
    pub variant: Variant,
}

impl FeatureValue {
    /// Pair a payload with its identifier.
    pub fn new(id: FeatureId, variant: Variant) -> Self {
        Self { id, variant }
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Numeric range with step and default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDesc {
    /// Lowest value
    pub min: Variant,
    /// Highest value
    pub max: Variant,
    /// Step
    pub res: Variant,
    /// Default
    pub def: Variant,
}

impl RangeDesc {
    /// (min, max) as floating point.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.min.as_f64().zip(self.max.as_f64())
    }
}

/// One entry of an enumerated list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListElement {
    /// Device value
    pub value: u32,
    /// Display string
    pub comment: String,
}

/// One selectable image format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatElement {
    /// Format value
    pub format: Format,
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Raw bits per pixel
    pub bits_per_pixel: u32,
    /// Display string
    pub comment: String,
}

/// Bounds of an area feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaDesc {
    /// Smallest rectangle
    pub min: Area,
    /// Largest rectangle
    pub max: Area,
}

/// Bounds of a position feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDesc {
    /// Smallest offsets
    pub min: Position,
    /// Largest offsets
    pub max: Position,
}

/// Bounds of the trigger option members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOptionDesc {
    /// Frame count range
    pub frame_count: RangeDesc,
    /// Delay range
    pub delay_time: RangeDesc,
}

/// Legal value space of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureDesc {
    /// No descriptor
    Unknown,
    /// Allowed signed values
    Int32List(Vec<i32>),
    /// Allowed floating values
    DoubleList(Vec<f64>),
    /// Enumerated values with comments
    ElementList(Vec<ListElement>),
    /// Numeric range
    Range(RangeDesc),
    /// Area bounds
    Area(AreaDesc),
    /// Position bounds
    Position(PositionDesc),
    /// Trigger option bounds
    TriggerOption(TriggerOptionDesc),
    /// Selectable image formats
    FormatList(Vec<FormatElement>),
}

impl FeatureDesc {
    /// Short name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FeatureDesc::Unknown => "unknown",
            FeatureDesc::Int32List(_) => "int32_list",
            FeatureDesc::DoubleList(_) => "double_list",
            FeatureDesc::ElementList(_) => "element_list",
            FeatureDesc::Range(_) => "range",
            FeatureDesc::Area(_) => "area",
            FeatureDesc::Position(_) => "position",
            FeatureDesc::TriggerOption(_) => "trigger_option",
            FeatureDesc::FormatList(_) => "format_list",
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Output of the get-frame-size command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSizeInfo {
    /// Raw frame size in bytes, including the appended info block
    pub frame_size: u32,
    /// Frame interval in microseconds
    pub frame_interval: u32,
    /// Rolling shutter delay in microseconds
    pub rshutter_delay: u32,
}

/// A device command with its in/out parameter block.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Run auto exposure once; the result arrives as a feature event
    OnePushAe,
    /// Run white balance once (color bodies only)
    OnePushWhiteBalance,
    /// Fire a software trigger
    OnePushSoftTrigger,
    /// Cancel a pending trigger
    OnePushTriggerCancel,
    /// Query raw frame size and timing
    GetFrameSize(FrameSizeInfo),
    /// Start streaming into driver-side buffers
    StartFrameTransfer {
        /// Buffers to allocate
        image_buffer_num: u32,
    },
    /// Stop streaming
    StopFrameTransfer,
    /// Query whether streaming is active
    IsTransferStarted {
        /// Filled in by the device
        started: bool,
    },
    /// Read or change the dropless transfer setting
    FrameDropless {
        /// Write `on_off` instead of reading it
        set: bool,
        /// Dropless enabled
        on_off: bool,
    },
    /// Query the SDK version string
    GetSdkVersion(String),
}

impl Command {
    /// SDK command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::OnePushAe => "OnePushAE",
            Command::OnePushWhiteBalance => "OnePushWhitebalance",
            Command::OnePushSoftTrigger => "OnePushSoftTrigger",
            Command::OnePushTriggerCancel => "OnePushTriggerCancel",
            Command::GetFrameSize(_) => "GetFrameSize",
            Command::StartFrameTransfer { .. } => "StartFrameTransfer",
            Command::StopFrameTransfer => "StopFrameTransfer",
            Command::IsTransferStarted { .. } => "IsTransferStarted",
            Command::FrameDropless { .. } => "FrameDropless",
            Command::GetSdkVersion(_) => "GetSdkVersion",
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Bus reset phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusResetCode {
    /// Reset began
    Happened,
    /// Device came back
    Restored,
    /// Device did not come back
    Failed,
}

impl BusResetCode {
    /// Decode a device value.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(BusResetCode::Happened),
            2 => Some(BusResetCode::Restored),
            3 => Some(BusResetCode::Failed),
            _ => None,
        }
    }
}

/// Asynchronous notification from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    /// A frame is ready to be pulled
    ImageReceived {
        /// Device tick count
        tick: u64,
        /// Device frame number
        frame_no: u32,
        /// Frames still queued
        remained: u32,
    },
    /// The device changed a feature value on its own
    FeatureChanged {
        /// Device tick count
        tick: u64,
        /// Feature that changed
        feature_id: FeatureId,
        /// New value
        variant: Variant,
    },
    /// Exposure finished
    ExposureEnd {
        /// Device tick count
        tick: u64,
    },
    /// Ready for the next trigger
    TriggerReady {
        /// Device tick count
        tick: u64,
    },
    /// Capture started on the device
    DeviceCapture {
        /// Device tick count
        tick: u64,
    },
    /// Auto exposure settled
    AeStay {
        /// Device tick count
        tick: u64,
    },
    /// Auto exposure adjusting
    AeRunning {
        /// Device tick count
        tick: u64,
    },
    /// Auto exposure off
    AeDisable {
        /// Device tick count
        tick: u64,
    },
    /// USB transfer failure
    TransError {
        /// Device tick count
        tick: u64,
        /// USB stack error
        usb_error: u32,
        /// Driver error
        driver_error: u32,
        /// Bytes received
        received_size: u32,
        /// Bytes expected
        setting_size: u32,
    },
    /// USB bus reset
    BusReset {
        /// Reset phase
        code: BusResetCode,
        /// Queued images were discarded
        image_cleared: bool,
    },
}

// =============================================================================
// Devices
// =============================================================================

/// Camera model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Unrecognized model
    Unknown,
    /// DS-Ri2 (color)
    Ri2,
    /// DS-Ri2 simulator
    Ri2Simulator,
    /// DS-Qi2 (mono)
    Qi2,
    /// DS-Qi2 simulator
    Qi2Simulator,
}

impl DeviceType {
    /// Ri2 bodies carry the color-processing feature set.
    pub fn is_color_capable(self) -> bool {
        matches!(self, DeviceType::Ri2 | DeviceType::Ri2Simulator)
    }

    /// Simulated device.
    pub fn is_simulator(self) -> bool {
        matches!(self, DeviceType::Ri2Simulator | DeviceType::Qi2Simulator)
    }

    /// Display name.
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Unknown => "Unknown",
            DeviceType::Ri2 => "Ri2",
            DeviceType::Ri2Simulator => "Ri2 Simulator",
            DeviceType::Qi2 => "Qi2",
            DeviceType::Qi2Simulator => "Qi2 Simulator",
        }
    }
}

/// Static metadata of one enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Position in the enumeration
    pub index: u32,
    /// Model name
    pub camera_name: String,
    /// Model variant
    pub device_type: DeviceType,
    /// Serial number
    pub serial_no: u32,
    /// Firmware version
    pub fw_version: String,
    /// FPGA version
    pub fpga_version: String,
    /// FX3 version
    pub fx3_version: String,
    /// USB version
    pub usb_version: String,
    /// Driver version
    pub driver_version: String,
}

/// Metadata returned with a retrieved image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Bytes written into the caller's buffer
    pub image_size: u32,
    /// Images still queued in the driver
    pub remained: u32,
}

// =============================================================================
// SDK trait
// =============================================================================

/// Vendor SDK entry points.
///
/// Every method is synchronous. Implementations must deliver events on
/// their own thread and never while holding a lock the driver could need.
pub trait KsCamSdk: Send + Sync {
    /// Enumerate connected devices (and simulators).
    fn open_devices(&self) -> SdkResult<Vec<DeviceInfo>>;

    /// Release the enumeration.
    fn close_devices(&self) -> SdkResult<()>;

    /// Open the device at `index` of the last enumeration.
    fn open(&self, index: u32) -> SdkResult<CameraHandle>;

    /// Close a session opened by [`open`](Self::open).
    fn close(&self, handle: CameraHandle) -> SdkResult<()>;

    /// Bulk query of every feature value.
    fn get_all_features(&self, handle: CameraHandle) -> SdkResult<Vec<FeatureValue>>;

    /// Descriptor for one feature.
    fn get_feature_desc(&self, handle: CameraHandle, id: FeatureId) -> SdkResult<FeatureDesc>;

    /// Bulk commit.
    fn set_features(&self, handle: CameraHandle, values: &[FeatureValue]) -> SdkResult<()>;

    /// Issue a command; output fields of `command` are filled in place.
    fn command(&self, handle: CameraHandle, command: &mut Command) -> SdkResult<()>;

    /// Copy the newest (or oldest) queued image into `buffer`.
    fn get_image(&self, handle: CameraHandle, newest: bool, buffer: &mut [u8])
        -> SdkResult<ImageInfo>;

    /// Register the single event callback of a session. `None` unregisters.
    fn set_event_callback(
        &self,
        handle: CameraHandle,
        callback: Option<EventCallback>,
        context: ContextToken,
    ) -> SdkResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_map_both_ways() {
        assert_eq!(ResultCode::from_raw(0), None);
        for raw in -10..=-1 {
            let code = ResultCode::from_raw(raw).unwrap();
            assert_eq!(code.code(), raw);
            assert_ne!(code.as_str(), "Unknown");
        }
        assert_eq!(ResultCode::from_raw(-42), Some(ResultCode::Other(-42)));

        let err = ResultCode::Fail.into_error("SetFeatures");
        assert_eq!(err, CameraError::device("SetFeatures", -9, "Fail"));
    }

    #[test]
    fn feature_names() {
        assert_eq!(feature_name(3), "ExposureTime");
        assert_eq!(feature_name(82), "TriggerMode");
        assert_eq!(feature_name(12), "Unknown");
        for id in FeatureId::ALL {
            assert_eq!(FeatureId::from_raw(id.raw()), Some(id));
        }
    }

    #[test]
    fn format_mode_dimensions() {
        assert_eq!(FormatMode::from_raw(1).dimensions(), Some((4908, 3264)));
        assert_eq!(FormatMode::from_raw(7).dimensions(), Some((536, 536)));
        assert_eq!(FormatMode::from_raw(0).dimensions(), None);
        for mode in FormatMode::ALL {
            assert_eq!(FormatMode::from_raw(mode.to_raw()), mode);
        }
    }

    #[test]
    fn variant_accessors() {
        assert_eq!(Variant::UInt32(5).as_f64(), Some(5.0));
        assert_eq!(Variant::Int32(-3).as_i64(), Some(-3));
        assert_eq!(Variant::Int32(-3).as_u32(), None);
        assert_eq!(Variant::Bool(true).as_f64(), None);
        assert_eq!(Variant::Area(Area::default()).kind(), VariantKind::Area);
    }
}
