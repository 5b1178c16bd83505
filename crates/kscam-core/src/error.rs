//! Error types for the KsCam driver.
//!
//! `CameraError` is the single error type returned by the synchronous core:
//! feature catalog, property model, acquisition controller and sink. The async
//! capability traits wrap it in `anyhow::Error`.
//!
//! ## Error Hierarchy
//!
//! - **`Device`**: the vendor SDK returned a nonzero result code. Carries the
//!   operation that failed and the raw code so callers can log it verbatim.
//! - **`Timeout`**: the frame-ready wait expired. The acquisition paths treat
//!   this as "no frame this cycle" rather than a fault.
//! - **`Unsupported`**: the request is outside what the hardware can do
//!   (arbitrary ROI placement, binning other than 1).
//! - **`BufferOverflow`**: the consumer sink is full.
//! - **Property errors** (`UnknownProperty`, `ReadOnlyProperty`, `InvalidValue`,
//!   `OutOfRange`, `InvalidChoice`): a host write was rejected before it
//!   reached the device.
//! - **Frame sizing errors** (`FrameDimensionsTooLarge`, `SizeOverflow`,
//!   `FrameTooLarge`, `InvalidFrame`): buffer geometry checks.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Coarse classification of a driver failure, used for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening the device or building its state
    Initialization,
    /// Invalid or unloadable settings
    Configuration,
    /// SDK transport problems
    Communication,
    /// Closing the device
    Shutdown,
    /// Nonzero result code from the device
    Hardware,
    /// Frame wait expired
    Timeout,
    /// Request rejected before reaching the device
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// A classified driver failure with the driver name attached.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error
    pub driver_type: String,
    /// Classification
    pub kind: DriverErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DriverError {
    /// Build a classified error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the camera error type.
pub type CameraResult<T> = std::result::Result<T, CameraError>;

/// Primary error type for the KsCam driver.
///
/// # Error Categories
///
/// 1. **Device Errors** - `Device`, `Initialization`, `NotInitialized`
///    - Originate from the vendor SDK or from session lifecycle
///    - Initialization failures are fatal for the device instance
///    - Commit failures are followed by a full resynchronization
///
/// 2. **Acquisition Errors** - `Timeout`, `Busy`, `BufferOverflow`
///    - Occur while capturing
///    - Timeouts degrade to a missed frame, never a process abort
///
/// 3. **Request Errors** - `Unsupported`, property errors, frame sizing errors
///    - Reported synchronously to the caller as rejected requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    /// The vendor SDK returned a nonzero result code.
    ///
    /// `operation` names the SDK entry point (e.g. `"SetFeatures"`),
    /// `code` is the raw result code and `message` its description.
    #[error("Device error in {operation}: {message} (code {code})")]
    Device {
        /// SDK entry point that failed
        operation: String,
        /// Raw result code
        code: i32,
        /// Description of the code
        message: String,
    },

    /// The frame-ready signal did not arrive in time.
    #[error("Timed out after {0:?} waiting for frame")]
    Timeout(Duration),

    /// Request is outside the hardware's capability.
    ///
    /// **Error Type**: Permanent - the operation will never succeed on this device.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Consumer sink rejected a frame because it is full.
    #[error("Frame buffer overflow")]
    BufferOverflow,

    /// A sequence acquisition is already running.
    #[error("Camera is busy acquiring")]
    Busy,

    /// The device session is not open.
    #[error("Camera is not initialized")]
    NotInitialized,

    /// Opening the device or building the initial feature catalog failed.
    ///
    /// **Error Type**: Fatal for this instance - the device never becomes usable.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// No property with this name is registered.
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// Write to a read-only property.
    #[error("Property '{0}' is read-only")]
    ReadOnlyProperty(String),

    /// Value could not be interpreted as the property's kind.
    #[error("Invalid value '{value}' for property '{name}'")]
    InvalidValue {
        /// Property (or feature) name
        name: String,
        /// Rejected value as text
        value: String,
    },

    /// Numeric value outside the property's limits.
    #[error("Value {value} for property '{name}' is outside [{min}, {max}]")]
    OutOfRange {
        /// Property name
        name: String,
        /// Rejected value
        value: f64,
        /// Lower limit
        min: f64,
        /// Upper limit
        max: f64,
    },

    /// String value not in the property's allowed set.
    #[error("Value '{value}' is not an allowed value for property '{name}'")]
    InvalidChoice {
        /// Property name
        name: String,
        /// Rejected value
        value: String,
    },

    /// The device did not report a feature the driver relies on.
    #[error("Feature {0} is not present in the catalog")]
    UnknownFeature(u32),

    /// Width or height above [`MAX_FRAME_DIMENSION`](crate::limits::MAX_FRAME_DIMENSION).
    #[error("Frame dimensions too large: {width}x{height} (max dimension {max_dimension})")]
    FrameDimensionsTooLarge {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Largest accepted dimension
        max_dimension: u32,
    },

    /// Buffer size arithmetic overflowed.
    #[error("Size calculation overflow: {context}")]
    SizeOverflow {
        /// Which product overflowed
        context: &'static str,
    },

    /// Frame byte size above the configured cap.
    #[error("Frame too large: {bytes} bytes (max {max_bytes})")]
    FrameTooLarge {
        /// Requested size
        bytes: usize,
        /// Cap
        max_bytes: usize,
    },

    /// A source buffer is shorter than its declared geometry.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Semantic configuration problem.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Classified driver failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl CameraError {
    /// Build a `Device` error from an SDK operation name and raw result code.
    pub fn device(operation: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        CameraError::Device {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Classify this error for logging.
    pub fn kind(&self) -> DriverErrorKind {
        match self {
            CameraError::Device { .. } => DriverErrorKind::Hardware,
            CameraError::Timeout(_) => DriverErrorKind::Timeout,
            CameraError::Initialization(_) | CameraError::NotInitialized => {
                DriverErrorKind::Initialization
            }
            CameraError::Configuration(_) => DriverErrorKind::Configuration,
            CameraError::Unsupported(_)
            | CameraError::UnknownProperty(_)
            | CameraError::ReadOnlyProperty(_)
            | CameraError::InvalidValue { .. }
            | CameraError::OutOfRange { .. }
            | CameraError::InvalidChoice { .. } => DriverErrorKind::InvalidParameter,
            CameraError::Driver(e) => e.kind,
            _ => DriverErrorKind::Unknown,
        }
    }
}
