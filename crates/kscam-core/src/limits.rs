//! Shared hard limits to prevent unbounded allocations.
//!
//! This module centralizes:
//! - Frame size limits for the conversion and copy-out paths
//! - Default wait margins for the frame-ready signal

use crate::error::CameraError;
use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Safety margin added to the exposure time when waiting for a snapshot.
pub const SNAP_TIMEOUT_MARGIN: Duration = Duration::from_millis(100);

/// Safety margin added to the exposure time when waiting inside a sequence.
pub const STREAM_TIMEOUT_MARGIN: Duration = Duration::from_millis(300);

// =============================================================================
// Size Limits
// =============================================================================

/// Largest raw frame the sensor can deliver: 4908 x (3264 + 1) x 3 bytes.
///
/// The extra row holds the image info block appended by the device.
pub const MAX_RAW_FRAME_BYTES: usize = 4908 * (3264 + 1) * 3;

/// Maximum allowed output frame payload in bytes (100MB).
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 65_536;

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// `width * height`
    pub pixels: usize,
    /// `width * height * bytes_per_pixel`
    pub bytes: usize,
}

/// Validate frame dimensions and calculate pixel/byte sizes safely.
pub fn validate_frame_size(
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<FrameSize, CameraError> {
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(CameraError::FrameDimensionsTooLarge {
            width,
            height,
            max_dimension: MAX_FRAME_DIMENSION,
        });
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or(CameraError::SizeOverflow {
            context: "frame pixel count",
        })?;

    let bytes = pixels
        .checked_mul(bytes_per_pixel)
        .ok_or(CameraError::SizeOverflow {
            context: "frame byte size",
        })?;

    if bytes > MAX_FRAME_BYTES {
        return Err(CameraError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    Ok(FrameSize { pixels, bytes })
}
