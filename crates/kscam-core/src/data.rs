//! Pixel buffers and delivered frames.
//!
//! [`ImageBuffer`] is the controller-owned, resizable output buffer. It is
//! reshaped whenever the image format changes and overwritten on every grab.
//! [`Frame`] is the owned copy handed to a consumer; the sink never sees the
//! controller's buffer itself.

use crate::error::CameraResult;
use crate::limits::validate_frame_size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resizable 2D byte buffer owned by the acquisition controller.
#[derive(Debug, Clone, Default)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixels: Vec<u8>,
}

impl ImageBuffer {
    /// Create an empty buffer. Call [`resize`](Self::resize) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reshape the buffer, zero-filling its contents.
    pub fn resize(&mut self, width: u32, height: u32, bytes_per_pixel: u32) -> CameraResult<()> {
        let size = validate_frame_size(width, height, bytes_per_pixel as usize)?;
        self.width = width;
        self.height = height;
        self.bytes_per_pixel = bytes_per_pixel;
        self.pixels.clear();
        self.pixels.resize(size.bytes, 0);
        Ok(())
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Total size in bytes (`width * height * bytes_per_pixel`).
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// True before the first [`resize`](Self::resize).
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Pixel bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel bytes, row-major.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Copy the buffer into an owned [`Frame`].
    pub fn to_frame(&self, frame_number: u64, components: u32, bit_depth: u32) -> Frame {
        Frame {
            width: self.width,
            height: self.height,
            bytes_per_pixel: self.bytes_per_pixel,
            components,
            bit_depth,
            data: self.pixels.clone(),
            frame_number,
            timestamp: Utc::now(),
        }
    }
}

/// A single captured image, owned by whoever received it.
///
/// # Storage
/// - Color formats: 4 bytes per pixel, B/G/R plus a zero fourth byte.
/// - Mono16: 2 bytes per pixel, as delivered by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bytes per pixel (4 for color, 2 for mono)
    pub bytes_per_pixel: u32,

    /// Channels per pixel (4 for color, 1 for mono)
    pub components: u32,

    /// Bits per component (8 or 16)
    pub bit_depth: u32,

    /// Raw pixel data
    pub data: Vec<u8>,

    /// Monotonically increasing sequence counter
    pub frame_number: u64,

    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Bytes belonging to the pixel at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.bytes_per_pixel as usize;
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        self.data.get(start..start + bpp)
    }

    /// More than one channel per pixel.
    pub fn is_color(&self) -> bool {
        self.components > 1
    }
}

/// Metadata attached to each frame delivered during a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Label of the camera that produced the frame
    #[serde(rename = "Camera")]
    pub camera_label: String,

    /// Wall-clock time the sequence started
    #[serde(rename = "StartTime")]
    pub start_time: DateTime<Utc>,

    /// Milliseconds since the sequence started
    #[serde(rename = "ElapsedTime-ms")]
    pub elapsed_ms: f64,

    /// Zero-based index of the image within the sequence
    #[serde(rename = "ImageNumber")]
    pub image_number: u64,
}

impl FrameMetadata {
    /// Serialize to the JSON blob handed to the consumer.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_zero_fills() {
        let mut buf = ImageBuffer::new();
        buf.resize(4, 2, 4).unwrap();
        assert_eq!(buf.len(), 32);
        assert!(buf.pixels().iter().all(|&b| b == 0));

        buf.pixels_mut()[0] = 7;
        buf.resize(2, 2, 2).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.pixels()[0], 0);
    }

    #[test]
    fn to_frame_copies_pixels() {
        let mut buf = ImageBuffer::new();
        buf.resize(2, 1, 4).unwrap();
        buf.pixels_mut().copy_from_slice(&[1, 2, 3, 0, 4, 5, 6, 0]);

        let frame = buf.to_frame(3, 4, 8);
        buf.pixels_mut()[0] = 99;

        assert_eq!(frame.frame_number, 3);
        assert_eq!(frame.pixel(1, 0), Some(&[4u8, 5, 6, 0][..]));
        assert_eq!(frame.pixel(0, 0), Some(&[1u8, 2, 3, 0][..]));
        assert_eq!(frame.pixel(2, 0), None);
        assert!(frame.is_color());
    }

    #[test]
    fn metadata_uses_host_keys() {
        let md = FrameMetadata {
            camera_label: "KsCam".into(),
            start_time: Utc::now(),
            elapsed_ms: 12.5,
            image_number: 4,
        };
        let json = md.serialize();
        assert!(json.contains("\"Camera\":\"KsCam\""));
        assert!(json.contains("\"ImageNumber\":4"));
        assert!(json.contains("ElapsedTime-ms"));
    }
}
