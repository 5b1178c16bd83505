//! KsCam Feature Enumerations
//!
//! Typed views of the enumerated features, the image geometry derived from
//! the active format, and the exposure quantization rule.
//!
//! The enumerated features reach the host as strings taken from the device's
//! descriptor comments. These enums name the raw values the driver itself
//! needs to reason about (trigger mode for snapshots and sequences, the
//! one-push AE sentinel, presets) and give the simulator its element lists.

use kscam_core::{CameraError, CameraResult};

use crate::sdk::{Format, FormatColor, FormatElement, FormatMode, ListElement};

/// Comment of the exposure-mode entry that only the device may select.
pub const ONE_PUSH_AE_COMMENT: &str = "OnePushAE";

/// Full sensor size, identical on Ri2 and Qi2.
pub const SENSOR_WIDTH: u32 = 4908;
/// Full sensor height.
pub const SENSOR_HEIGHT: u32 = 3264;

/// Letters naming the color components, in channel order.
pub const COMPONENT_NAMES: &str = "RGBA";

// =============================================================================
// Exposure mode
// =============================================================================

/// Auto-exposure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    /// Exposure follows the scene
    ContinuousAe,
    /// Device-driven only; run through the one-push AE command
    OnePushAe,
    /// Exposure set by the host
    Manual,
    /// Multiple exposure times per frame
    MultiExposureTime,
}

impl ExposureMode {
    /// Every mode, in device order.
    pub const ALL: [ExposureMode; 4] = [
        ExposureMode::ContinuousAe,
        ExposureMode::OnePushAe,
        ExposureMode::Manual,
        ExposureMode::MultiExposureTime,
    ];

    /// Decode a device value. Unknown values map to `Manual`.
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => ExposureMode::ContinuousAe,
            1 => ExposureMode::OnePushAe,
            3 => ExposureMode::MultiExposureTime,
            _ => ExposureMode::Manual,
        }
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            ExposureMode::ContinuousAe => 0,
            ExposureMode::OnePushAe => 1,
            ExposureMode::Manual => 2,
            ExposureMode::MultiExposureTime => 3,
        }
    }

    /// Comment as reported in the descriptor list.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureMode::ContinuousAe => "ContinuousAE",
            ExposureMode::OnePushAe => ONE_PUSH_AE_COMMENT,
            ExposureMode::Manual => "Manual",
            ExposureMode::MultiExposureTime => "MultiExposureTime",
        }
    }

    /// Values the host may select.
    pub fn all_choices() -> Vec<String> {
        Self::ALL
            .iter()
            .filter(|m| **m != ExposureMode::OnePushAe)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Element list as the device describes it.
    pub fn elements() -> Vec<ListElement> {
        elements(Self::ALL.iter().map(|m| (m.to_raw(), m.as_str())))
    }
}

// =============================================================================
// Metering mode
// =============================================================================

/// Region used for auto exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeteringMode {
    /// Whole-area average
    Average,
    /// Brightest spot
    Peak,
}

impl MeteringMode {
    /// Decode a device value.
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => MeteringMode::Peak,
            _ => MeteringMode::Average,
        }
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            MeteringMode::Average => 0,
            MeteringMode::Peak => 1,
        }
    }

    /// Descriptor comment.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeteringMode::Average => "Average",
            MeteringMode::Peak => "Peak",
        }
    }

    /// Descriptor element list.
    pub fn elements() -> Vec<ListElement> {
        elements(
            [MeteringMode::Average, MeteringMode::Peak]
                .iter()
                .map(|m| (m.to_raw(), m.as_str())),
        )
    }
}

// =============================================================================
// Presets (Ri2 only)
// =============================================================================

/// Color processing presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// No processing
    Default,
    /// Industry, wafer / IC
    IndustryWaferIc,
    /// Industry, metal
    IndustryMetal,
    /// Industry, circuit board
    IndustryCircuitBoard,
    /// Industry, flat panel
    IndustryFpd,
    /// Bio, bright field
    BioBrightField,
    /// Bio, H-E stain
    BioHe,
    /// Bio, elastica stain
    BioEla,
    /// Bio, LED bright field
    BioLedBrightField,
    /// Other, asbestos
    OtherAsbestos,
}

impl Preset {
    /// Every preset, in device order.
    pub const ALL: [Preset; 10] = [
        Preset::Default,
        Preset::IndustryWaferIc,
        Preset::IndustryMetal,
        Preset::IndustryCircuitBoard,
        Preset::IndustryFpd,
        Preset::BioBrightField,
        Preset::BioHe,
        Preset::BioEla,
        Preset::BioLedBrightField,
        Preset::OtherAsbestos,
    ];

    /// Decode a device value; `None` for values outside the list.
    pub fn from_raw(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.to_raw() == value)
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            Preset::Default => 0,
            Preset::IndustryWaferIc => 16,
            Preset::IndustryMetal => 17,
            Preset::IndustryCircuitBoard => 18,
            Preset::IndustryFpd => 19,
            Preset::BioBrightField => 32,
            Preset::BioHe => 33,
            Preset::BioEla => 34,
            Preset::BioLedBrightField => 48,
            Preset::OtherAsbestos => 64,
        }
    }

    /// Descriptor comment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Default => "Default",
            Preset::IndustryWaferIc => "Industry_WaferIc",
            Preset::IndustryMetal => "Industry_Metal",
            Preset::IndustryCircuitBoard => "Industry_CircuitBoard",
            Preset::IndustryFpd => "Industry_Fpd",
            Preset::BioBrightField => "Bio_BrightField",
            Preset::BioHe => "Bio_He",
            Preset::BioEla => "Bio_Ela",
            Preset::BioLedBrightField => "BioLed_BrightField",
            Preset::OtherAsbestos => "Other_Asbestos",
        }
    }

    /// Descriptor element list.
    pub fn elements() -> Vec<ListElement> {
        elements(Self::ALL.iter().map(|p| (p.to_raw(), p.as_str())))
    }
}

// =============================================================================
// Signal outputs
// =============================================================================

/// Setting of the signal output lines (exposure end, trigger ready, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutput {
    /// Line disabled
    Off,
    /// Line driven
    Output,
    /// Keep the last level
    Last,
}

impl SignalOutput {
    /// Decode a device value. Unknown values map to `Off`.
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => SignalOutput::Output,
            2 => SignalOutput::Last,
            _ => SignalOutput::Off,
        }
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            SignalOutput::Off => 0,
            SignalOutput::Output => 1,
            SignalOutput::Last => 2,
        }
    }

    /// Descriptor comment.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalOutput::Off => "Off",
            SignalOutput::Output => "Output",
            SignalOutput::Last => "Last",
        }
    }

    /// Descriptor element list.
    pub fn elements() -> Vec<ListElement> {
        elements(
            [SignalOutput::Off, SignalOutput::Output, SignalOutput::Last]
                .iter()
                .map(|s| (s.to_raw(), s.as_str())),
        )
    }
}

// =============================================================================
// Trigger mode
// =============================================================================

/// Trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Free running
    Off,
    /// External trigger input
    Hard,
    /// Software trigger command
    Soft,
    /// Reported by the device, not offered by applications
    Both,
}

impl TriggerMode {
    /// Decode a device value. Unknown values map to `Off`.
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => TriggerMode::Hard,
            2 => TriggerMode::Soft,
            3 => TriggerMode::Both,
            _ => TriggerMode::Off,
        }
    }

    /// Device value.
    pub fn to_raw(self) -> u32 {
        match self {
            TriggerMode::Off => 0,
            TriggerMode::Hard => 1,
            TriggerMode::Soft => 2,
            TriggerMode::Both => 3,
        }
    }

    /// Descriptor comment.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Off => "OFF",
            TriggerMode::Hard => "Hard",
            TriggerMode::Soft => "Soft",
            TriggerMode::Both => "Both",
        }
    }

    /// Descriptor element list.
    pub fn elements() -> Vec<ListElement> {
        elements(
            [TriggerMode::Off, TriggerMode::Hard, TriggerMode::Soft]
                .iter()
                .map(|t| (t.to_raw(), t.as_str())),
        )
    }
}

fn elements<'a>(entries: impl Iterator<Item = (u32, &'a str)>) -> Vec<ListElement> {
    entries
        .map(|(value, comment)| ListElement {
            value,
            comment: comment.to_string(),
        })
        .collect()
}

// =============================================================================
// Image geometry
// =============================================================================

/// Output buffer layout implied by the active format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    /// Pixels per row
    pub width: u32,
    /// Rows
    pub height: u32,
    /// Channels per output pixel
    pub components: u32,
    /// Bytes per output pixel
    pub bytes_per_pixel: u32,
    /// Bits per channel
    pub bit_depth: u32,
    /// Color (BGRA) output
    pub color: bool,
}

impl ImageGeometry {
    /// Geometry for `format`.
    ///
    /// Color encodings expand to 4 bytes per pixel; Mono16 stays 2.
    pub fn from_format(format: Format) -> CameraResult<Self> {
        let (components, bytes_per_pixel, bit_depth, color) = match format.color {
            FormatColor::Rgb24 | FormatColor::Yuv444 => (4, 4, 8, true),
            FormatColor::Mono16 => (1, 2, 16, false),
            FormatColor::Unknown => {
                return Err(CameraError::InvalidFrame("unknown image type".into()))
            }
        };
        let (width, height) = format
            .mode
            .dimensions()
            .ok_or_else(|| CameraError::InvalidFrame("unknown image resolution".into()))?;

        Ok(Self {
            width,
            height,
            components,
            bytes_per_pixel,
            bit_depth,
            color,
        })
    }

    /// Bytes of one raw device frame (3 bytes per pixel for color, 2 for mono).
    pub fn raw_frame_bytes(&self) -> usize {
        let raw_bpp = if self.color { 3 } else { 2 };
        self.width as usize * self.height as usize * raw_bpp
    }
}

impl Default for ImageGeometry {
    /// Full sensor in 8-bit mono layout, used before a format is known.
    fn default() -> Self {
        Self {
            width: SENSOR_WIDTH,
            height: SENSOR_HEIGHT,
            components: 1,
            bytes_per_pixel: 1,
            bit_depth: 8,
            color: false,
        }
    }
}

/// Format list entry with its display comment, e.g. "4908x3264 RGB 24".
pub fn format_element(format: Format) -> Option<FormatElement> {
    let (width, height) = format.mode.dimensions()?;
    let (label, bits) = match format.color {
        FormatColor::Rgb24 => ("RGB", 24),
        FormatColor::Yuv444 => ("YUV", 24),
        FormatColor::Mono16 => ("Mono", 16),
        FormatColor::Unknown => return None,
    };
    Some(FormatElement {
        format,
        width,
        height,
        bits_per_pixel: bits,
        comment: format!("{}x{} {} {}", width, height, label, bits),
    })
}

/// Every format a device of the given color capability offers.
pub fn supported_formats(color_capable: bool) -> Vec<FormatElement> {
    let colors: &[FormatColor] = if color_capable {
        &[FormatColor::Rgb24, FormatColor::Mono16]
    } else {
        &[FormatColor::Mono16]
    };
    colors
        .iter()
        .flat_map(|&color| {
            FormatMode::ALL
                .iter()
                .filter_map(move |&mode| format_element(Format { color, mode }))
        })
        .collect()
}

// =============================================================================
// Exposure quantization
// =============================================================================

/// Quantize an exposure time in microseconds to a settable step.
///
/// - 6+ digits: floor to 10^(digits - 3)
/// - 3 to 5 digits: floor to 100
/// - fewer: 100
pub fn adjust_exposure_time(us: u32) -> u32 {
    let digits = us.checked_ilog10().map_or(1, |d| d + 1);
    if digits >= 6 {
        let step = 10u32.pow(digits - 3);
        us / step * step
    } else if digits >= 3 {
        us / 100 * 100
    } else {
        100
    }
}

/// Exposure in milliseconds to quantized microseconds.
pub fn exposure_ms_to_us(ms: f64) -> u32 {
    let raw = (ms * 1000.0 + 0.5).clamp(0.0, f64::from(u32::MAX));
    adjust_exposure_time(raw as u32)
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn exposure_quantization() {
        assert_eq!(adjust_exposure_time(123_456), 123_000);
        assert_eq!(adjust_exposure_time(4321), 4300);
        assert_eq!(adjust_exposure_time(42), 100);
        assert_eq!(adjust_exposure_time(0), 100);
        assert_eq!(adjust_exposure_time(100), 100);
        assert_eq!(adjust_exposure_time(99_999), 99_900);
        assert_eq!(adjust_exposure_time(120_000_000), 120_000_000);
        assert_eq!(adjust_exposure_time(12_345_678), 12_300_000);
    }

    #[test]
    fn exposure_ms_rounds_then_quantizes() {
        assert_eq!(exposure_ms_to_us(10.0), 10_000);
        assert_eq!(exposure_ms_to_us(123.4567), 123_000);
        assert_eq!(exposure_ms_to_us(0.0421), 100);
        assert_eq!(exposure_ms_to_us(-5.0), 100);
    }

    #[test]
    fn exposure_mode_choices_exclude_sentinel() {
        let choices = ExposureMode::all_choices();
        assert_eq!(choices, vec!["ContinuousAE", "Manual", "MultiExposureTime"]);
        assert_eq!(ExposureMode::elements().len(), 4);
        assert_eq!(ExposureMode::from_raw(1).as_str(), ONE_PUSH_AE_COMMENT);
    }

    #[test]
    fn enum_raw_values() {
        assert_eq!(TriggerMode::from_raw(2), TriggerMode::Soft);
        assert_eq!(TriggerMode::Off.as_str(), "OFF");
        assert_eq!(SignalOutput::from_raw(2), SignalOutput::Last);
        assert_eq!(MeteringMode::Peak.to_raw(), 1);
        assert_eq!(Preset::from_raw(48), Some(Preset::BioLedBrightField));
        assert_eq!(Preset::from_raw(20), None);
    }

    #[test]
    fn geometry_from_format() {
        let color = ImageGeometry::from_format(Format {
            color: FormatColor::Rgb24,
            mode: FormatMode::Full4908x3264,
        })
        .unwrap();
        assert_eq!((color.width, color.height), (4908, 3264));
        assert_eq!((color.components, color.bytes_per_pixel, color.bit_depth), (4, 4, 8));
        assert!(color.color);

        let mono = ImageGeometry::from_format(Format {
            color: FormatColor::Mono16,
            mode: FormatMode::Avg536x536,
        })
        .unwrap();
        assert_eq!((mono.width, mono.height), (536, 536));
        assert_eq!((mono.components, mono.bytes_per_pixel, mono.bit_depth), (1, 2, 16));
        assert_eq!(mono.raw_frame_bytes(), 536 * 536 * 2);

        assert!(ImageGeometry::from_format(Format {
            color: FormatColor::Unknown,
            mode: FormatMode::Avg536x536,
        })
        .is_err());
    }

    #[test]
    fn format_comments() {
        let formats = supported_formats(true);
        assert_eq!(formats.len(), 14);
        assert_eq!(formats[0].comment, "4908x3264 RGB 24");
        assert_eq!(supported_formats(false).len(), 7);
        assert!(supported_formats(false)
            .iter()
            .all(|f| f.format.color == FormatColor::Mono16));
    }
}
