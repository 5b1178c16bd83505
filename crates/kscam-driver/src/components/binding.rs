//! Property Binding Layer
//!
//! Generates the host-visible properties from the feature catalog.
//!
//! | Descriptor              | Host property                                  |
//! |-------------------------|------------------------------------------------|
//! | Range (exposure)        | Float, milliseconds, quantized on set          |
//! | Range (uint32 / int32)  | Integer bounded by the raw device range        |
//! | Element list            | String, legal values are the entry comments    |
//! | Format list             | String; a change recomputes geometry and       |
//! |                         | refreshes ROI and metering bounds              |
//! | Area / Position         | One Integer per member                         |
//! | Trigger option          | Frame count and delay as two Integers          |
//!
//! Every reader goes back to the catalog, which the event dispatcher keeps
//! current, so a get never returns a stale host-side copy. Every writer
//! updates the catalogued value and commits it.

use std::sync::Arc;

use kscam_core::{
    CameraError, CameraResult, Property, PropertyKind, PropertySet, PropertyValue,
};

use crate::components::acquisition::Acquisition;
use crate::components::catalog::FeatureCatalog;
use crate::components::features::{exposure_ms_to_us, ONE_PUSH_AE_COMMENT};
use crate::sdk::{
    AreaDesc, DeviceInfo, FeatureDesc, FeatureId, PositionDesc, RangeDesc, Variant,
};

/// Camera model name.
pub const CAMERA_NAME: &str = "CameraName";
/// Device serial number
pub const SERIAL_NUMBER: &str = "Serial Number";
/// Firmware version
pub const FW_VERSION: &str = "FW Version";
/// FPGA version
pub const FPGA_VERSION: &str = "FPGA Version";
/// FX3 version
pub const FX3_VERSION: &str = "FX3 Version";
/// USB version
pub const USB_VERSION: &str = "USB Version";
/// Driver version
pub const DRIVER_VERSION: &str = "Driver Version";
/// Binning factor; only "1" exists.
pub const BINNING: &str = "Binning";

/// Host name of the exposure-time feature.
pub const EXPOSURE: &str = "Exposure";

/// ROI horizontal offset
pub const ROI_POSITION_X: &str = "ROI Position X";
/// ROI vertical offset
pub const ROI_POSITION_Y: &str = "ROI Position Y";
/// Metering area left edge
pub const METERING_AREA_LEFT: &str = "Metering Area Left";
/// Metering area top edge
pub const METERING_AREA_TOP: &str = "Metering Area Top";
/// Metering area width
pub const METERING_AREA_WIDTH: &str = "Metering Area Width";
/// Metering area height
pub const METERING_AREA_HEIGHT: &str = "Metering Area Height";
/// Frames captured per trigger
pub const TRIGGER_FRAME_COUNT: &str = "Trigger Frame Count";
/// Delay between trigger and exposure
pub const TRIGGER_FRAME_DELAY: &str = "Trigger Frame Delay";

/// Features only Ri2 bodies carry.
const RI2_ONLY: [FeatureId; 6] = [
    FeatureId::Sharpness,
    FeatureId::Hue,
    FeatureId::Saturation,
    FeatureId::WhiteBalanceRed,
    FeatureId::WhiteBalanceBlue,
    FeatureId::Presets,
];

/// Host property name of a feature.
pub fn property_name(id: FeatureId) -> &'static str {
    match id {
        FeatureId::ExposureTime => EXPOSURE,
        other => other.name(),
    }
}

/// Names to mark dirty when `id` changes: the feature's own name plus, for
/// composite features, the member properties it is split into.
pub fn property_names(id: FeatureId) -> Vec<&'static str> {
    let mut names = vec![property_name(id)];
    match id {
        FeatureId::RoiPosition => names.extend([ROI_POSITION_X, ROI_POSITION_Y]),
        FeatureId::MeteringArea => names.extend([
            METERING_AREA_LEFT,
            METERING_AREA_TOP,
            METERING_AREA_WIDTH,
            METERING_AREA_HEIGHT,
        ]),
        FeatureId::TriggerOption => names.extend([TRIGGER_FRAME_COUNT, TRIGGER_FRAME_DELAY]),
        _ => {}
    }
    names
}

/// Shared state the property hooks reach into.
#[derive(Clone)]
pub struct BindingContext {
    /// Feature table of the session
    pub catalog: Arc<FeatureCatalog>,
    /// Controller that recomputes geometry after format changes
    pub acquisition: Arc<Acquisition>,
    /// Source of the read-only info properties
    pub device: DeviceInfo,
}

/// Populate `set` with the info properties and one property (or member
/// group) per bindable catalog entry.
pub fn bind_properties(ctx: &BindingContext, set: &PropertySet) -> CameraResult<()> {
    bind_info(&ctx.device, set);
    set.register(
        Property::new(BINNING, PropertyKind::Integer, PropertyValue::Integer(1))
            .with_allowed_values(vec!["1".into()]),
    );

    let roi = match ctx.catalog.descriptor(FeatureId::RoiPosition) {
        Ok(FeatureDesc::Position(desc)) => Some(position_properties(ctx, &desc)?),
        _ => None,
    };
    let metering = match ctx.catalog.descriptor(FeatureId::MeteringArea) {
        Ok(FeatureDesc::Area(desc)) => Some(area_properties(ctx, &desc)?),
        _ => None,
    };
    for prop in roi.iter().flatten().chain(metering.iter().flatten()) {
        set.register(prop.clone());
    }

    let color_capable = ctx.device.device_type.is_color_capable();
    for id in ctx.catalog.ids() {
        if RI2_ONLY.contains(&id) && !color_capable {
            continue;
        }
        let entry = ctx.catalog.entry(id)?;
        match (&entry.descriptor, &entry.value) {
            (FeatureDesc::Range(range), Variant::UInt32(_))
                if matches!(id, FeatureId::ExposureTime | FeatureId::ExposureTimeLimit) =>
            {
                set.register(exposure_property(ctx, id, range));
            }
            (FeatureDesc::Range(range), Variant::UInt32(_) | Variant::Int32(_)) => {
                set.register(integer_property(ctx, id, range));
            }
            (FeatureDesc::ElementList(_), Variant::UInt32(_)) => {
                set.register(list_property(ctx, id)?);
            }
            (FeatureDesc::FormatList(_), Variant::Format(_)) => {
                set.register(format_property(ctx, roi.clone(), metering.clone())?);
            }
            (FeatureDesc::TriggerOption(desc), Variant::TriggerOption(_)) => {
                for prop in trigger_option_properties(ctx, &desc.frame_count, &desc.delay_time) {
                    set.register(prop);
                }
            }
            // Registered above.
            (FeatureDesc::Position(_), _) | (FeatureDesc::Area(_), _) => {}
            (desc, value) => {
                tracing::debug!(
                    feature = %id,
                    descriptor = desc.kind_name(),
                    value = ?value.kind(),
                    "feature not exposed as a property"
                );
            }
        }
    }

    tracing::debug!(properties = set.len(), "properties bound");
    Ok(())
}

fn bind_info(device: &DeviceInfo, set: &PropertySet) {
    for (name, value) in [
        (CAMERA_NAME, device.camera_name.clone()),
        (SERIAL_NUMBER, device.serial_no.to_string()),
        (FW_VERSION, device.fw_version.clone()),
        (FPGA_VERSION, device.fpga_version.clone()),
        (FX3_VERSION, device.fx3_version.clone()),
        (USB_VERSION, device.usb_version.clone()),
        (DRIVER_VERSION, device.driver_version.clone()),
    ] {
        set.register(Property::constant(name, value));
    }
}

// =============================================================================
// Value helpers
// =============================================================================

fn invalid(name: &str, value: impl ToString) -> CameraError {
    CameraError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn int_arg<T: TryFrom<i64>>(name: &str, value: &PropertyValue) -> CameraResult<T> {
    value
        .as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| invalid(name, value))
}

fn read_scalar(catalog: &FeatureCatalog, id: FeatureId) -> CameraResult<PropertyValue> {
    let value = catalog.value(id)?;
    value
        .as_i64()
        .map(PropertyValue::Integer)
        .ok_or_else(|| invalid(id.name(), format!("{:?}", value)))
}

fn range_bounds(range: &RangeDesc) -> Option<(f64, f64)> {
    range.bounds()
}

// =============================================================================
// Scalars
// =============================================================================

/// Exposure-like feature in milliseconds over a microsecond device value.
fn exposure_property(ctx: &BindingContext, id: FeatureId, range: &RangeDesc) -> Property {
    let name = property_name(id);
    let mut prop = Property::new(name, PropertyKind::Float, PropertyValue::Float(0.0))
        .with_unit("ms");
    if let Some((min, max)) = range_bounds(range) {
        prop.set_limits(min / 1000.0, max / 1000.0);
    }

    let reader_catalog = ctx.catalog.clone();
    let writer_catalog = ctx.catalog.clone();
    prop.connect_to_hardware(
        move |value| {
            let ms = value.as_f64().ok_or_else(|| invalid(name, value))?;
            let us = exposure_ms_to_us(ms);
            writer_catalog.update(id, |v| match v {
                Variant::UInt32(current) => {
                    *current = us;
                    Ok(())
                }
                other => Err(invalid(name, format!("{:?}", other))),
            })
        },
        move || {
            let us = reader_catalog.u32_value(id)?;
            Ok(PropertyValue::Float(f64::from(us) / 1000.0))
        },
    );
    prop
}

/// Integer range feature. The value's discriminant picks the single
/// conversion branch.
fn integer_property(ctx: &BindingContext, id: FeatureId, range: &RangeDesc) -> Property {
    let name = property_name(id);
    let mut prop = Property::new(name, PropertyKind::Integer, PropertyValue::Integer(0));
    if let Some((min, max)) = range_bounds(range) {
        prop.set_limits(min, max);
    }

    let reader_catalog = ctx.catalog.clone();
    let writer_catalog = ctx.catalog.clone();
    prop.connect_to_hardware(
        move |value| {
            writer_catalog.update(id, |v| match v {
                Variant::UInt32(current) => {
                    *current = int_arg(name, value)?;
                    Ok(())
                }
                Variant::Int32(current) => {
                    *current = int_arg(name, value)?;
                    Ok(())
                }
                other => Err(invalid(name, format!("{:?}", other))),
            })
        },
        move || read_scalar(&reader_catalog, id),
    );
    prop
}

// =============================================================================
// Enumerations
// =============================================================================

/// Comments of an element list, without the device-only AE sentinel.
pub fn allowed_comments(desc: &FeatureDesc) -> Vec<String> {
    match desc {
        FeatureDesc::ElementList(list) => list
            .iter()
            .filter(|e| e.comment != ONE_PUSH_AE_COMMENT)
            .map(|e| e.comment.clone())
            .collect(),
        FeatureDesc::FormatList(list) => list.iter().map(|e| e.comment.clone()).collect(),
        _ => Vec::new(),
    }
}

fn read_comment(catalog: &FeatureCatalog, id: FeatureId) -> CameraResult<PropertyValue> {
    catalog
        .selected_comment(id)?
        .map(PropertyValue::String)
        .ok_or_else(|| invalid(id.name(), format!("{:?}", catalog.value(id).ok())))
}

fn list_property(ctx: &BindingContext, id: FeatureId) -> CameraResult<Property> {
    let name = property_name(id);
    let mut prop = Property::new(name, PropertyKind::String, PropertyValue::String(String::new()))
        .with_allowed_values(allowed_comments(&ctx.catalog.descriptor(id)?));

    let reader_catalog = ctx.catalog.clone();
    let writer = ctx.clone();
    prop.connect_to_hardware(
        move |value| {
            let comment = value.as_str().ok_or_else(|| invalid(name, value))?;
            let raw = match writer.catalog.descriptor(id)? {
                FeatureDesc::ElementList(list) => list
                    .iter()
                    .find(|e| e.comment == comment)
                    .map(|e| e.value)
                    .ok_or_else(|| CameraError::InvalidChoice {
                        name: name.to_string(),
                        value: comment.to_string(),
                    })?,
                _ => return Err(invalid(name, comment)),
            };
            writer.catalog.update(id, |v| match v {
                Variant::UInt32(current) => {
                    *current = raw;
                    Ok(())
                }
                other => Err(invalid(name, format!("{:?}", other))),
            })?;
            writer.acquisition.update_image_settings()?;
            Ok(())
        },
        move || read_comment(&reader_catalog, id),
    );
    Ok(prop)
}

fn format_property(
    ctx: &BindingContext,
    roi: Option<[Property; 2]>,
    metering: Option<[Property; 4]>,
) -> CameraResult<Property> {
    let id = FeatureId::Format;
    let name = property_name(id);
    let mut prop = Property::new(name, PropertyKind::String, PropertyValue::String(String::new()))
        .with_allowed_values(allowed_comments(&ctx.catalog.descriptor(id)?));

    let reader_catalog = ctx.catalog.clone();
    let writer = ctx.clone();
    prop.connect_to_hardware(
        move |value| {
            let comment = value.as_str().ok_or_else(|| invalid(name, value))?;
            let format = match writer.catalog.descriptor(id)? {
                FeatureDesc::FormatList(list) => list
                    .iter()
                    .find(|e| e.comment == comment)
                    .map(|e| e.format)
                    .ok_or_else(|| CameraError::InvalidChoice {
                        name: name.to_string(),
                        value: comment.to_string(),
                    })?,
                _ => return Err(invalid(name, comment)),
            };
            writer.catalog.update(id, |v| match v {
                Variant::Format(current) => {
                    *current = format;
                    Ok(())
                }
                other => Err(invalid(name, format!("{:?}", other))),
            })?;
            let geometry = writer.acquisition.update_image_settings()?;

            // Area and position bounds depend on the format.
            writer.catalog.fetch_all()?;
            writer.catalog.fetch_descriptors()?;
            if let (Some(props), Ok(FeatureDesc::Position(desc))) =
                (&roi, writer.catalog.descriptor(FeatureId::RoiPosition))
            {
                set_roi_limits(&desc, props);
            }
            if let (Some(props), Ok(FeatureDesc::Area(desc))) =
                (&metering, writer.catalog.descriptor(FeatureId::MeteringArea))
            {
                set_area_limits(&desc, props);
            }
            tracing::info!(
                format = comment,
                width = geometry.width,
                height = geometry.height,
                "image format changed"
            );
            Ok(())
        },
        move || read_comment(&reader_catalog, id),
    );
    Ok(prop)
}

// =============================================================================
// Composite members
// =============================================================================

/// ROI X/Y bounds. A degenerate descriptor (non-ROI format) yields [0, 1].
pub fn set_roi_limits(desc: &PositionDesc, props: &[Property; 2]) {
    let [x, y] = props;
    if desc.min.x == desc.max.x {
        x.set_limits(0.0, 1.0);
        y.set_limits(0.0, 1.0);
    } else {
        x.set_limits(f64::from(desc.min.x), f64::from(desc.max.x));
        y.set_limits(f64::from(desc.min.y), f64::from(desc.max.y));
    }
}

/// Bound the four metering area properties from the area descriptor.
pub fn set_area_limits(desc: &AreaDesc, props: &[Property; 4]) {
    let [left, top, width, height] = props;
    left.set_limits(f64::from(desc.min.left), f64::from(desc.max.left));
    top.set_limits(f64::from(desc.min.top), f64::from(desc.max.top));
    width.set_limits(f64::from(desc.min.width), f64::from(desc.max.width));
    height.set_limits(f64::from(desc.min.height), f64::from(desc.max.height));
}

/// Integer property over one `u32` member of a composite feature.
fn member_property<R, W>(
    ctx: &BindingContext,
    id: FeatureId,
    name: &'static str,
    read: R,
    write: W,
) -> Property
where
    R: Fn(&Variant) -> Option<i64> + Send + Sync + 'static,
    W: Fn(&mut Variant, i64) -> Option<()> + Send + Sync + 'static,
{
    let mut prop = Property::new(name, PropertyKind::Integer, PropertyValue::Integer(0));
    let reader_catalog = ctx.catalog.clone();
    let writer_catalog = ctx.catalog.clone();
    prop.connect_to_hardware(
        move |value| {
            let v = int_arg::<i64>(name, value)?;
            writer_catalog.update(id, |current| {
                write(current, v).ok_or_else(|| invalid(name, v))
            })
        },
        move || {
            let value = reader_catalog.value(id)?;
            read(&value)
                .map(PropertyValue::Integer)
                .ok_or_else(|| invalid(name, format!("{:?}", value)))
        },
    );
    prop
}

fn position_properties(ctx: &BindingContext, desc: &PositionDesc) -> CameraResult<[Property; 2]> {
    let id = FeatureId::RoiPosition;
    let props = [
        member_property(
            ctx,
            id,
            ROI_POSITION_X,
            |v| match v {
                Variant::Position(p) => Some(i64::from(p.x)),
                _ => None,
            },
            |v, n| match v {
                Variant::Position(p) => {
                    p.x = u32::try_from(n).ok()?;
                    Some(())
                }
                _ => None,
            },
        ),
        member_property(
            ctx,
            id,
            ROI_POSITION_Y,
            |v| match v {
                Variant::Position(p) => Some(i64::from(p.y)),
                _ => None,
            },
            |v, n| match v {
                Variant::Position(p) => {
                    p.y = u32::try_from(n).ok()?;
                    Some(())
                }
                _ => None,
            },
        ),
    ];
    set_roi_limits(desc, &props);
    Ok(props)
}

fn area_member(
    ctx: &BindingContext,
    name: &'static str,
    get: fn(&crate::sdk::Area) -> u32,
    set: fn(&mut crate::sdk::Area, u32),
) -> Property {
    member_property(
        ctx,
        FeatureId::MeteringArea,
        name,
        move |v| match v {
            Variant::Area(a) => Some(i64::from(get(a))),
            _ => None,
        },
        move |v, n| match v {
            Variant::Area(a) => {
                set(a, u32::try_from(n).ok()?);
                Some(())
            }
            _ => None,
        },
    )
}

fn area_properties(ctx: &BindingContext, desc: &AreaDesc) -> CameraResult<[Property; 4]> {
    let props = [
        area_member(ctx, METERING_AREA_LEFT, |a| a.left, |a, n| a.left = n),
        area_member(ctx, METERING_AREA_TOP, |a| a.top, |a, n| a.top = n),
        area_member(ctx, METERING_AREA_WIDTH, |a| a.width, |a, n| a.width = n),
        area_member(ctx, METERING_AREA_HEIGHT, |a| a.height, |a, n| a.height = n),
    ];
    set_area_limits(desc, &props);
    Ok(props)
}

fn trigger_option_properties(
    ctx: &BindingContext,
    frame_count: &RangeDesc,
    delay_time: &RangeDesc,
) -> [Property; 2] {
    let id = FeatureId::TriggerOption;
    let count = member_property(
        ctx,
        id,
        TRIGGER_FRAME_COUNT,
        |v| match v {
            Variant::TriggerOption(t) => Some(i64::from(t.frame_count)),
            _ => None,
        },
        |v, n| match v {
            Variant::TriggerOption(t) => {
                t.frame_count = u32::try_from(n).ok()?;
                Some(())
            }
            _ => None,
        },
    );
    let delay = member_property(
        ctx,
        id,
        TRIGGER_FRAME_DELAY,
        |v| match v {
            Variant::TriggerOption(t) => Some(i64::from(t.delay_time)),
            _ => None,
        },
        |v, n| match v {
            Variant::TriggerOption(t) => {
                t.delay_time = i32::try_from(n).ok()?;
                Some(())
            }
            _ => None,
        },
    );
    if let Some((min, max)) = range_bounds(frame_count) {
        count.set_limits(min, max);
    }
    if let Some((min, max)) = range_bounds(delay_time) {
        delay.set_limits(min, max);
    }
    [count, delay]
}
