//! Property - host-visible device properties with live hardware hooks
//!
//! A [`Property`] is the unit the host framework sees: a name, a kind
//! (Integer, Float, String or ReadOnlyString), optional numeric limits or an
//! allowed-value set, and a pair of hardware hooks.
//!
//! # Architecture
//!
//! ```text
//! Property
//!   ├─ metadata: Arc<RwLock<PropertyMetadata>>  (kind, limits, allowed values)
//!   ├─ value: watch::Sender<PropertyValue>       (last known value, subscriptions)
//!   ├─ hardware_reader: Option<F>               (BeforeGet: reads live device state)
//!   ├─ hardware_writer: Option<F>               (AfterSet: commits to the device)
//!   └─ change_listeners: Vec<F>                 (side effects after a change)
//! ```
//!
//! Metadata is shared between clones so that limits refreshed after a format
//! change are visible through every handle to the property.
//!
//! # Data Flow
//!
//! ```text
//! host calls property.set(value)                 host calls property.get()
//!         │                                               │
//!         ▼                                               ▼
//! ┌─────────────────────────────────────┐   ┌─────────────────────────────────┐
//! │ 1. Reject if read-only              │   │ hardware_reader (BeforeGet)     │
//! │ 2. Coerce to the property kind      │   │ re-reads the live device value, │
//! │ 3. Validate limits / allowed values │   │ never a cached copy             │
//! └─────────────────────────────────────┘   └─────────────────────────────────┘
//!         │ (fails here if invalid)
//!         ▼
//! ┌─────────────────────────────────────┐
//! │ 4. hardware_writer (AfterSet)       │
//! └─────────────────────────────────────┘
//!         │ (fails here if device rejects)
//!         ▼
//! ┌─────────────────────────────────────┐
//! │ 5. Re-read the live value, notify   │
//! │    subscribers and change listeners │
//! └─────────────────────────────────────┘
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::error::{CameraError, CameraResult};

// =============================================================================
// Kinds and values
// =============================================================================

/// Kind of a host property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Signed integer
    Integer,
    /// Floating point
    Float,
    /// Free text or one of the allowed values
    String,
    /// Text the host may not change
    ReadOnlyString,
}

impl PropertyKind {
    /// Kind name as shown to the host.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::Integer => "int",
            PropertyKind::Float => "float",
            PropertyKind::String => "string",
            PropertyKind::ReadOnlyString => "string (read-only)",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, PropertyKind::Integer | PropertyKind::Float)
    }
}

/// Direction of a host property request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAction {
    /// Host is about to read the property; refresh it from the device.
    BeforeGet,
    /// Host has written the property; push it to the device.
    AfterSet,
}

/// A property value as exchanged with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Value of an `Integer` property
    Integer(i64),
    /// Value of a `Float` property
    Float(f64),
    /// Value of a `String` or `ReadOnlyString` property
    String(String),
}

impl PropertyValue {
    /// Parse a host-supplied string according to `kind`.
    pub fn parse(kind: PropertyKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match kind {
            PropertyKind::Integer => raw
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .filter(|v| v.fract() == 0.0 && v.is_finite())
                        .map(|v| v as i64)
                })
                .map(PropertyValue::Integer),
            PropertyKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(PropertyValue::Float),
            PropertyKind::String | PropertyKind::ReadOnlyString => {
                Some(PropertyValue::String(raw.to_string()))
            }
        }
    }

    /// Integer view. Floats qualify only when whole; strings are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            PropertyValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            PropertyValue::Float(_) => None,
            PropertyValue::String(s) => s.trim().parse().ok(),
        }
    }

    /// Float view. Strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::String(s) => s.trim().parse().ok(),
        }
    }

    /// Text view of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to the representation required by `kind`.
    fn coerce(&self, kind: PropertyKind) -> Option<PropertyValue> {
        match kind {
            PropertyKind::Integer => self.as_i64().map(PropertyValue::Integer),
            PropertyKind::Float => self
                .as_f64()
                .filter(|v| v.is_finite())
                .map(PropertyValue::Float),
            PropertyKind::String | PropertyKind::ReadOnlyString => {
                Some(PropertyValue::String(self.to_string()))
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Integer(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Introspectable description of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    /// Property name
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Unit label (e.g. "ms")
    pub units: Option<String>,
    /// Value kind
    pub kind: PropertyKind,
    /// Rejects host writes
    pub read_only: bool,
    /// Lower limit, if bounded
    pub min_value: Option<f64>,
    /// Upper limit, if bounded
    pub max_value: Option<f64>,
    /// Legal values. Empty means unrestricted.
    pub allowed_values: Vec<String>,
}

type HardwareReader = Arc<dyn Fn() -> CameraResult<PropertyValue> + Send + Sync>;
type HardwareWriter = Arc<dyn Fn(&PropertyValue) -> CameraResult<()> + Send + Sync>;
type ChangeListener = Arc<dyn Fn(&PropertyValue) + Send + Sync>;

// =============================================================================
// Property
// =============================================================================

/// Host-visible property with optional hardware read/write hooks.
#[derive(Clone)]
pub struct Property {
    name: Arc<str>,
    metadata: Arc<RwLock<PropertyMetadata>>,
    value: Arc<watch::Sender<PropertyValue>>,
    hardware_reader: Option<HardwareReader>,
    hardware_writer: Option<HardwareWriter>,
    change_listeners: Arc<RwLock<Vec<ChangeListener>>>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("metadata", &*self.metadata.read())
            .field("value", &*self.value.borrow())
            .field("has_reader", &self.hardware_reader.is_some())
            .field("has_writer", &self.hardware_writer.is_some())
            .finish()
    }
}

impl Property {
    /// Create a property with an initial value.
    ///
    /// `ReadOnlyString` properties are read-only from the start.
    pub fn new(name: impl Into<String>, kind: PropertyKind, initial: PropertyValue) -> Self {
        let name: String = name.into();
        let (tx, _rx) = watch::channel(initial);
        let metadata = PropertyMetadata {
            name: name.clone(),
            description: None,
            units: None,
            kind,
            read_only: kind == PropertyKind::ReadOnlyString,
            min_value: None,
            max_value: None,
            allowed_values: Vec::new(),
        };

        Self {
            name: name.into(),
            metadata: Arc::new(RwLock::new(metadata)),
            value: Arc::new(tx),
            hardware_reader: None,
            hardware_writer: None,
            change_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Read-only string holding a fixed value.
    pub fn constant(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            name,
            PropertyKind::ReadOnlyString,
            PropertyValue::String(value.into()),
        )
    }

    /// Attach a description.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.metadata.write().description = Some(description.into());
        self
    }

    /// Attach a unit label.
    pub fn with_unit(self, unit: impl Into<String>) -> Self {
        self.metadata.write().units = Some(unit.into());
        self
    }

    /// Set numeric limits (inclusive).
    pub fn with_limits(self, min: f64, max: f64) -> Self {
        self.set_limits(min, max);
        self
    }

    /// Restrict the property to a set of legal values.
    pub fn with_allowed_values(self, values: Vec<String>) -> Self {
        self.set_allowed_values(values);
        self
    }

    /// Reject host writes.
    pub fn read_only(self) -> Self {
        self.metadata.write().read_only = true;
        self
    }

    /// Connect the BeforeGet hook.
    ///
    /// After this, [`get`](Self::get) always reads the live value through
    /// `reader` instead of returning the last known value.
    pub fn connect_to_hardware_read(
        &mut self,
        reader: impl Fn() -> CameraResult<PropertyValue> + Send + Sync + 'static,
    ) {
        self.hardware_reader = Some(Arc::new(reader));
    }

    /// Connect the AfterSet hook.
    ///
    /// `writer` receives the validated value, already coerced to the
    /// property kind. If it fails the last known value is left untouched.
    pub fn connect_to_hardware_write(
        &mut self,
        writer: impl Fn(&PropertyValue) -> CameraResult<()> + Send + Sync + 'static,
    ) {
        self.hardware_writer = Some(Arc::new(writer));
    }

    /// Connect both hooks.
    pub fn connect_to_hardware(
        &mut self,
        writer: impl Fn(&PropertyValue) -> CameraResult<()> + Send + Sync + 'static,
        reader: impl Fn() -> CameraResult<PropertyValue> + Send + Sync + 'static,
    ) {
        self.connect_to_hardware_write(writer);
        self.connect_to_hardware_read(reader);
    }

    /// Add change listener (called after the value changes through `set` or `refresh`).
    pub fn add_change_listener(&self, listener: impl Fn(&PropertyValue) + Send + Sync + 'static) {
        self.change_listeners.write().push(Arc::new(listener));
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value kind.
    pub fn kind(&self) -> PropertyKind {
        self.metadata.read().kind
    }

    /// Whether host writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.metadata.read().read_only
    }

    /// Snapshot of name, kind, limits and allowed values.
    pub fn metadata(&self) -> PropertyMetadata {
        self.metadata.read().clone()
    }

    /// Replace the numeric limits.
    pub fn set_limits(&self, min: f64, max: f64) {
        let mut meta = self.metadata.write();
        meta.min_value = Some(min);
        meta.max_value = Some(max);
    }

    /// Numeric limits, if any.
    pub fn limits(&self) -> Option<(f64, f64)> {
        let meta = self.metadata.read();
        meta.min_value.zip(meta.max_value)
    }

    /// Replace the allowed-value set. An empty set allows anything.
    pub fn set_allowed_values(&self, values: Vec<String>) {
        self.metadata.write().allowed_values = values;
    }

    /// Current allowed-value set.
    pub fn allowed_values(&self) -> Vec<String> {
        self.metadata.read().allowed_values.clone()
    }

    /// Last known value without touching the device.
    pub fn cached(&self) -> PropertyValue {
        self.value.borrow().clone()
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<PropertyValue> {
        self.value.subscribe()
    }

    /// Run the handler for `action`.
    ///
    /// `BeforeGet` re-reads the device; `AfterSet` commits `value`, which is
    /// required for that direction. Both return the resulting live value.
    pub fn handle(
        &self,
        action: PropertyAction,
        value: Option<PropertyValue>,
    ) -> CameraResult<PropertyValue> {
        match action {
            PropertyAction::BeforeGet => self.get(),
            PropertyAction::AfterSet => {
                let value = value.ok_or_else(|| CameraError::InvalidValue {
                    name: self.name.to_string(),
                    value: String::new(),
                })?;
                self.set(value)?;
                Ok(self.cached())
            }
        }
    }

    /// Current value (BeforeGet).
    pub fn get(&self) -> CameraResult<PropertyValue> {
        match &self.hardware_reader {
            Some(reader) => {
                let live = reader()?;
                self.store(live.clone());
                Ok(live)
            }
            None => Ok(self.cached()),
        }
    }

    /// Set value (AfterSet).
    ///
    /// Validation happens before the hardware writer runs so an invalid value
    /// never reaches the device.
    pub fn set(&self, value: PropertyValue) -> CameraResult<()> {
        if self.is_read_only() {
            return Err(CameraError::ReadOnlyProperty(self.name.to_string()));
        }

        let kind = self.kind();
        let value = value
            .coerce(kind)
            .ok_or_else(|| CameraError::InvalidValue {
                name: self.name.to_string(),
                value: value.to_string(),
            })?;
        self.validate(&value)?;

        if let Some(writer) = &self.hardware_writer {
            writer(&value)?;
        }

        // The device may adjust what it was given (quantization), so the
        // reader is authoritative when present.
        let stored = match &self.hardware_reader {
            Some(reader) => reader().unwrap_or(value),
            None => value,
        };
        self.store(stored.clone());
        self.notify(&stored);
        Ok(())
    }

    /// Parse a host string and set it.
    pub fn set_str(&self, raw: &str) -> CameraResult<()> {
        let value =
            PropertyValue::parse(self.kind(), raw).ok_or_else(|| CameraError::InvalidValue {
                name: self.name.to_string(),
                value: raw.to_string(),
            })?;
        self.set(value)
    }

    /// Re-read from the device and notify listeners if the value moved.
    pub fn refresh(&self) -> CameraResult<PropertyValue> {
        let before = self.cached();
        let live = self.get()?;
        if live != before {
            self.notify(&live);
        }
        Ok(live)
    }

    /// Check `value` against limits and allowed values.
    pub fn validate(&self, value: &PropertyValue) -> CameraResult<()> {
        let meta = self.metadata.read();

        if meta.kind.is_numeric() {
            if let (Some(v), Some(min), Some(max)) = (value.as_f64(), meta.min_value, meta.max_value)
            {
                if v < min || v > max {
                    return Err(CameraError::OutOfRange {
                        name: meta.name.clone(),
                        value: v,
                        min,
                        max,
                    });
                }
            }
        }

        if !meta.allowed_values.is_empty() {
            let text = value.to_string();
            if !meta.allowed_values.iter().any(|a| *a == text) {
                return Err(CameraError::InvalidChoice {
                    name: meta.name.clone(),
                    value: text,
                });
            }
        }

        Ok(())
    }

    fn store(&self, value: PropertyValue) {
        self.value.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    fn notify(&self, value: &PropertyValue) {
        let listeners = self.change_listeners.read();
        for listener in listeners.iter() {
            listener(value);
        }
    }
}

// =============================================================================
// PropertySet - Collection of Properties
// =============================================================================

/// Notification that a property must be resynchronized by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChanged {
    /// Name of the property to resynchronize.
    pub name: String,
    /// Freshly read value, if the property could be read.
    pub value: Option<PropertyValue>,
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, Property>,
    order: Vec<String>,
}

/// Named property registry for one device.
///
/// Registration order is preserved for listing. The set is cleared when the
/// device shuts down and repopulated on the next open.
pub struct PropertySet {
    registry: RwLock<Registry>,
    changed_tx: broadcast::Sender<PropertyChanged>,
}

impl fmt::Debug for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertySet")
            .field("properties", &format!("{} properties", self.len()))
            .field("names", &self.names())
            .finish()
    }
}

impl Default for PropertySet {
    fn default() -> Self {
        let (changed_tx, _) = broadcast::channel(64);
        Self {
            registry: RwLock::new(Registry::default()),
            changed_tx,
        }
    }
}

impl PropertySet {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property, replacing any previous one with the same name.
    pub fn register(&self, property: Property) {
        let name = property.name().to_string();
        let mut registry = self.registry.write();
        if registry.by_name.insert(name.clone(), property).is_none() {
            registry.order.push(name);
        }
    }

    /// Handle to the property `name`.
    pub fn get(&self, name: &str) -> Option<Property> {
        self.registry.read().by_name.get(name).cloned()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.registry.read().by_name.contains_key(name)
    }

    /// Property names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    /// All properties in registration order.
    pub fn properties(&self) -> Vec<Property> {
        let registry = self.registry.read();
        registry
            .order
            .iter()
            .filter_map(|name| registry.by_name.get(name).cloned())
            .collect()
    }

    /// Number of registered properties.
    pub fn len(&self) -> usize {
        self.registry.read().order.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every property (and with it every handler).
    pub fn clear(&self) {
        let mut registry = self.registry.write();
        registry.by_name.clear();
        registry.order.clear();
    }

    fn lookup(&self, name: &str) -> CameraResult<Property> {
        self.get(name)
            .ok_or_else(|| CameraError::UnknownProperty(name.to_string()))
    }

    /// BeforeGet on a named property.
    pub fn get_value(&self, name: &str) -> CameraResult<PropertyValue> {
        self.lookup(name)?.get()
    }

    /// AfterSet on a named property.
    pub fn set_value(&self, name: &str, value: PropertyValue) -> CameraResult<()> {
        self.lookup(name)?.set(value)
    }

    /// AfterSet on a named property from a host string.
    pub fn set_str(&self, name: &str, raw: &str) -> CameraResult<()> {
        self.lookup(name)?.set_str(raw)
    }

    /// Flag a property for host-side resynchronization.
    ///
    /// Re-reads the property (if registered) and broadcasts the change.
    /// Unknown names are still broadcast so the host can decide.
    pub fn mark_dirty(&self, name: &str) {
        let value = self.get(name).and_then(|p| p.refresh().ok());
        tracing::trace!(property = name, ?value, "property marked dirty");
        let _ = self.changed_tx.send(PropertyChanged {
            name: name.to_string(),
            value,
        });
    }

    /// Subscribe to dirty-property notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PropertyChanged> {
        self.changed_tx.subscribe()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn parse_by_kind() {
        assert_eq!(
            PropertyValue::parse(PropertyKind::Integer, " 42 "),
            Some(PropertyValue::Integer(42))
        );
        assert_eq!(
            PropertyValue::parse(PropertyKind::Integer, "42.0"),
            Some(PropertyValue::Integer(42))
        );
        assert_eq!(PropertyValue::parse(PropertyKind::Integer, "4.5"), None);
        assert_eq!(
            PropertyValue::parse(PropertyKind::Float, "12.5"),
            Some(PropertyValue::Float(12.5))
        );
        assert_eq!(PropertyValue::parse(PropertyKind::Float, "NaN"), None);
        assert_eq!(
            PropertyValue::parse(PropertyKind::String, "Soft"),
            Some(PropertyValue::String("Soft".into()))
        );
    }

    #[test]
    fn limits_checked_before_writer() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut prop = Property::new("Gain", PropertyKind::Integer, 100.into())
            .with_limits(100.0, 6400.0);
        prop.connect_to_hardware_write({
            let writes = writes.clone();
            move |v| {
                writes.lock().push(v.clone());
                Ok(())
            }
        });

        let err = prop.set(PropertyValue::Integer(9000)).unwrap_err();
        assert!(matches!(err, CameraError::OutOfRange { .. }));
        assert!(writes.lock().is_empty());

        prop.set(PropertyValue::Integer(800)).unwrap();
        assert_eq!(writes.lock().as_slice(), &[PropertyValue::Integer(800)]);
        assert_eq!(prop.cached(), PropertyValue::Integer(800));
    }

    #[test]
    fn allowed_values_enforced() {
        let prop = Property::new("TriggerMode", PropertyKind::String, "OFF".into())
            .with_allowed_values(vec!["OFF".into(), "Soft".into()]);
        assert!(prop.set("Soft".into()).is_ok());
        let err = prop.set("Hard".into()).unwrap_err();
        assert!(matches!(err, CameraError::InvalidChoice { .. }));
        assert_eq!(prop.cached(), PropertyValue::String("Soft".into()));
    }

    #[test]
    fn integer_allowed_values_compare_text() {
        let prop = Property::new("Binning", PropertyKind::Integer, 1.into())
            .with_allowed_values(vec!["1".into()]);
        assert!(prop.set_str("1").is_ok());
        assert!(prop.set_str("2").is_err());
    }

    #[test]
    fn read_only_rejected() {
        let prop = Property::constant("Serial Number", "1234");
        let err = prop.set("9".into()).unwrap_err();
        assert_eq!(err, CameraError::ReadOnlyProperty("Serial Number".into()));
        assert_eq!(prop.get().unwrap(), PropertyValue::String("1234".into()));
    }

    #[test]
    fn reader_is_authoritative_after_set() {
        let device = Arc::new(Mutex::new(0i64));
        let mut prop = Property::new("Brightness", PropertyKind::Integer, 0.into());
        prop.connect_to_hardware(
            {
                let device = device.clone();
                // Device rounds to even numbers.
                move |v| {
                    *device.lock() = v.as_i64().unwrap_or(0) / 2 * 2;
                    Ok(())
                }
            },
            {
                let device = device.clone();
                move || Ok(PropertyValue::Integer(*device.lock()))
            },
        );

        prop.set(PropertyValue::Integer(7)).unwrap();
        assert_eq!(prop.cached(), PropertyValue::Integer(6));

        *device.lock() = 10;
        assert_eq!(prop.get().unwrap(), PropertyValue::Integer(10));
    }

    #[test]
    fn writer_failure_keeps_value() {
        let mut prop = Property::new("Hue", PropertyKind::Integer, 3.into());
        prop.connect_to_hardware_write(|_| Err(CameraError::device("SetFeatures", -9, "Fail")));
        assert!(prop.set(PropertyValue::Integer(5)).is_err());
        assert_eq!(prop.cached(), PropertyValue::Integer(3));
    }

    #[test]
    fn handle_dispatches_direction() {
        let prop = Property::new("Exposure", PropertyKind::Float, 10.0.into());
        let v = prop
            .handle(PropertyAction::AfterSet, Some(PropertyValue::Integer(20)))
            .unwrap();
        assert_eq!(v, PropertyValue::Float(20.0));
        assert_eq!(
            prop.handle(PropertyAction::BeforeGet, None).unwrap(),
            PropertyValue::Float(20.0)
        );
        assert!(prop.handle(PropertyAction::AfterSet, None).is_err());
    }

    #[test]
    fn shared_metadata_between_clones() {
        let prop = Property::new("ROI Position X", PropertyKind::Integer, 0.into());
        let clone = prop.clone();
        prop.set_limits(0.0, 1.0);
        assert_eq!(clone.limits(), Some((0.0, 1.0)));
    }

    #[test]
    fn listeners_and_subscribers_see_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let prop = Property::new("Gain", PropertyKind::Integer, 100.into());
        prop.add_change_listener({
            let seen = seen.clone();
            move |v| seen.lock().push(v.clone())
        });
        let rx = prop.subscribe();

        prop.set(PropertyValue::Integer(200)).unwrap();
        assert_eq!(seen.lock().as_slice(), &[PropertyValue::Integer(200)]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), PropertyValue::Integer(200));
    }

    #[test]
    fn set_preserves_registration_order() {
        let set = PropertySet::new();
        set.register(Property::constant("B", "1"));
        set.register(Property::constant("A", "2"));
        set.register(Property::constant("B", "3"));
        assert_eq!(set.names(), vec!["B".to_string(), "A".to_string()]);
        assert_eq!(
            set.get_value("B").unwrap(),
            PropertyValue::String("3".into())
        );
        assert!(matches!(
            set.get_value("C"),
            Err(CameraError::UnknownProperty(_))
        ));
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn mark_dirty_broadcasts_fresh_value() {
        let device = Arc::new(Mutex::new(5i64));
        let mut prop = Property::new("Gain", PropertyKind::Integer, 5.into());
        prop.connect_to_hardware_read({
            let device = device.clone();
            move || Ok(PropertyValue::Integer(*device.lock()))
        });

        let set = PropertySet::new();
        set.register(prop);
        let mut rx = set.subscribe_changes();

        *device.lock() = 9;
        set.mark_dirty("Gain");

        let change = rx.try_recv().unwrap();
        assert_eq!(change.name, "Gain");
        assert_eq!(change.value, Some(PropertyValue::Integer(9)));
        assert_eq!(
            set.get("Gain").unwrap().cached(),
            PropertyValue::Integer(9)
        );
    }
}
