//! `kscam-core`
//!
//! Shared types for the Nikon KsCam (DS-Ri2 / DS-Qi2) camera driver.
//!
//! This crate holds everything that does not touch the vendor SDK: the error
//! type, frame buffers, the host property model, frame sinks and the async
//! capability traits the driver implements.
//!
//! ## Key Types
//!
//! - [`CameraError`]: error type for every synchronous driver path
//! - [`Property`] / [`PropertySet`]: host-visible properties with hardware hooks
//! - [`ImageBuffer`] / [`Frame`]: controller buffer and delivered frames
//! - [`FrameSink`]: consumer of sequence frames

pub mod capabilities;
pub mod data;
pub mod error;
pub mod limits;
pub mod property;
pub mod sink;

pub use data::{Frame, FrameMetadata, ImageBuffer};
pub use error::{CameraError, CameraResult, DriverError, DriverErrorKind};
pub use property::{
    Property, PropertyAction, PropertyChanged, PropertyKind, PropertyMetadata, PropertySet,
    PropertyValue,
};
pub use sink::{BoundedFrameSink, FrameSink};
