//! Driver components, leaf first.

pub mod acquisition;
pub mod binding;
pub mod catalog;
pub mod connection;
pub mod convert;
pub mod dispatcher;
pub mod features;
pub mod sequence;
