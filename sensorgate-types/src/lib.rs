//! Core type definitions for SensorGate.
//!
//! This crate defines the fundamental types shared by every layer of the
//! gateway:
//! - Millisecond timestamps and the injectable [`Clock`]
//! - Resource values and their declared [`ValueType`]
//! - [`ChangeEvent`]s describing mutations of the instance graph
//!
//! Type descriptors and instance trees live in `sensorgate-model`.

mod event;
mod timestamp;
mod value;

pub use event::{ChangeEvent, MetadataMap, ProviderRef};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};
pub use value::{Value, ValueType};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown value type: {0}")]
    UnknownValueType(String),
}
