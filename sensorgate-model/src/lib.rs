//! Data model for SensorGate.
//!
//! Defines the provider → service → resource hierarchy on both sides of the
//! registry:
//! - [`ModelDef`] / [`ServiceDef`] / [`ResourceDef`]: runtime-extensible type
//!   descriptors, plus [`TypePackage`] for bulk registration
//! - [`Provider`] / [`ServiceInstance`] / [`ResourceValue`] / [`Metadata`]:
//!   stored instance state
//! - [`ProviderUpdate`]: externally built trees submitted to the merge path
//!
//! These types carry no locking or notification logic; that lives in
//! `sensorgate-registry`.

mod instance;
mod package;
mod schema;
mod update;

pub use instance::{
    Admin, META_LOCKED, META_ORIGINAL_NAME, META_TIMESTAMP, META_VALUE, Metadata, Provider,
    ResourceValue, ServiceInstance,
};
pub use package::TypePackage;
pub use schema::{
    ADMIN_SERVICE, FRIENDLY_NAME, LOCATION, ModelDef, ModelOrigin, Mutability, ResourceDef,
    ResourceKind, ServiceDef,
};
pub use update::{MetadataUpdate, ProviderUpdate, ResourceUpdate, ServiceUpdate};
