//! Model/instance registry for SensorGate.
//!
//! The registry keeps a runtime-extensible schema of device types and the
//! live provider instances of those types. Every write is compared against
//! the stored state and the difference is reported, in order, to a
//! [`ChangeNotifier`].
//!
//! # Components
//!
//! - **Schema** ([`SchemaRegistry`]): models, services and resources; grows
//!   through staged [`SchemaPatch`]es
//! - **Instances** ([`InstanceStore`]): provider arena with id and model
//!   indexes, one lock per provider
//! - **Diff** ([`diff`]): pure change computation for both write paths
//! - **Links** ([`links`]): one-sided provider relations
//! - **Registry** ([`Registry`]): the thread-safe facade tying it together
//!   with persistence and notification
//!
//! # Write paths
//!
//! 1. **Low-level**: [`Registry::update_resource`] sets or unsets a single
//!    resource, creating whatever is missing on the way.
//! 2. **Merge**: [`Registry::save`] takes a complete [`ProviderUpdate`]
//!    tree and reconciles the stored provider with it.
//!
//! # Example
//!
//! ```
//! use sensorgate_registry::{Registry, UpdateOutcome};
//! use sensorgate_storage::MemoryStore;
//! use sensorgate_types::Timestamp;
//! use std::sync::Arc;
//!
//! let registry = Registry::builder(Arc::new(MemoryStore::new())).build().unwrap();
//! let outcome = registry
//!     .update_resource(
//!         Some("Thermometer"),
//!         "kitchen",
//!         "env",
//!         "temperature",
//!         Some(serde_json::json!(21.5)),
//!         Timestamp::from_millis(1_000),
//!     )
//!     .unwrap();
//! assert_eq!(outcome, UpdateOutcome::Applied);
//! ```
//!
//! [`ProviderUpdate`]: sensorgate_model::ProviderUpdate

mod config;
pub mod diff;
mod error;
mod instances;
pub mod links;
pub mod notifier;
mod registry;
mod schema;

pub use config::{DEFAULT_SELF_PROVIDER, RegistryConfig};
pub use error::{RegistryError, RegistryResult};
pub use instances::{InstanceStore, ProviderHandle};
pub use notifier::{
    ChangeNotifier, NoopNotifier, NotifierError, NotifyResult, RecordingNotifier, ResourcePath,
    TracingNotifier,
};
pub use registry::{Registry, RegistryBuilder, UpdateOutcome};
pub use schema::{SchemaPatch, SchemaRegistry};
