//! Change events emitted by the registry.
//!
//! Every mutation of the instance graph is described as an ordered list of
//! [`ChangeEvent`]s. An element is always announced (`*Added`) before its
//! first value or metadata event. On removal, `ResourceRemoved` comes first,
//! followed by the value and metadata updates to `None`; a service is only
//! reported removed after all of its resources.

use crate::{Timestamp, Value, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The effective metadata of a resource as presented to observers.
pub type MetadataMap = BTreeMap<String, Value>;

/// Identifies the provider an event applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRef {
    /// URI of the type package the provider's model came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_uri: Option<String>,
    pub model: String,
    pub provider: String,
}

impl ProviderRef {
    #[must_use]
    pub fn new(
        package_uri: Option<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            package_uri,
            model: model.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.provider)
    }
}

/// A single change to the instance graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeEvent {
    ProviderAdded {
        target: ProviderRef,
    },

    ProviderRemoved {
        target: ProviderRef,
    },

    ServiceAdded {
        target: ProviderRef,
        service: String,
    },

    ServiceRemoved {
        target: ProviderRef,
        service: String,
    },

    ResourceAdded {
        target: ProviderRef,
        service: String,
        resource: String,
    },

    ResourceRemoved {
        target: ProviderRef,
        service: String,
        resource: String,
    },

    /// The value of a resource changed. `None` means unset.
    ResourceValueUpdated {
        target: ProviderRef,
        service: String,
        resource: String,
        value_type: ValueType,
        old: Option<Value>,
        new: Option<Value>,
        timestamp: Timestamp,
    },

    /// The effective metadata of a resource changed. `None` means unset.
    MetadataValueUpdated {
        target: ProviderRef,
        service: String,
        resource: String,
        old: Option<MetadataMap>,
        new: Option<MetadataMap>,
        timestamp: Timestamp,
    },
}

impl ChangeEvent {
    /// The provider this event applies to.
    #[must_use]
    pub fn target(&self) -> &ProviderRef {
        match self {
            Self::ProviderAdded { target }
            | Self::ProviderRemoved { target }
            | Self::ServiceAdded { target, .. }
            | Self::ServiceRemoved { target, .. }
            | Self::ResourceAdded { target, .. }
            | Self::ResourceRemoved { target, .. }
            | Self::ResourceValueUpdated { target, .. }
            | Self::MetadataValueUpdated { target, .. } => target,
        }
    }

    /// The service this event applies to, if it is below provider level.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::ProviderAdded { .. } | Self::ProviderRemoved { .. } => None,
            Self::ServiceAdded { service, .. }
            | Self::ServiceRemoved { service, .. }
            | Self::ResourceAdded { service, .. }
            | Self::ResourceRemoved { service, .. }
            | Self::ResourceValueUpdated { service, .. }
            | Self::MetadataValueUpdated { service, .. } => Some(service),
        }
    }

    /// The resource this event applies to, if it is at resource level.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::ResourceAdded { resource, .. }
            | Self::ResourceRemoved { resource, .. }
            | Self::ResourceValueUpdated { resource, .. }
            | Self::MetadataValueUpdated { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Short operation name, mostly for logs and test assertions.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProviderAdded { .. } => "addProvider",
            Self::ProviderRemoved { .. } => "removeProvider",
            Self::ServiceAdded { .. } => "addService",
            Self::ServiceRemoved { .. } => "removeService",
            Self::ResourceAdded { .. } => "addResource",
            Self::ResourceRemoved { .. } => "removeResource",
            Self::ResourceValueUpdated { .. } => "resourceValueUpdate",
            Self::MetadataValueUpdated { .. } => "metadataValueUpdate",
        }
    }

    /// Returns true for add/remove events.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(
            self,
            Self::ResourceValueUpdated { .. } | Self::MetadataValueUpdated { .. }
        )
    }
}
