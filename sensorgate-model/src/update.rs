//! Externally built provider trees submitted to the merge path.
//!
//! A [`ProviderUpdate`] describes the complete desired state of a provider.
//! Services absent from the tree are removed on merge; resources without a
//! value are unset. The caller's tree is only read, never tracked.

use indexmap::IndexMap;
use sensorgate_types::{MetadataMap, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Explicit metadata supplied for a resource.
///
/// When present its extras replace the stored instance extras, and its
/// timestamp (if any) is used instead of the merge clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default)]
    pub extra: MetadataMap,
}

impl MetadataUpdate {
    pub fn at(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Desired state of one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataUpdate>,
}

impl ResourceUpdate {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataUpdate) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// `null` and a missing value both mean unset.
    pub fn effective_value(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }
}

/// Desired state of one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    #[serde(default)]
    pub resources: IndexMap<String, ResourceUpdate>,
}

impl ServiceUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: impl Into<String>, update: ResourceUpdate) -> Self {
        self.resources.insert(resource.into(), update);
        self
    }

    pub fn with_value(self, resource: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(resource, ResourceUpdate::value(value))
    }

    pub fn is_populated(&self) -> bool {
        self.resources.values().any(|r| r.effective_value().is_some())
    }
}

/// Desired state of a whole provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUpdate {
    pub id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_uri: Option<String>,
    /// Admin resources. `None` keeps the stored admin record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<ServiceUpdate>,
    #[serde(default)]
    pub services: IndexMap<String, ServiceUpdate>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dynamic_services: IndexMap<String, ServiceUpdate>,
}

impl ProviderUpdate {
    pub fn new(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_admin(mut self, admin: ServiceUpdate) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, service: ServiceUpdate) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    pub fn with_dynamic_service(mut self, name: impl Into<String>, service: ServiceUpdate) -> Self {
        self.dynamic_services.insert(name.into(), service);
        self
    }
}

impl From<&crate::ServiceInstance> for ServiceUpdate {
    fn from(service: &crate::ServiceInstance) -> Self {
        let resources = service
            .resources
            .iter()
            .map(|(name, rv)| {
                let metadata = MetadataUpdate {
                    timestamp: Some(rv.metadata.timestamp),
                    locked: rv.metadata.locked,
                    original_name: rv.metadata.original_name.clone(),
                    extra: rv.metadata.extra.clone(),
                };
                let update = ResourceUpdate::value(rv.value.clone()).with_metadata(metadata);
                (name.clone(), update)
            })
            .collect();
        Self { resources }
    }
}

/// Rebuilds the tree that would reproduce a stored provider exactly.
impl From<&crate::Provider> for ProviderUpdate {
    fn from(provider: &crate::Provider) -> Self {
        Self {
            id: provider.id.clone(),
            model: provider.model().to_string(),
            package_uri: provider.package_uri().map(str::to_string),
            admin: Some(ServiceUpdate::from(&provider.admin.service)),
            services: provider
                .services
                .iter()
                .map(|(name, s)| (name.clone(), ServiceUpdate::from(s)))
                .collect(),
            dynamic_services: provider
                .dynamic_services
                .iter()
                .map(|(name, s)| (name.clone(), ServiceUpdate::from(s)))
                .collect(),
        }
    }
}
