use crate::schema::{ADMIN_SERVICE, FRIENDLY_NAME, LOCATION};
use indexmap::IndexMap;
use sensorgate_types::{MetadataMap, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Metadata keys computed from the record itself; they shadow extras.
pub const META_VALUE: &str = "value";
pub const META_TIMESTAMP: &str = "timestamp";
pub const META_LOCKED: &str = "locked";
pub const META_ORIGINAL_NAME: &str = "originalName";

/// Per-resource bookkeeping.
///
/// `extra` only holds instance-level entries. Schema defaults are overlaid at
/// read time by [`ResourceValue::effective_metadata`] and never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Time of the last value-affecting write.
    pub timestamp: Timestamp,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "MetadataMap::is_empty")]
    pub extra: MetadataMap,
}

impl Metadata {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            locked: false,
            original_name: None,
            extra: MetadataMap::new(),
        }
    }
}

/// The current value of a set resource plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceValue {
    pub value: Value,
    pub metadata: Metadata,
}

impl ResourceValue {
    pub fn new(value: Value, timestamp: Timestamp) -> Self {
        Self {
            value,
            metadata: Metadata::new(timestamp),
        }
    }

    /// Metadata as presented to observers: schema `defaults`, overlaid with
    /// the instance extras, overlaid with the computed entries.
    pub fn effective_metadata(&self, defaults: &MetadataMap) -> MetadataMap {
        let mut map = defaults.clone();
        map.extend(
            self.metadata
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        map.insert(META_VALUE.to_string(), self.value.clone());
        map.insert(
            META_TIMESTAMP.to_string(),
            Value::from(self.metadata.timestamp.as_millis()),
        );
        if self.metadata.locked {
            map.insert(META_LOCKED.to_string(), Value::Bool(true));
        }
        if let Some(name) = &self.metadata.original_name {
            map.insert(META_ORIGINAL_NAME.to_string(), Value::String(name.clone()));
        }
        map
    }
}

/// A service instance: the set resources of one service on one provider.
///
/// Unset resources are absent from the map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(default)]
    pub resources: IndexMap<String, ResourceValue>,
}

impl ServiceInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service is populated when at least one of its resources is set.
    pub fn is_populated(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn get(&self, resource: &str) -> Option<&ResourceValue> {
        self.resources.get(resource)
    }

    pub fn value(&self, resource: &str) -> Option<&Value> {
        self.resources.get(resource).map(|r| &r.value)
    }
}

/// The identity record every provider carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admin {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_package_uri: Option<String>,
    /// Ids of providers this one links to, in insertion order.
    #[serde(default)]
    pub linked_providers: Vec<String>,
    /// Values of the admin resources (friendly name, location).
    #[serde(default)]
    pub service: ServiceInstance,
}

impl Admin {
    pub fn new(model_name: impl Into<String>, model_package_uri: Option<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_package_uri,
            linked_providers: Vec::new(),
            service: ServiceInstance::new(),
        }
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.service.value(FRIENDLY_NAME).and_then(|v| v.as_str())
    }

    pub fn location(&self) -> Option<&Value> {
        self.service.value(LOCATION)
    }

    pub fn is_linked_to(&self, id: &str) -> bool {
        self.linked_providers.iter().any(|l| l == id)
    }
}

/// A live instance of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub admin: Admin,
    /// Populated instances of declared services, keyed by service name.
    #[serde(default)]
    pub services: IndexMap<String, ServiceInstance>,
    /// Open-ended services outside the model's declared set.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dynamic_services: IndexMap<String, ServiceInstance>,
}

impl Provider {
    pub fn new(
        id: impl Into<String>,
        model_name: impl Into<String>,
        model_package_uri: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            admin: Admin::new(model_name, model_package_uri),
            services: IndexMap::new(),
            dynamic_services: IndexMap::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.admin.model_name
    }

    pub fn package_uri(&self) -> Option<&str> {
        self.admin.model_package_uri.as_deref()
    }

    /// Looks up a service instance by name: admin, declared, then dynamic.
    pub fn service(&self, name: &str) -> Option<&ServiceInstance> {
        if name == ADMIN_SERVICE {
            return Some(&self.admin.service);
        }
        self.services
            .get(name)
            .or_else(|| self.dynamic_services.get(name))
    }

    pub fn resource(&self, service: &str, resource: &str) -> Option<&ResourceValue> {
        self.service(service).and_then(|s| s.get(resource))
    }

    pub fn value(&self, service: &str, resource: &str) -> Option<&Value> {
        self.resource(service, resource).map(|r| &r.value)
    }
}
