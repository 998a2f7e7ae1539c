use indexmap::IndexMap;
use sensorgate_types::{MetadataMap, Timestamp, ValueType};
use serde::{Deserialize, Serialize};

/// Name of the built-in service every model declares.
pub const ADMIN_SERVICE: &str = "admin";
/// Admin resource holding the provider's human-readable name.
pub const FRIENDLY_NAME: &str = "friendlyName";
/// Admin resource holding the provider's location.
pub const LOCATION: &str = "location";

/// Where a model definition came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelOrigin {
    /// Created at runtime, either explicitly or by auto-vivification.
    #[default]
    Dynamic,
    /// Registered in bulk from an external type package.
    Package { uri: String },
}

/// A named type for providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin: ModelOrigin,
    #[serde(default)]
    pub created_at: Timestamp,
    /// Whether providers may carry services outside the declared set.
    #[serde(default = "default_true")]
    pub dynamic_services: bool,
    #[serde(default)]
    pub services: IndexMap<String, ServiceDef>,
}

fn default_true() -> bool {
    true
}

impl ModelDef {
    /// Creates a model declaring only the admin service.
    pub fn new(name: impl Into<String>, origin: ModelOrigin, created_at: Timestamp) -> Self {
        let mut model = Self {
            name: name.into(),
            origin,
            created_at,
            dynamic_services: true,
            services: IndexMap::new(),
        };
        model.normalize();
        model
    }

    /// Fills names from map keys and makes sure the admin service is declared
    /// first. Needed after deserializing externally authored definitions.
    pub fn normalize(&mut self) {
        if !self.services.contains_key(ADMIN_SERVICE) {
            self.services
                .insert(ADMIN_SERVICE.to_string(), ServiceDef::admin(self.created_at));
        }
        if let Some(idx) = self.services.get_index_of(ADMIN_SERVICE) {
            self.services.move_index(idx, 0);
        }
        for (name, service) in self.services.iter_mut() {
            if service.name.is_empty() {
                service.name = name.clone();
            }
            for (res_name, resource) in service.resources.iter_mut() {
                if resource.name.is_empty() {
                    resource.name = res_name.clone();
                }
            }
        }
    }

    /// URI of the package this model was registered from.
    pub fn package_uri(&self) -> Option<&str> {
        match &self.origin {
            ModelOrigin::Dynamic => None,
            ModelOrigin::Package { uri } => Some(uri),
        }
    }

    /// Package models have a fixed shape; only dynamic ones grow at runtime.
    pub fn is_extensible(&self) -> bool {
        matches!(self.origin, ModelOrigin::Dynamic)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.get(name)
    }

    pub fn resource(&self, service: &str, resource: &str) -> Option<&ResourceDef> {
        self.services.get(service).and_then(|s| s.resources.get(resource))
    }
}

/// A named group of resources within a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDef>,
}

impl ServiceDef {
    pub fn new(name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            name: name.into(),
            created_at,
            resources: IndexMap::new(),
        }
    }

    /// The built-in admin service definition.
    pub fn admin(created_at: Timestamp) -> Self {
        let mut admin = Self::new(ADMIN_SERVICE, created_at);
        admin.add_resource(
            ResourceDef::new(FRIENDLY_NAME, ValueType::String, created_at)
                .with_kind(ResourceKind::Property),
        );
        admin.add_resource(
            ResourceDef::new(LOCATION, ValueType::Any, created_at)
                .with_kind(ResourceKind::Property),
        );
        admin
    }

    /// Adds a resource definition, replacing any previous one of that name.
    pub fn add_resource(&mut self, resource: ResourceDef) {
        self.resources.insert(resource.name.clone(), resource);
    }

    pub fn with_resource(mut self, resource: ResourceDef) -> Self {
        self.add_resource(resource);
        self
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.get(name)
    }
}

/// The role a resource plays for its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    #[default]
    Sensor,
    Property,
    Action,
    StateVariable,
}

/// Who may change a resource's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mutability {
    Fixed,
    Observable,
    #[default]
    Modifiable,
}

/// A named, typed attribute slot within a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub kind: ResourceKind,
    #[serde(default)]
    pub mutability: Mutability,
    #[serde(default)]
    pub external_get: bool,
    #[serde(default)]
    pub external_set: bool,
    /// Seconds after which a value is considered stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_after_secs: Option<u64>,
    /// Extra metadata every instance of this resource starts with.
    #[serde(default, skip_serializing_if = "MetadataMap::is_empty")]
    pub default_extras: MetadataMap,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl ResourceDef {
    pub fn new(name: impl Into<String>, value_type: ValueType, created_at: Timestamp) -> Self {
        Self {
            name: name.into(),
            value_type,
            kind: ResourceKind::default(),
            mutability: Mutability::default(),
            external_get: false,
            external_set: false,
            stale_after_secs: None,
            default_extras: MetadataMap::new(),
            created_at,
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_mutability(mut self, mutability: Mutability) -> Self {
        self.mutability = mutability;
        self
    }

    pub fn with_external_access(mut self, get: bool, set: bool) -> Self {
        self.external_get = get;
        self.external_set = set;
        self
    }

    pub fn with_stale_after(mut self, secs: u64) -> Self {
        self.stale_after_secs = Some(secs);
        self
    }

    pub fn with_default_extras(mut self, extras: MetadataMap) -> Self {
        self.default_extras = extras;
        self
    }
}
