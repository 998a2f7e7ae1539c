//! Change computation.
//!
//! Pure functions that compare stored provider state with an incoming write
//! and produce the merged state plus the ordered [`ChangeEvent`]s describing
//! the difference. Nothing here locks or notifies; the registry applies the
//! result and delivers the events.
//!
//! Services are visited admin first, then declared services in model order,
//! then dynamic services. Within a service, resources already stored come
//! first in stored order, followed by new ones in update order.

use indexmap::IndexMap;
use sensorgate_model::{
    ADMIN_SERVICE, Metadata, MetadataUpdate, ModelDef, Provider, ProviderUpdate, ResourceUpdate,
    ResourceValue, ServiceInstance, ServiceUpdate,
};
use sensorgate_types::{ChangeEvent, MetadataMap, ProviderRef, Timestamp, Value, ValueType};
use std::collections::BTreeMap;

static NO_DEFAULTS: MetadataMap = BTreeMap::new();

/// Result of merging an update tree into stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub provider: Provider,
    pub events: Vec<ChangeEvent>,
}

/// Result of a single low-level value write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueWrite {
    pub events: Vec<ChangeEvent>,
    /// The write was older than the stored value and was dropped.
    pub stale: bool,
}

/// The event target for a provider of `model`.
pub fn provider_ref(model: &ModelDef, id: &str) -> ProviderRef {
    ProviderRef::new(
        model.package_uri().map(str::to_string),
        model.name.clone(),
        id,
    )
}

/// Merges `tree` into `old` (or into nothing, for a new provider).
///
/// `model` must already declare every service and resource the tree uses.
/// `now` stamps values whose update carries no explicit timestamp and
/// removal events.
pub fn merge_provider(
    model: &ModelDef,
    old: Option<&Provider>,
    tree: &ProviderUpdate,
    now: Timestamp,
) -> Merge {
    let mut differ = Differ::new(model, &tree.id, now);
    if old.is_none() {
        differ.push(ChangeEvent::ProviderAdded {
            target: differ.target.clone(),
        });
    }

    let mut provider = Provider::new(
        tree.id.clone(),
        model.name.clone(),
        model.package_uri().map(str::to_string),
    );
    if let Some(old) = old {
        provider.admin.linked_providers = old.admin.linked_providers.clone();
    }

    // an absent admin keeps the stored record
    provider.admin.service = match &tree.admin {
        None => old.map(|p| p.admin.service.clone()).unwrap_or_default(),
        Some(admin) => differ.service(
            ADMIN_SERVICE,
            old.map(|p| &p.admin.service),
            Some(admin),
        ),
    };

    let declared = model
        .services
        .keys()
        .filter(|name| name.as_str() != ADMIN_SERVICE);
    let stored = old.into_iter().flat_map(|p| p.services.keys());
    for name in union(declared.chain(stored), tree.services.keys()) {
        let merged = differ.service(
            name,
            old.and_then(|p| p.services.get(name)),
            tree.services.get(name),
        );
        if merged.is_populated() {
            provider.services.insert(name.clone(), merged);
        }
    }

    let stored = old.into_iter().flat_map(|p| p.dynamic_services.keys());
    for name in union(stored, tree.dynamic_services.keys()) {
        let merged = differ.service(
            name,
            old.and_then(|p| p.dynamic_services.get(name)),
            tree.dynamic_services.get(name),
        );
        if merged.is_populated() {
            provider.dynamic_services.insert(name.clone(), merged);
        }
    }

    Merge {
        provider,
        events: differ.events,
    }
}

/// Writes one value through the low-level path.
///
/// `value` of `None` unsets the resource. `ts` becomes the resource's
/// timestamp. With `drop_stale`, a write older than the stored timestamp is
/// ignored.
pub fn write_value(
    model: &ModelDef,
    provider: &mut Provider,
    service: &str,
    resource: &str,
    value: Option<Value>,
    ts: Timestamp,
    drop_stale: bool,
) -> ValueWrite {
    let mut differ = Differ::new(model, &provider.id, ts);
    let slot = if service == ADMIN_SERVICE {
        &mut provider.admin.service
    } else {
        provider.services.entry(service.to_string()).or_default()
    };

    let stale = drop_stale
        && slot
            .get(resource)
            .is_some_and(|old| ts.is_before(&old.metadata.timestamp));
    if stale {
        return ValueWrite {
            events: Vec::new(),
            stale: true,
        };
    }

    let was_populated = slot.is_populated();
    match (slot.resources.get(resource).cloned(), value) {
        (None, None) => {}
        (None, Some(value)) => {
            if !was_populated {
                differ.push(ChangeEvent::ServiceAdded {
                    target: differ.target.clone(),
                    service: service.to_string(),
                });
            }
            let written = ResourceValue::new(value, ts);
            differ.resource_added(service, resource, &written);
            slot.resources.insert(resource.to_string(), written);
        }
        (Some(old), None) => {
            differ.resource_removed(service, resource, &old);
            slot.resources.shift_remove(resource);
            if !slot.is_populated() {
                differ.push(ChangeEvent::ServiceRemoved {
                    target: differ.target.clone(),
                    service: service.to_string(),
                });
            }
        }
        (Some(old), Some(value)) => {
            let written = ResourceValue {
                value,
                metadata: Metadata {
                    timestamp: ts,
                    ..old.metadata.clone()
                },
            };
            if written.value != old.value {
                differ.resource_changed(service, resource, &old, &written);
            } else if written.metadata != old.metadata {
                differ.metadata_changed(service, resource, &old, &written);
            }
            slot.resources.insert(resource.to_string(), written);
        }
    }

    if service != ADMIN_SERVICE
        && provider
            .services
            .get(service)
            .is_some_and(|s| !s.is_populated())
    {
        provider.services.shift_remove(service);
    }

    ValueWrite {
        events: differ.events,
        stale: false,
    }
}

/// Events announcing the removal of a whole provider.
pub fn removal_events(model: &ModelDef, provider: &Provider, now: Timestamp) -> Vec<ChangeEvent> {
    let mut differ = Differ::new(model, &provider.id, now);
    let services = std::iter::once((ADMIN_SERVICE, &provider.admin.service))
        .chain(provider.services.iter().map(|(n, s)| (n.as_str(), s)))
        .chain(provider.dynamic_services.iter().map(|(n, s)| (n.as_str(), s)));
    for (name, service) in services {
        differ.service(name, Some(service), None);
    }
    differ.push(ChangeEvent::ProviderRemoved {
        target: differ.target.clone(),
    });
    differ.events
}

/// Keys of `first` followed by the keys of `second` not already seen.
fn union<'k>(
    first: impl Iterator<Item = &'k String>,
    second: impl Iterator<Item = &'k String>,
) -> Vec<&'k String> {
    let mut keys: Vec<&String> = Vec::new();
    for key in first.chain(second) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Stored value for an update, honoring explicit metadata.
///
/// Explicit metadata replaces the stored extras; without it the previous
/// extras are kept and only the timestamp moves.
fn next_value(
    value: &Value,
    explicit: Option<&MetadataUpdate>,
    previous: Option<&Metadata>,
    now: Timestamp,
) -> ResourceValue {
    let metadata = match (explicit, previous) {
        (Some(m), _) => Metadata {
            timestamp: m.timestamp.unwrap_or(now),
            locked: m.locked,
            original_name: m.original_name.clone(),
            extra: m.extra.clone(),
        },
        (None, Some(prev)) => Metadata {
            timestamp: now,
            ..prev.clone()
        },
        (None, None) => Metadata::new(now),
    };
    ResourceValue {
        value: value.clone(),
        metadata,
    }
}

struct Differ<'m> {
    model: &'m ModelDef,
    target: ProviderRef,
    now: Timestamp,
    events: Vec<ChangeEvent>,
}

impl<'m> Differ<'m> {
    fn new(model: &'m ModelDef, id: &str, now: Timestamp) -> Self {
        Self {
            model,
            target: provider_ref(model, id),
            now,
            events: Vec::new(),
        }
    }

    fn push(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    fn defaults(&self, service: &str, resource: &str) -> &'m MetadataMap {
        self.model
            .resource(service, resource)
            .map_or(&NO_DEFAULTS, |r| &r.default_extras)
    }

    fn value_type(&self, service: &str, resource: &str, value: Option<&Value>) -> ValueType {
        match self.model.resource(service, resource) {
            Some(def) => def.value_type,
            None => value.map(ValueType::of).unwrap_or_default(),
        }
    }

    fn resource_added(&mut self, service: &str, resource: &str, new: &ResourceValue) {
        let defaults = self.defaults(service, resource);
        self.push(ChangeEvent::ResourceAdded {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
        });
        self.push(ChangeEvent::ResourceValueUpdated {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
            value_type: self.value_type(service, resource, Some(&new.value)),
            old: None,
            new: Some(new.value.clone()),
            timestamp: new.metadata.timestamp,
        });
        self.push(ChangeEvent::MetadataValueUpdated {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
            old: None,
            new: Some(new.effective_metadata(defaults)),
            timestamp: new.metadata.timestamp,
        });
    }

    fn resource_removed(&mut self, service: &str, resource: &str, old: &ResourceValue) {
        let defaults = self.defaults(service, resource);
        let timestamp = self.now;
        self.push(ChangeEvent::ResourceRemoved {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
        });
        self.push(ChangeEvent::ResourceValueUpdated {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
            value_type: self.value_type(service, resource, Some(&old.value)),
            old: Some(old.value.clone()),
            new: None,
            timestamp,
        });
        self.push(ChangeEvent::MetadataValueUpdated {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
            old: Some(old.effective_metadata(defaults)),
            new: None,
            timestamp,
        });
    }

    fn resource_changed(
        &mut self,
        service: &str,
        resource: &str,
        old: &ResourceValue,
        new: &ResourceValue,
    ) {
        self.push(ChangeEvent::ResourceValueUpdated {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
            value_type: self.value_type(service, resource, Some(&new.value)),
            old: Some(old.value.clone()),
            new: Some(new.value.clone()),
            timestamp: new.metadata.timestamp,
        });
        self.metadata_changed(service, resource, old, new);
    }

    fn metadata_changed(
        &mut self,
        service: &str,
        resource: &str,
        old: &ResourceValue,
        new: &ResourceValue,
    ) {
        let defaults = self.defaults(service, resource);
        self.push(ChangeEvent::MetadataValueUpdated {
            target: self.target.clone(),
            service: service.to_string(),
            resource: resource.to_string(),
            old: Some(old.effective_metadata(defaults)),
            new: Some(new.effective_metadata(defaults)),
            timestamp: new.metadata.timestamp,
        });
    }

    /// Diffs one service slot and returns its merged instance.
    fn service(
        &mut self,
        name: &str,
        old: Option<&ServiceInstance>,
        new: Option<&ServiceUpdate>,
    ) -> ServiceInstance {
        let old = old.filter(|s| s.is_populated());
        let new = new.filter(|s| s.is_populated());
        let mut merged = ServiceInstance::new();

        match (old, new) {
            (None, None) => {}
            (None, Some(new)) => {
                self.push(ChangeEvent::ServiceAdded {
                    target: self.target.clone(),
                    service: name.to_string(),
                });
                for (resource, update) in &new.resources {
                    if let Some(value) = update.effective_value() {
                        let written =
                            next_value(value, update.metadata.as_ref(), None, self.now);
                        self.resource_added(name, resource, &written);
                        merged.resources.insert(resource.clone(), written);
                    }
                }
            }
            (Some(old), None) => {
                for (resource, stored) in &old.resources {
                    self.resource_removed(name, resource, stored);
                }
                self.push(ChangeEvent::ServiceRemoved {
                    target: self.target.clone(),
                    service: name.to_string(),
                });
            }
            (Some(old), Some(new)) => {
                let resources = union(old.resources.keys(), new.resources.keys());
                merged.resources = self.resources(name, &old.resources, &new.resources, &resources);
            }
        }
        merged
    }

    fn resources(
        &mut self,
        service: &str,
        old: &IndexMap<String, ResourceValue>,
        new: &IndexMap<String, ResourceUpdate>,
        names: &[&String],
    ) -> IndexMap<String, ResourceValue> {
        let mut merged = IndexMap::new();
        for &name in names {
            let update = new.get(name);
            let explicit = update.and_then(|u| u.metadata.as_ref());
            match (old.get(name), update.and_then(ResourceUpdate::effective_value)) {
                (None, None) => {}
                (None, Some(value)) => {
                    let written = next_value(value, explicit, None, self.now);
                    self.resource_added(service, name, &written);
                    merged.insert(name.clone(), written);
                }
                (Some(stored), None) => self.resource_removed(service, name, stored),
                (Some(stored), Some(value)) if stored.value == *value => {
                    merged.insert(name.clone(), stored.clone());
                }
                (Some(stored), Some(value)) => {
                    let written = next_value(value, explicit, Some(&stored.metadata), self.now);
                    self.resource_changed(service, name, stored, &written);
                    merged.insert(name.clone(), written);
                }
            }
        }
        merged
    }
}
