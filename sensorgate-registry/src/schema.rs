//! Runtime-extensible type descriptors.
//!
//! The [`SchemaRegistry`] owns every [`ModelDef`]. Models are shared with
//! readers as `Arc<ModelDef>` and copied on write, so a reader holding a
//! model never observes a half-applied change.
//!
//! Both update paths grow the schema through a [`SchemaPatch`]: the missing
//! elements are collected and validated against the current state first,
//! then applied in one step. A patch that fails validation changes nothing.

use crate::error::{RegistryError, RegistryResult};
use indexmap::IndexMap;
use sensorgate_model::{
    ADMIN_SERVICE, ModelDef, ModelOrigin, ProviderUpdate, ResourceDef, ServiceDef, TypePackage,
};
use sensorgate_types::{Timestamp, Value, ValueType};
use std::sync::Arc;
use tracing::debug;

/// The set of known models, services and resources.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: IndexMap<String, Arc<ModelDef>>,
    /// Package URI → names of the models it registered, in package order.
    packages: IndexMap<String, Vec<String>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Looks up a model by name.
    pub fn model(&self, name: &str) -> Option<&Arc<ModelDef>> {
        self.models.get(name)
    }

    /// Looks up a model by name, or by package URI. A URI resolves to the
    /// first model of that package.
    pub fn get_model(&self, name_or_uri: &str) -> Option<Arc<ModelDef>> {
        self.models
            .get(name_or_uri)
            .or_else(|| {
                self.packages
                    .get(name_or_uri)
                    .and_then(|names| names.first())
                    .and_then(|name| self.models.get(name))
            })
            .cloned()
    }

    /// All models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.models.values()
    }

    pub fn create_model(&mut self, name: &str, ts: Timestamp) -> RegistryResult<Arc<ModelDef>> {
        if self.models.contains_key(name) {
            return Err(RegistryError::duplicate("registry", name));
        }
        let model = Arc::new(ModelDef::new(name, ModelOrigin::Dynamic, ts));
        self.models.insert(name.to_string(), Arc::clone(&model));
        debug!(model = name, "created model");
        Ok(model)
    }

    pub fn create_service(
        &mut self,
        model: &str,
        name: &str,
        ts: Timestamp,
    ) -> RegistryResult<ServiceDef> {
        let entry = self.extensible_model(model, || format!("service '{name}'"))?;
        if entry.services.contains_key(name) {
            return Err(RegistryError::duplicate(format!("model '{model}'"), name));
        }
        let service = ServiceDef::new(name, ts);
        Arc::make_mut(entry)
            .services
            .insert(name.to_string(), service.clone());
        debug!(model, service = name, "created service");
        Ok(service)
    }

    /// Adds a resource definition to a declared service.
    pub fn create_resource(
        &mut self,
        model: &str,
        service: &str,
        resource: ResourceDef,
    ) -> RegistryResult<ResourceDef> {
        let entry = self.extensible_model(model, || format!("resource '{}'", resource.name))?;
        let Some(existing) = entry.services.get(service) else {
            return Err(RegistryError::UnknownService {
                model: model.to_string(),
                service: service.to_string(),
            });
        };
        if existing.resources.contains_key(&resource.name) {
            return Err(RegistryError::duplicate(
                format!("service '{model}/{service}'"),
                resource.name,
            ));
        }
        if let Some(target) = Arc::make_mut(entry).services.get_mut(service) {
            target.add_resource(resource.clone());
        }
        debug!(model, service, resource = %resource.name, "created resource");
        Ok(resource)
    }

    fn extensible_model(
        &mut self,
        model: &str,
        element: impl FnOnce() -> String,
    ) -> RegistryResult<&mut Arc<ModelDef>> {
        let entry = self
            .models
            .get_mut(model)
            .ok_or_else(|| RegistryError::UnknownModel(model.to_string()))?;
        if !entry.is_extensible() {
            return Err(RegistryError::not_extensible(model, element()));
        }
        Ok(entry)
    }

    /// Registers every model of a type package.
    ///
    /// Re-registering a URI replaces the models it registered before. Fails
    /// without changing anything if a model name is already taken by a model
    /// of another origin, or appears twice in the package.
    pub fn register_package(&mut self, mut package: TypePackage) -> RegistryResult<Vec<String>> {
        package.normalize();
        let mut seen = Vec::with_capacity(package.models.len());
        for model in &package.models {
            let owned_here = self
                .models
                .get(&model.name)
                .is_some_and(|m| m.package_uri() == Some(package.uri.as_str()));
            if seen.contains(&model.name) || (self.models.contains_key(&model.name) && !owned_here)
            {
                return Err(RegistryError::duplicate(
                    format!("package '{}'", package.uri),
                    model.name.clone(),
                ));
            }
            seen.push(model.name.clone());
        }

        self.unregister_package(&package.uri);
        for model in package.models {
            self.models.insert(model.name.clone(), Arc::new(model));
        }
        debug!(uri = %package.uri, models = seen.len(), "registered type package");
        self.packages.insert(package.uri, seen.clone());
        Ok(seen)
    }

    /// Removes every model registered from `uri`. Returns their names.
    pub fn unregister_package(&mut self, uri: &str) -> Vec<String> {
        let Some(names) = self.packages.shift_remove(uri) else {
            return Vec::new();
        };
        for name in &names {
            self.models.shift_remove(name);
        }
        debug!(uri, models = names.len(), "unregistered type package");
        names
    }

    /// Re-inserts a persisted model. Returns false if the name is taken.
    pub(crate) fn restore(&mut self, mut model: ModelDef) -> bool {
        if self.models.contains_key(&model.name) {
            return false;
        }
        model.normalize();
        if let Some(uri) = model.package_uri() {
            self.packages
                .entry(uri.to_string())
                .or_default()
                .push(model.name.clone());
        }
        self.models.insert(model.name.clone(), Arc::new(model));
        true
    }

    /// Plans what a low-level write of `service`/`resource` on a provider of
    /// `model` needs to add.
    pub fn plan_resource(
        &self,
        model: &str,
        service: &str,
        resource: &str,
        value: Option<&Value>,
        ts: Timestamp,
    ) -> RegistryResult<SchemaPatch> {
        let mut planner = Planner::new(self.models.get(model).map(Arc::as_ref), model, ts);
        planner.resource(service, resource, value)?;
        planner.finish()
    }

    /// Plans what merging `tree` needs to add.
    pub fn plan_tree(&self, tree: &ProviderUpdate, ts: Timestamp) -> RegistryResult<SchemaPatch> {
        let existing = self.models.get(&tree.model).map(Arc::as_ref);
        if existing.is_none() && tree.package_uri.is_some() {
            // package models are never created implicitly
            return Err(RegistryError::UnknownModel(tree.model.clone()));
        }
        let mut planner = Planner::new(existing, &tree.model, ts);

        if let Some(admin) = &tree.admin {
            for (name, update) in &admin.resources {
                planner.resource(ADMIN_SERVICE, name, update.effective_value())?;
            }
        }
        for (service, update) in &tree.services {
            if service == ADMIN_SERVICE {
                return Err(RegistryError::duplicate(
                    format!("model '{}'", tree.model),
                    ADMIN_SERVICE,
                ));
            }
            planner.service(service);
            for (name, resource) in &update.resources {
                planner.resource(service, name, resource.effective_value())?;
            }
        }
        for (service, update) in &tree.dynamic_services {
            if planner.has_service(service) {
                return Err(RegistryError::duplicate(
                    format!("declared services of model '{}'", tree.model),
                    service.clone(),
                ));
            }
            if update.is_populated() && !existing.is_none_or(|m| m.dynamic_services) {
                return Err(RegistryError::not_extensible(
                    tree.model.clone(),
                    format!("dynamic service '{service}'"),
                ));
            }
        }
        planner.finish()
    }

    /// Applies a patch planned against the current state and returns the
    /// resulting model.
    pub fn apply(&mut self, patch: SchemaPatch) -> RegistryResult<Arc<ModelDef>> {
        if patch.create_model && !self.models.contains_key(&patch.model) {
            let model = ModelDef::new(patch.model.clone(), ModelOrigin::Dynamic, patch.created_at);
            self.models.insert(patch.model.clone(), Arc::new(model));
            debug!(model = %patch.model, "auto-created model");
        }
        let entry = self
            .models
            .get_mut(&patch.model)
            .ok_or_else(|| RegistryError::UnknownModel(patch.model.clone()))?;

        if !patch.services.is_empty() || !patch.resources.is_empty() {
            let model = Arc::make_mut(entry);
            for service in patch.services {
                debug!(model = %patch.model, %service, "auto-created service");
                model
                    .services
                    .entry(service.clone())
                    .or_insert_with(|| ServiceDef::new(service, patch.created_at));
            }
            for (service, resource) in patch.resources {
                if let Some(target) = model.services.get_mut(&service) {
                    debug!(
                        model = %patch.model,
                        %service,
                        resource = %resource.name,
                        "auto-created resource"
                    );
                    target
                        .resources
                        .entry(resource.name.clone())
                        .or_insert(resource);
                }
            }
        }
        Ok(Arc::clone(entry))
    }
}

/// Schema elements an update needs that do not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPatch {
    model: String,
    create_model: bool,
    services: Vec<String>,
    resources: Vec<(String, ResourceDef)>,
    created_at: Timestamp,
}

impl SchemaPatch {
    /// The model the patch applies to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// True if the patch adds nothing.
    pub fn is_empty(&self) -> bool {
        !self.create_model && self.services.is_empty() && self.resources.is_empty()
    }

    pub fn creates_model(&self) -> bool {
        self.create_model
    }

    pub fn new_services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    /// New resources as `(service, definition)` pairs.
    pub fn new_resources(&self) -> impl Iterator<Item = (&str, &ResourceDef)> {
        self.resources.iter().map(|(s, r)| (s.as_str(), r))
    }
}

struct Planner<'a> {
    existing: Option<&'a ModelDef>,
    patch: SchemaPatch,
}

impl<'a> Planner<'a> {
    fn new(existing: Option<&'a ModelDef>, model: &str, ts: Timestamp) -> Self {
        Self {
            existing,
            patch: SchemaPatch {
                model: model.to_string(),
                create_model: existing.is_none(),
                services: Vec::new(),
                resources: Vec::new(),
                created_at: ts,
            },
        }
    }

    fn has_service(&self, service: &str) -> bool {
        // admin is declared by every model, including ones not created yet
        service == ADMIN_SERVICE
            || self
                .existing
                .is_some_and(|m| m.services.contains_key(service))
            || self.patch.services.iter().any(|s| s == service)
    }

    /// Type of a resource the model declares or the patch already adds.
    fn declared_type(&self, service: &str, resource: &str) -> Option<ValueType> {
        let declared = match self.existing {
            Some(model) => model.resource(service, resource).map(|r| r.value_type),
            None if service == ADMIN_SERVICE => ServiceDef::admin(Timestamp::EPOCH)
                .resource(resource)
                .map(|r| r.value_type),
            None => None,
        };
        declared.or_else(|| {
            self.patch
                .resources
                .iter()
                .find(|(s, r)| s == service && r.name == resource)
                .map(|(_, r)| r.value_type)
        })
    }

    fn service(&mut self, service: &str) {
        if !self.has_service(service) {
            self.patch.services.push(service.to_string());
        }
    }

    fn resource(
        &mut self,
        service: &str,
        resource: &str,
        value: Option<&Value>,
    ) -> RegistryResult<()> {
        self.service(service);
        match (self.declared_type(service, resource), value) {
            (Some(expected), Some(value)) if !expected.accepts(value) => {
                Err(RegistryError::TypeMismatch {
                    model: self.patch.model.clone(),
                    service: service.to_string(),
                    resource: resource.to_string(),
                    expected,
                    actual: ValueType::of(value),
                })
            }
            (Some(_), _) => Ok(()),
            (None, value) => {
                let value_type = value.map(ValueType::of).unwrap_or_default();
                self.patch.resources.push((
                    service.to_string(),
                    ResourceDef::new(resource, value_type, self.patch.created_at),
                ));
                Ok(())
            }
        }
    }

    fn finish(self) -> RegistryResult<SchemaPatch> {
        if let Some(model) = self.existing.filter(|m| !m.is_extensible()) {
            let element = self
                .patch
                .services
                .first()
                .map(|s| format!("service '{s}'"))
                .or_else(|| {
                    self.patch
                        .resources
                        .first()
                        .map(|(s, r)| format!("resource '{s}/{}'", r.name))
                });
            if let Some(element) = element {
                return Err(RegistryError::not_extensible(model.name.clone(), element));
            }
        }
        Ok(self.patch)
    }
}
