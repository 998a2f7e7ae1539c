//! The registry facade.

use crate::config::RegistryConfig;
use crate::diff;
use crate::error::{RegistryError, RegistryResult};
use crate::instances::{Acquired, InstanceStore, ProviderHandle};
use crate::links;
use crate::notifier::{ChangeNotifier, NoopNotifier, deliver_all};
use crate::schema::{SchemaPatch, SchemaRegistry};
use parking_lot::{RwLock, RwLockReadGuard};
use sensorgate_model::{
    ModelDef, ModelOrigin, Provider, ProviderUpdate, ResourceDef, ServiceDef, TypePackage,
};
use sensorgate_storage::{PersistenceManager, Snapshot};
use sensorgate_types::{ChangeEvent, Clock, SystemClock, Timestamp, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a low-level update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// State changed and events were delivered.
    Applied,
    /// The write matched the stored state.
    Unchanged,
    /// The write was older than the stored value and was dropped.
    Stale,
}

/// Builds a [`Registry`] from its collaborators.
pub struct RegistryBuilder {
    persistence: Arc<dyn PersistenceManager>,
    config: RegistryConfig,
    notifier: Arc<dyn ChangeNotifier>,
    clock: Arc<dyn Clock>,
}

impl RegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Loads the persisted state and makes sure the self provider exists.
    ///
    /// Loading emits no change events.
    pub fn build(self) -> RegistryResult<Registry> {
        let Self {
            persistence,
            config,
            notifier,
            clock,
        } = self;
        let snapshot = persistence.load_all()?;
        let loaded_models = snapshot.models.len();
        let loaded_providers = snapshot.providers.len();

        let mut schema = SchemaRegistry::new();
        for model in snapshot.models {
            let name = model.name.clone();
            if !schema.restore(model) {
                warn!(model = %name, "skipping duplicate persisted model");
            }
        }
        let self_model = match schema.model(&config.self_model) {
            Some(model) => Arc::clone(model),
            None => schema.create_model(&config.self_model, clock.now())?,
        };

        let instances = InstanceStore::new();
        for provider in snapshot.providers {
            if schema.model(provider.model()).is_none() {
                warn!(provider = %provider.id, model = provider.model(), "provider has no model");
            }
            if let Err(e) = instances.insert(provider) {
                warn!(error = %e, "skipping persisted provider");
            }
        }
        match instances.model_of(&config.self_provider_id) {
            None => {
                instances.insert(Provider::new(
                    config.self_provider_id.clone(),
                    self_model.name.clone(),
                    self_model.package_uri().map(str::to_string),
                ))?;
            }
            Some(model) if model != self_model.name => {
                warn!(
                    provider = %config.self_provider_id,
                    %model,
                    "self provider has an unexpected model"
                );
            }
            Some(_) => {}
        }

        info!(
            models = loaded_models,
            providers = loaded_providers,
            self_provider = %config.self_provider_id,
            "registry loaded"
        );
        Ok(Registry {
            config,
            gate: RwLock::new(false),
            schema: RwLock::new(schema),
            instances,
            persistence,
            notifier,
            clock,
        })
    }
}

/// Model and instance registry.
///
/// All entry points take `&self` and may be called from any thread. Writes to
/// different providers proceed in parallel; writes to one provider are
/// serialized, and their events are delivered while that provider is held.
pub struct Registry {
    config: RegistryConfig,
    /// Set once shut down. Mutations hold it shared for their whole run.
    gate: RwLock<bool>,
    schema: RwLock<SchemaRegistry>,
    instances: InstanceStore,
    persistence: Arc<dyn PersistenceManager>,
    notifier: Arc<dyn ChangeNotifier>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    /// Starts building a registry persisted through `persistence`.
    pub fn builder(persistence: Arc<dyn PersistenceManager>) -> RegistryBuilder {
        RegistryBuilder {
            persistence,
            config: RegistryConfig::default(),
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// Opens a registry with default collaborators.
    pub fn open(
        config: RegistryConfig,
        persistence: Arc<dyn PersistenceManager>,
    ) -> RegistryResult<Self> {
        Self::builder(persistence).config(config).build()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn open_gate(&self) -> RegistryResult<RwLockReadGuard<'_, bool>> {
        let gate = self.gate.read();
        if *gate {
            return Err(RegistryError::ShutDown);
        }
        Ok(gate)
    }

    pub fn is_shut_down(&self) -> bool {
        *self.gate.read()
    }

    // ── Schema ───────────────────────────────────────────────────

    pub fn create_model(&self, name: &str, ts: Timestamp) -> RegistryResult<Arc<ModelDef>> {
        let _gate = self.open_gate()?;
        self.schema.write().create_model(name, ts)
    }

    pub fn create_service(
        &self,
        model: &str,
        name: &str,
        ts: Timestamp,
    ) -> RegistryResult<ServiceDef> {
        let _gate = self.open_gate()?;
        self.schema.write().create_service(model, name, ts)
    }

    /// Declares a resource. The definition carries the value type, creation
    /// timestamp and default extra metadata.
    pub fn create_resource(
        &self,
        model: &str,
        service: &str,
        resource: ResourceDef,
    ) -> RegistryResult<ResourceDef> {
        let _gate = self.open_gate()?;
        self.schema.write().create_resource(model, service, resource)
    }

    /// Looks up a model by name or by package URI.
    pub fn get_model(&self, name_or_uri: &str) -> Option<Arc<ModelDef>> {
        self.schema.read().get_model(name_or_uri)
    }

    pub fn models(&self) -> Vec<Arc<ModelDef>> {
        self.schema.read().models().cloned().collect()
    }

    pub fn register_type_package(&self, package: TypePackage) -> RegistryResult<Vec<String>> {
        let _gate = self.open_gate()?;
        let uri = package.uri.clone();
        let names = self.schema.write().register_package(package)?;
        info!(%uri, models = ?names, "registered type package");
        Ok(names)
    }

    /// Removes a package's models. Providers of those models stay in place
    /// without a model definition.
    pub fn unregister_type_package(&self, uri: &str) -> RegistryResult<Vec<String>> {
        let _gate = self.open_gate()?;
        let names = self.schema.write().unregister_package(uri);
        let orphaned: usize = names
            .iter()
            .map(|name| self.instances.of_model(name).len())
            .sum();
        if orphaned > 0 {
            warn!(%uri, orphaned, "unregistered package still has providers");
        }
        info!(%uri, models = ?names, "unregistered type package");
        Ok(names)
    }

    // ── Instances ────────────────────────────────────────────────

    /// Creates an empty provider of an existing model.
    pub fn create_provider(
        &self,
        model: &str,
        id: &str,
        ts: Timestamp,
    ) -> RegistryResult<ProviderHandle> {
        let _gate = self.open_gate()?;
        let model_def = self
            .schema
            .read()
            .model(model)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownModel(model.to_string()))?;
        let acquired = self.instances.create(Provider::new(
            id,
            model,
            model_def.package_uri().map(str::to_string),
        ))?;
        debug!(model, provider = id, %ts, "created provider");
        let event = ChangeEvent::ProviderAdded {
            target: diff::provider_ref(&model_def, id),
        };
        deliver_all(self.notifier.as_ref(), &[event])?;
        Ok(acquired.handle)
    }

    pub fn get_provider(&self, id: &str) -> Option<ProviderHandle> {
        self.instances.get(id)
    }

    /// Looks up a provider only if it belongs to `model`.
    pub fn get_provider_in(&self, model: &str, id: &str) -> Option<ProviderHandle> {
        self.instances.get_in(model, id)
    }

    /// Model name of a provider.
    pub fn get_provider_model(&self, id: &str) -> Option<String> {
        self.instances.model_of(id)
    }

    /// All providers in creation order.
    pub fn providers(&self) -> Vec<ProviderHandle> {
        self.instances.all()
    }

    pub fn providers_of(&self, model: &str) -> Vec<ProviderHandle> {
        self.instances.of_model(model)
    }

    /// The built-in provider describing the gateway itself.
    pub fn self_provider(&self) -> Option<ProviderHandle> {
        self.instances.get(&self.config.self_provider_id)
    }

    /// Low-level write of one resource value.
    ///
    /// Creates whatever is missing: the model (only when `model` is given),
    /// the provider, the service and the resource. `None` or JSON `null`
    /// unsets the resource. `ts` becomes the resource's timestamp.
    pub fn update_resource(
        &self,
        model: Option<&str>,
        provider: &str,
        service: &str,
        resource: &str,
        value: Option<Value>,
        ts: Timestamp,
    ) -> RegistryResult<UpdateOutcome> {
        let _gate = self.open_gate()?;
        let value = value.filter(|v| !v.is_null());
        let model = match (self.instances.model_of(provider), model) {
            (Some(existing), Some(requested)) if existing != requested => {
                return Err(RegistryError::DuplicateId {
                    id: provider.to_string(),
                    model: existing,
                });
            }
            (Some(existing), _) => existing,
            (None, Some(requested)) => requested.to_string(),
            (None, None) => return Err(RegistryError::UnknownProvider(provider.to_string())),
        };
        if value.is_none() && self.instances.get(provider).is_none() {
            return Ok(UpdateOutcome::Unchanged);
        }

        let plan = |schema: &SchemaRegistry| {
            schema.plan_resource(&model, service, resource, value.as_ref(), ts)
        };
        let (model_def, mut acquired) = self.acquire_for_write(provider, &model, plan, |stored| {
            if stored.dynamic_services.contains_key(service) {
                return Err(RegistryError::duplicate(
                    format!("dynamic services of provider '{provider}'"),
                    service,
                ));
            }
            Ok(())
        })?;

        let mut events = Vec::new();
        if acquired.created {
            events.push(ChangeEvent::ProviderAdded {
                target: diff::provider_ref(&model_def, provider),
            });
        }
        let write = diff::write_value(
            &model_def,
            &mut acquired.guard,
            service,
            resource,
            value,
            ts,
            self.config.drop_stale_updates,
        );
        if write.stale {
            debug!(provider, service, resource, %ts, "dropped stale update");
            return Ok(UpdateOutcome::Stale);
        }
        events.extend(write.events);
        if events.is_empty() {
            return Ok(UpdateOutcome::Unchanged);
        }

        debug!(provider, service, resource, events = events.len(), "updated resource");
        deliver_all(self.notifier.as_ref(), &events)?;
        Ok(UpdateOutcome::Applied)
    }

    /// Merges an externally built provider tree into the stored state.
    ///
    /// The tree is the complete desired state: services it omits are
    /// removed, resources without a value are unset. An omitted admin
    /// section keeps the stored one. Returns the stored provider.
    pub fn save(&self, tree: &ProviderUpdate) -> RegistryResult<ProviderHandle> {
        let _gate = self.open_gate()?;
        let now = self.clock.now();
        if let Some(existing) = self.instances.model_of(&tree.id) {
            if existing != tree.model {
                return Err(RegistryError::DuplicateId {
                    id: tree.id.clone(),
                    model: existing,
                });
            }
        }

        let plan = |schema: &SchemaRegistry| schema.plan_tree(tree, now);
        let (model_def, mut acquired) =
            self.acquire_for_write(&tree.id, &tree.model, plan, |_| Ok(()))?;

        let old = if acquired.created {
            None
        } else {
            Some(&*acquired.guard)
        };
        let merge = diff::merge_provider(&model_def, old, tree, now);
        *acquired.guard = merge.provider;

        debug!(provider = %tree.id, events = merge.events.len(), "merged provider");
        deliver_all(self.notifier.as_ref(), &merge.events)?;
        Ok(acquired.handle)
    }

    /// Removes a provider and reports everything it held as removed.
    pub fn delete_provider(&self, id: &str) -> RegistryResult<()> {
        let _gate = self.open_gate()?;
        if id == self.config.self_provider_id {
            return Err(RegistryError::ProtectedProvider(id.to_string()));
        }
        let handle = self
            .instances
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))?;
        let guard = handle.lock();
        let model_def = self.model_for(&guard);
        let events = diff::removal_events(&model_def, &guard, self.clock.now());

        debug!(provider = id, events = events.len(), "deleted provider");
        deliver_all(self.notifier.as_ref(), &events)?;
        Ok(())
    }

    /// Records a one-sided link from `parent` to `child`. Returns false if
    /// the link already existed.
    pub fn link_providers(&self, parent: &str, child: &str, ts: Timestamp) -> RegistryResult<bool> {
        let _gate = self.open_gate()?;
        let mut acquired = self.instances.lock_existing(parent)?;
        let changed = links::link(&mut acquired.guard, child);
        debug!(parent, child, %ts, changed, "linked providers");
        Ok(changed)
    }

    /// Removes a link. Returns false if there was none.
    pub fn unlink_providers(
        &self,
        parent: &str,
        child: &str,
        ts: Timestamp,
    ) -> RegistryResult<bool> {
        let _gate = self.open_gate()?;
        let mut acquired = self.instances.lock_existing(parent)?;
        let changed = links::unlink(&mut acquired.guard, child);
        debug!(parent, child, %ts, changed, "unlinked providers");
        Ok(changed)
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Copy of the whole registry state.
    pub fn snapshot(&self) -> Snapshot {
        let models = self
            .schema
            .read()
            .models()
            .map(|m| ModelDef::clone(m))
            .collect();
        let providers = self
            .instances
            .all()
            .iter()
            .map(ProviderHandle::snapshot)
            .collect();
        Snapshot { models, providers }
    }

    /// Persists the current state without shutting down.
    pub fn save_snapshot(&self) -> RegistryResult<()> {
        let _gate = self.open_gate()?;
        let snapshot = self.snapshot();
        self.persistence.save_all(&snapshot)?;
        debug!(providers = snapshot.providers.len(), "saved snapshot");
        Ok(())
    }

    /// Waits for in-flight mutations, persists the state and refuses any
    /// further mutation. Calling it again is a no-op.
    ///
    /// The registry stays shut down even if persisting fails.
    pub fn shut_down(&self) -> RegistryResult<()> {
        let mut gate = self.gate.write();
        if *gate {
            return Ok(());
        }
        *gate = true;
        let snapshot = self.snapshot();
        self.persistence.save_all(&snapshot)?;
        info!(
            models = snapshot.models.len(),
            providers = snapshot.providers.len(),
            "registry shut down"
        );
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────

    /// Locks the provider `id` of `model`, creating it if absent, then runs
    /// `check` on it and grows the schema while it is held. A provider created
    /// here is removed again if either step fails, so a failed write leaves
    /// both the schema and the instances as they were.
    fn acquire_for_write(
        &self,
        id: &str,
        model: &str,
        plan: impl Fn(&SchemaRegistry) -> RegistryResult<SchemaPatch>,
        check: impl FnOnce(&Provider) -> RegistryResult<()>,
    ) -> RegistryResult<(Arc<ModelDef>, Acquired)> {
        // reject what is already known to fail before anything is created
        let package_uri = {
            let schema = self.schema.read();
            plan(&*schema)?;
            schema
                .model(model)
                .and_then(|m| m.package_uri())
                .map(str::to_string)
        };
        let mut acquired = self
            .instances
            .acquire(id, model, || Provider::new(id, model, package_uri))?;

        let grown = check(&*acquired.guard).and_then(|()| self.extend_schema(&plan));
        match grown {
            Ok(model_def) => {
                if acquired.created {
                    acquired.guard.admin.model_package_uri =
                        model_def.package_uri().map(str::to_string);
                }
                Ok((model_def, acquired))
            }
            Err(e) => {
                if acquired.created {
                    self.instances.remove(id);
                    debug!(provider = id, error = %e, "rolled back created provider");
                }
                Err(e)
            }
        }
    }

    /// Plans under the read lock and only takes the write lock when the
    /// schema actually has to grow.
    fn extend_schema(
        &self,
        plan: impl Fn(&SchemaRegistry) -> RegistryResult<SchemaPatch>,
    ) -> RegistryResult<Arc<ModelDef>> {
        {
            let schema = self.schema.read();
            let patch = plan(&*schema)?;
            if patch.is_empty() {
                if let Some(model) = schema.model(patch.model()) {
                    return Ok(Arc::clone(model));
                }
            }
        }
        let mut schema = self.schema.write();
        let patch = plan(&*schema)?;
        schema.apply(patch)
    }

    /// The model of a stored provider, or a stand-in if its package was
    /// unregistered.
    fn model_for(&self, provider: &Provider) -> Arc<ModelDef> {
        if let Some(model) = self.schema.read().model(provider.model()) {
            return Arc::clone(model);
        }
        let origin = match provider.package_uri() {
            Some(uri) => ModelOrigin::Package {
                uri: uri.to_string(),
            },
            None => ModelOrigin::Dynamic,
        };
        Arc::new(ModelDef::new(provider.model(), origin, Timestamp::EPOCH))
    }
}
