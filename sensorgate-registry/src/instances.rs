//! Provider instance storage.
//!
//! Each provider sits behind its own mutex in a slot map keyed by a creation
//! sequence number. The id and model indexes map to slot numbers and sit
//! behind a single `RwLock`. Writers to different providers only contend on
//! the index briefly. Deleting a provider frees its slot entry; slot numbers
//! are never handed out twice.
//!
//! Lock order: index, then provider, then schema. The index lock is never
//! held while waiting on the mutex of a provider that already existed, so a
//! provider lock may be held while reading the index or removing that
//! provider from it.

use crate::error::{RegistryError, RegistryResult};
use indexmap::IndexSet;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use sensorgate_model::Provider;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Exclusive access to a stored provider.
pub(crate) type ProviderGuard = ArcMutexGuard<RawMutex, Provider>;

/// A stable handle to a stored provider.
///
/// Two lookups of the same provider yield handles that are
/// [`ptr_eq`](Self::ptr_eq). A handle stays readable after its provider was
/// deleted and then shows the last state.
#[derive(Clone)]
pub struct ProviderHandle {
    slot: usize,
    cell: Arc<Mutex<Provider>>,
}

impl ProviderHandle {
    /// Creation sequence number of the provider. Never reused.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Copy of the current provider state.
    pub fn snapshot(&self) -> Provider {
        self.cell.lock().clone()
    }

    /// Runs `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&Provider) -> R) -> R {
        f(&self.cell.lock())
    }

    pub fn id(&self) -> String {
        self.read(|p| p.id.clone())
    }

    /// True if both handles refer to the same stored provider.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub(crate) fn lock(&self) -> ProviderGuard {
        self.cell.lock_arc()
    }
}

impl PartialEq for ProviderHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ProviderHandle {}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// A provider locked for writing.
pub(crate) struct Acquired {
    pub handle: ProviderHandle,
    pub guard: ProviderGuard,
    /// The provider did not exist before this call.
    pub created: bool,
}

#[derive(Debug, Clone)]
struct IdEntry {
    slot: usize,
    model: String,
}

#[derive(Default)]
struct Index {
    /// Live providers in creation order.
    slots: BTreeMap<usize, Arc<Mutex<Provider>>>,
    next_slot: usize,
    by_id: HashMap<String, IdEntry>,
    /// Model name → provider ids, in creation order.
    by_model: HashMap<String, IndexSet<String>>,
}

impl Index {
    fn handle(&self, slot: usize) -> Option<ProviderHandle> {
        self.slots.get(&slot).map(|cell| ProviderHandle {
            slot,
            cell: Arc::clone(cell),
        })
    }

    fn lookup(&self, id: &str) -> Option<(ProviderHandle, String)> {
        let entry = self.by_id.get(id)?;
        Some((self.handle(entry.slot)?, entry.model.clone()))
    }

    fn push(&mut self, provider: Provider) -> ProviderHandle {
        let slot = self.next_slot;
        self.next_slot += 1;
        let id = provider.id.clone();
        let model = provider.model().to_string();
        let cell = Arc::new(Mutex::new(provider));
        self.slots.insert(slot, Arc::clone(&cell));
        self.by_model
            .entry(model.clone())
            .or_default()
            .insert(id.clone());
        self.by_id.insert(id, IdEntry { slot, model });
        ProviderHandle { slot, cell }
    }
}

/// Owns every provider instance.
#[derive(Default)]
pub struct InstanceStore {
    index: RwLock<Index>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored providers.
    pub fn len(&self) -> usize {
        self.index.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<ProviderHandle> {
        self.index.read().lookup(id).map(|(handle, _)| handle)
    }

    /// Looks up a provider only if it belongs to `model`.
    pub fn get_in(&self, model: &str, id: &str) -> Option<ProviderHandle> {
        self.index
            .read()
            .lookup(id)
            .filter(|(_, m)| m == model)
            .map(|(handle, _)| handle)
    }

    /// Model name of a provider, from the reverse index.
    pub fn model_of(&self, id: &str) -> Option<String> {
        self.index.read().by_id.get(id).map(|e| e.model.clone())
    }

    /// All providers in creation order.
    pub fn all(&self) -> Vec<ProviderHandle> {
        self.index
            .read()
            .slots
            .iter()
            .map(|(&slot, cell)| ProviderHandle {
                slot,
                cell: Arc::clone(cell),
            })
            .collect()
    }

    /// Providers of one model in creation order.
    pub fn of_model(&self, model: &str) -> Vec<ProviderHandle> {
        let index = self.index.read();
        index
            .by_model
            .get(model)
            .into_iter()
            .flatten()
            .filter_map(|id| index.lookup(id).map(|(handle, _)| handle))
            .collect()
    }

    /// Inserts a provider that must not exist yet.
    pub fn insert(&self, provider: Provider) -> RegistryResult<ProviderHandle> {
        let mut index = self.index.write();
        if let Some(entry) = index.by_id.get(&provider.id) {
            return Err(RegistryError::DuplicateId {
                id: provider.id,
                model: entry.model.clone(),
            });
        }
        Ok(index.push(provider))
    }

    /// Inserts a new provider and returns it locked, before any other thread
    /// can observe it unlocked.
    pub(crate) fn create(&self, provider: Provider) -> RegistryResult<Acquired> {
        let mut index = self.index.write();
        if let Some(entry) = index.by_id.get(&provider.id) {
            return Err(RegistryError::DuplicateId {
                id: provider.id,
                model: entry.model.clone(),
            });
        }
        let handle = index.push(provider);
        let guard = handle.lock();
        Ok(Acquired {
            handle,
            guard,
            created: true,
        })
    }

    /// Locks the provider `id` of `model`, creating it with `make` if absent.
    pub(crate) fn acquire(
        &self,
        id: &str,
        model: &str,
        make: impl FnOnce() -> Provider,
    ) -> RegistryResult<Acquired> {
        let mut make = Some(make);
        loop {
            let existing = self.index.read().lookup(id);
            match existing {
                Some((handle, existing_model)) => {
                    if existing_model != model {
                        return Err(RegistryError::DuplicateId {
                            id: id.to_string(),
                            model: existing_model,
                        });
                    }
                    let guard = handle.lock();
                    if self.is_current(id, &handle) {
                        return Ok(Acquired {
                            handle,
                            guard,
                            created: false,
                        });
                    }
                    // deleted while we waited
                }
                None => {
                    let mut index = self.index.write();
                    if index.by_id.contains_key(id) {
                        continue;
                    }
                    let Some(make) = make.take() else {
                        return Err(RegistryError::UnknownProvider(id.to_string()));
                    };
                    let handle = index.push(make());
                    let guard = handle.lock();
                    return Ok(Acquired {
                        handle,
                        guard,
                        created: true,
                    });
                }
            }
        }
    }

    /// Locks an existing provider.
    pub(crate) fn lock_existing(&self, id: &str) -> RegistryResult<Acquired> {
        loop {
            let Some((handle, _)) = self.index.read().lookup(id) else {
                return Err(RegistryError::UnknownProvider(id.to_string()));
            };
            let guard = handle.lock();
            if self.is_current(id, &handle) {
                return Ok(Acquired {
                    handle,
                    guard,
                    created: false,
                });
            }
        }
    }

    /// Removes a provider from the indexes. The returned handle still
    /// gives access to its last state.
    pub fn remove(&self, id: &str) -> Option<ProviderHandle> {
        let mut index = self.index.write();
        let entry = index.by_id.remove(id)?;
        if let Some(ids) = index.by_model.get_mut(&entry.model) {
            ids.shift_remove(id);
            if ids.is_empty() {
                index.by_model.remove(&entry.model);
            }
        }
        let cell = index.slots.remove(&entry.slot)?;
        Some(ProviderHandle {
            slot: entry.slot,
            cell,
        })
    }

    fn is_current(&self, id: &str, handle: &ProviderHandle) -> bool {
        self.index
            .read()
            .by_id
            .get(id)
            .is_some_and(|e| e.slot == handle.slot)
    }
}
