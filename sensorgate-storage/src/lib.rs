//! Snapshot persistence for SensorGate.
//!
//! The registry drives persistence through the [`PersistenceManager`]
//! contract: one [`PersistenceManager::load_all`] at construction, one
//! [`PersistenceManager::save_all`] per save point (at the latest on
//! shutdown). Stores hold whole [`Snapshot`]s; there is no incremental
//! write path.
//!
//! # Stores
//!
//! - [`MemoryStore`] keeps the snapshot in process. Clones share state, so a
//!   registry can be shut down and a fresh one started against the same store.
//! - [`SqliteStore`] keeps models and providers as JSON rows in SQLite.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use sensorgate_model::{ModelDef, Provider};
use serde::{Deserialize, Serialize};

/// The complete persisted state of a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Model definitions, in registration order.
    pub models: Vec<ModelDef>,
    /// Provider instances, in creation order.
    pub providers: Vec<Provider>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.providers.is_empty()
    }
}

/// Loads and saves registry snapshots.
pub trait PersistenceManager: Send + Sync {
    /// Loads everything previously saved. An empty store yields an empty
    /// snapshot, not an error.
    fn load_all(&self) -> StorageResult<Snapshot>;

    /// Replaces the stored state with `snapshot`.
    fn save_all(&self, snapshot: &Snapshot) -> StorageResult<()>;
}
