use crate::{PersistenceManager, Snapshot, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// In-process snapshot store.
///
/// Cloning yields a handle to the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Snapshot>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `snapshot`.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
            saves: Arc::default(),
        }
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().clone()
    }

    /// Number of completed `save_all` calls.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl PersistenceManager for MemoryStore {
    fn load_all(&self) -> StorageResult<Snapshot> {
        Ok(self.inner.lock().clone())
    }

    fn save_all(&self, snapshot: &Snapshot) -> StorageResult<()> {
        *self.inner.lock() = snapshot.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}
