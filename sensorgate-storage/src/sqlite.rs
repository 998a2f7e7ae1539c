//! SQLite-backed snapshot store.
//!
//! Models and providers are stored as JSON documents, one row each, with an
//! explicit position column so load order matches save order.

use crate::{PersistenceManager, Snapshot, StorageError, StorageResult};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use sensorgate_model::{ModelDef, Provider};
use std::path::Path;
use tracing::debug;

const FORMAT_VERSION: i64 = 1;

/// Persistent snapshot store backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS models (
                name TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                position INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            ",
        )?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'format_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored {
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES ('format_version', ?1)",
                    params![FORMAT_VERSION.to_string()],
                )?;
            }
            Some(v) => {
                let version: i64 = v
                    .parse()
                    .map_err(|_| StorageError::InvalidData(format!("bad format version '{v}'")))?;
                if version > FORMAT_VERSION {
                    return Err(StorageError::UnsupportedVersion(version));
                }
            }
        }
        Ok(())
    }

    /// Number of stored providers.
    pub fn provider_count(&self) -> StorageResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM providers", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl PersistenceManager for SqliteStore {
    fn load_all(&self) -> StorageResult<Snapshot> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT body FROM models ORDER BY position")?;
        let models = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|body| -> StorageResult<ModelDef> { Ok(serde_json::from_str(&body?)?) })
            .collect::<StorageResult<Vec<_>>>()?;

        let mut stmt = conn.prepare("SELECT body FROM providers ORDER BY position")?;
        let providers = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|body| -> StorageResult<Provider> { Ok(serde_json::from_str(&body?)?) })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!(
            models = models.len(),
            providers = providers.len(),
            "loaded snapshot"
        );
        Ok(Snapshot { models, providers })
    }

    fn save_all(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM models", [])?;
        tx.execute("DELETE FROM providers", [])?;

        for (position, model) in snapshot.models.iter().enumerate() {
            tx.execute(
                "INSERT INTO models (name, position, body) VALUES (?1, ?2, ?3)",
                params![model.name, position as i64, serde_json::to_string(model)?],
            )?;
        }
        for (position, provider) in snapshot.providers.iter().enumerate() {
            tx.execute(
                "INSERT INTO providers (id, model, position, body) VALUES (?1, ?2, ?3, ?4)",
                params![
                    provider.id,
                    provider.model(),
                    position as i64,
                    serde_json::to_string(provider)?
                ],
            )?;
        }
        tx.commit()?;

        debug!(
            models = snapshot.models.len(),
            providers = snapshot.providers.len(),
            "saved snapshot"
        );
        Ok(())
    }
}
