use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::StorageError;

const CURRENT_VERSION: i32 = 1;

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";
pub const EXPIRE_AT_KEY: &str = "expireAt";
pub const CURRENT_PROJECT_KEY: &str = "currentProject";

/// Local key-value store backing the persisted session and project selection.
///
/// Values are opaque strings. Absent keys and values that fail to parse are both treated
/// as "unset"; a value that fails to parse is removed on read.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < CURRENT_VERSION {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(())
    }

    pub fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json)
    }

    /// Read and parse `key`. Corrupt values are discarded and the key removed.
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get_raw(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "could not read persisted value");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding corrupt persisted value");
                if let Err(e) = self.remove(key) {
                    warn!(key, error = %e, "could not remove corrupt persisted value");
                }
                None
            }
        }
    }

    /// Best-effort write used by store mutations; failures are logged, never raised.
    pub fn persist_json<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.save_json(key, value) {
            warn!(key, error = %e, "could not persist value");
        }
    }

    pub fn persist_raw(&self, key: &str, value: &str) {
        if let Err(e) = self.set_raw(key, value) {
            warn!(key, error = %e, "could not persist value");
        }
    }

    pub fn forget(&self, key: &str) {
        if let Err(e) = self.remove(key) {
            warn!(key, error = %e, "could not remove persisted value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        name: String,
    }

    #[test]
    fn raw_values_round_trip_and_overwrite() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_raw(TOKEN_KEY).unwrap(), None);

        db.set_raw(TOKEN_KEY, "abc").unwrap();
        db.set_raw(TOKEN_KEY, "def").unwrap();
        assert_eq!(db.get_raw(TOKEN_KEY).unwrap().as_deref(), Some("def"));

        db.remove(TOKEN_KEY).unwrap();
        assert_eq!(db.get_raw(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn corrupt_json_is_discarded_and_removed() {
        let db = Database::open_in_memory().unwrap();
        db.set_raw(CURRENT_PROJECT_KEY, "{not json").unwrap();

        let loaded: Option<Sample> = db.load_json(CURRENT_PROJECT_KEY);
        assert_eq!(loaded, None);
        assert_eq!(db.get_raw(CURRENT_PROJECT_KEY).unwrap(), None);
    }

    #[test]
    fn values_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("tracedash.db");

        {
            let db = Database::open(&path).unwrap();
            db.save_json(USER_KEY, &Sample { id: 7, name: "ana".into() }).unwrap();
        }

        let db = Database::open(&path).unwrap();
        let user: Option<Sample> = db.load_json(USER_KEY);
        assert_eq!(user, Some(Sample { id: 7, name: "ana".into() }));
    }
}
