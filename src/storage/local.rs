//! Local storage backend: one redb table of string keys to byte values.
//!
//! Every mutation runs in its own write transaction, so each call is atomic
//! with respect to every other call on the same database.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

use super::{KvStore, UpdateFn};

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pollsync_kv");

pub struct LocalStorage {
    db: Database,
}

impl LocalStorage {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let db = Database::create(path)
            .with_context(|| format!("failed to open redb at {}", path.display()))?;
        // Ensure table exists
        let txn = db.begin_write()?;
        {
            let _table = txn.open_table(KV_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Default location: `<data_dir>/pollsync/pollsync.redb`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("pollsync");
        Ok(data_dir.join("pollsync.redb"))
    }
}

impl KvStore for LocalStorage {
    fn backend_name(&self) -> &str {
        "redb"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let rtxn = self.db.begin_read()?;
        let table = rtxn.open_table(KV_TABLE)?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(KV_TABLE)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let rtxn = self.db.begin_read()?;
        let table = rtxn.open_table(KV_TABLE)?;
        let mut entries = Vec::new();
        for item in table.range(prefix..)? {
            let (key, val) = item?;
            if !key.value().starts_with(prefix) {
                break;
            }
            entries.push((key.value().to_string(), val.value().to_vec()));
        }
        Ok(entries)
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<()> {
        let txn = self.db.begin_write()?;
        let outcome = {
            let mut table = txn.open_table(KV_TABLE)?;
            let current = table.get(key)?.map(|v| v.value().to_vec());
            match f(current) {
                Ok(Some(bytes)) => {
                    table.insert(key, bytes.as_slice())?;
                    Ok(())
                }
                Ok(None) => {
                    table.remove(key)?;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        match outcome {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }
}
