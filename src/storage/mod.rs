//! Local key-value storage for pollsync.
//!
//! - [`LocalStorage`]: redb file on disk (default, survives restarts)
//! - [`MemoryStorage`]: in-process map (tests, throwaway sessions)
//!
//! Every component holds a [`SharedStore`] and all persistence goes through it.
//! Each operation is atomic on its own; [`KvStore::update`] is the only
//! read-modify-write primitive.

pub mod local;
pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Store handle shared by every component.
pub type SharedStore = Arc<dyn KvStore>;

/// Callback for [`KvStore::update`]. Receives the current value and returns
/// the value to write, or `None` to delete the key.
pub type UpdateFn<'a> = dyn FnMut(Option<Vec<u8>>) -> Result<Option<Vec<u8>>> + 'a;

/// Durable byte-oriented key-value store.
pub trait KvStore: Send + Sync {
    /// Human-readable backend name (e.g., "redb", "memory").
    fn backend_name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Atomically read, transform and write back one key.
    ///
    /// If the callback fails nothing is written.
    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<()>;
}

/// JSON helpers on top of [`KvStore`].
///
/// Values that no longer decode are logged and treated as absent, so a
/// corrupt entry degrades to "nothing stored" instead of wedging the client.
pub trait StoreExt: KvStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get(key)?.and_then(|bytes| decode(key, &bytes)))
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes)
    }

    fn update_json<T, F>(&self, key: &str, f: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let mut f = Some(f);
        self.update(key, &mut |current| {
            let f = f
                .take()
                .ok_or_else(|| anyhow::anyhow!("update callback reused for {key}"))?;
            let decoded = current.and_then(|bytes| decode::<T>(key, &bytes));
            match f(decoded) {
                Some(next) => Ok(Some(serde_json::to_vec(&next)?)),
                None => Ok(None),
            }
        })
    }
}

impl<S: KvStore + ?Sized> StoreExt for S {}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Stored value for {} is corrupt, ignoring: {}", key, e);
            None
        }
    }
}
