//! # retrostore - local key-value sink for RetroTV
//!
//! The epoch mirror, the per-channel broadcast states and the viewer session
//! are all persisted through the same small contract: a durable
//! string → string map ([`KeyValueStore`]).
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`]: process-local, used in tests and as a last resort
//! - [`DirectoryStore`]: one file per key inside a directory, written
//!   atomically (temp file + rename)
//!
//! Writes to a given key are serialized and rate-limited by a
//! [`ThrottledWriter`], which keeps the latest pending value and guarantees
//! a final write on [`ThrottledWriter::flush`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use retrostore::{DirectoryStore, KeyValueStore, ThrottledWriter};
//! use retroutils::SystemClock;
//!
//! let store: Arc<dyn KeyValueStore> = Arc::new(DirectoryStore::new("/tmp/retrotv")?);
//! let writer = ThrottledWriter::new(store, SystemClock::shared(), Duration::from_secs(1));
//! writer.write("session", "{\"channelId\":\"news\"}")?;
//! writer.flush()?;
//! # Ok::<(), retrostore::StoreError>(())
//! ```

pub mod error;
pub mod throttle;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

pub use error::{Result, StoreError};
pub use throttle::ThrottledWriter;

/// Per-key size limit. The sink is assumed to hold at least 1 MiB in total.
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;

/// Durable string → string map.
///
/// Implementations must be safe to share between the components that
/// persist state; writes to different keys are independent.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

fn check_quota(key: &str, value: &str) -> Result<()> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(StoreError::QuotaExceeded {
            key: key.to_string(),
            size: value.len(),
            limit: MAX_VALUE_BYTES,
        });
    }
    Ok(())
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("MemoryStore mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().expect("MemoryStore mutex poisoned");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        check_quota(key, value)?;
        let mut entries = self.entries.lock().expect("MemoryStore mutex poisoned");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("MemoryStore mutex poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per key.
#[derive(Debug)]
pub struct DirectoryStore {
    dir: PathBuf,
    // serializes writers so that two keys never race on the temp file name
    write_lock: Mutex<()>,
}

impl DirectoryStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            || key.starts_with('.')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for DirectoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        check_quota(key, value)?;
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{}.tmp", key));

        let _guard = self.write_lock.lock().expect("DirectoryStore mutex poisoned");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!(key = key, bytes = value.len(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert!(store.contains("a").unwrap());
        store.remove("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_quota_is_enforced() {
        let store = MemoryStore::new();
        let big = "x".repeat(MAX_VALUE_BYTES + 1);
        let err = store.set("big", &big).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_directory_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DirectoryStore::new(dir.path()).unwrap();
            store.set("retrotv.epoch", "2024-01-01T00:00:00Z").unwrap();
        }
        let store = DirectoryStore::new(dir.path()).unwrap();
        assert_eq!(
            store.get("retrotv.epoch").unwrap().as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        store.remove("retrotv.epoch").unwrap();
        assert_eq!(store.get("retrotv.epoch").unwrap(), None);
        // removing twice is fine
        store.remove("retrotv.epoch").unwrap();
    }

    #[test]
    fn test_directory_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(StoreError::InvalidKey(_))));
    }
}
