use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use zeroize::Zeroizing;

use crate::crypto::{self, SealingKey};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("data directory not found")]
    NoDataDir,
    #[error("store lock poisoned")]
    Poisoned,
}

/// String key/value persistence the rest of the crate is written against.
///
/// Every call is one blocking round trip. Callers read-modify-write whole
/// JSON values, so two writers racing on the same key lose one update.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.remove_item(key)?;
        }
        Ok(())
    }

    fn get_all_keys(&self) -> Result<Vec<String>, StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove_item(key)
    }

    fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        (**self).multi_remove(keys)
    }

    fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).get_all_keys()
    }
}

/// In-process store, used by tests and as a scratch backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

/// Single-file store. The whole map is rewritten on every mutation and,
/// when opened with a passphrase, sealed with a [`SealingKey`] derived once
/// at open.
pub struct FileStore {
    path: PathBuf,
    key: Option<SealingKey>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Default location of the store file under the platform data directory.
    pub fn default_path() -> Result<PathBuf, StorageError> {
        let dir = dirs::data_local_dir()
            .ok_or(StorageError::NoDataDir)?
            .join("flowcast");
        Ok(dir.join("store.flowcast"))
    }

    /// Open (or lazily create) a plain JSON store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::load(path.into(), None)
    }

    /// Open (or lazily create) a passphrase-encrypted store at `path`.
    /// A wrong passphrase is an error; unreadable JSON behind the right one
    /// is not.
    pub fn encrypted(path: impl Into<PathBuf>, passphrase: String) -> Result<Self, StorageError> {
        Self::load(path.into(), Some(Zeroizing::new(passphrase)))
    }

    fn load(path: PathBuf, passphrase: Option<Zeroizing<String>>) -> Result<Self, StorageError> {
        let raw = if path.exists() { Some(fs::read(&path)?) } else { None };

        let (key, json) = match (passphrase, raw) {
            (Some(p), Some(raw)) => {
                let key = SealingKey::for_sealed(&p, &raw)?;
                let json = Zeroizing::new(key.open(&raw)?);
                (Some(key), Some(json))
            }
            (Some(p), None) => (Some(SealingKey::generate(&p)?), None),
            (None, raw) => (None, raw.map(Zeroizing::new)),
        };

        let parsed = json.map(|json| serde_json::from_slice::<BTreeMap<String, String>>(&json));
        let entries = match parsed {
            Some(Ok(entries)) => entries,
            Some(Err(e)) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "store file unreadable, starting empty"
                );
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file store");

        Ok(Self {
            path,
            key,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file and forget every entry.
    pub fn wipe(&self) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        entries.clear();
        Ok(())
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Apply `change` to a copy of the map and swap it in only once the copy
    /// is on disk. Nothing is written when `change` returns false.
    fn commit(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        let mut next = entries.clone();
        if change(&mut next) {
            self.flush(&next)?;
            *entries = next;
        }
        Ok(())
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let json = Zeroizing::new(serde_json::to_vec(entries)?);
        let bytes = match self.key.as_ref() {
            Some(key) => key.seal(&json)?,
            None => json.to_vec(),
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.commit(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
            true
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.commit(|entries| entries.remove(key).is_some())
    }

    fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        self.commit(|entries| {
            let before = entries.len();
            for key in keys {
                entries.remove(key);
            }
            entries.len() != before
        })
    }

    fn get_all_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set_item("a", "1").unwrap();
        store.set_item("b", "2").unwrap();
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));

        store.multi_remove(&["a".to_owned(), "missing".to_owned()]).unwrap();
        assert_eq!(store.get_all_keys().unwrap(), vec!["b".to_owned()]);
        assert!(store.get_item("a").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set_item("config", "{\"x\":1}").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_item("config").unwrap().as_deref(), Some("{\"x\":1}"));

        reopened.wipe().unwrap();
        assert!(!path.exists());
        assert!(reopened.get_all_keys().unwrap().is_empty());
    }

    #[test]
    fn encrypted_store_needs_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.flowcast");

        let store = FileStore::encrypted(&path, "correct horse".to_owned()).unwrap();
        store.set_item("records", "[]").unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("records"));

        assert!(FileStore::encrypted(&path, "wrong".to_owned()).is_err());
        let reopened = FileStore::encrypted(&path, "correct horse".to_owned()).unwrap();
        assert_eq!(reopened.get_item("records").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn failed_write_leaves_entries_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set_item("flowcast.records", "[]").unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(store.set_item("flowcast.config", "{}").is_err());
        assert!(store.remove_item("flowcast.records").is_err());
        assert!(store.get_item("flowcast.config").unwrap().is_none());
        assert_eq!(store.get_item("flowcast.records").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn encrypted_store_derives_key_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.flowcast");

        let store = FileStore::encrypted(&path, "pass".to_owned()).unwrap();
        store.set_item("a", "1").unwrap();
        let first = fs::read(&path).unwrap();
        store.set_item("b", "2").unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first[..32], second[..32]);
        assert_ne!(first[32..44], second[32..44]);
    }

    #[test]
    fn corrupt_plain_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{\"flowcast.config\":").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get_all_keys().unwrap().is_empty());
        store.set_item("flowcast.config", "{}").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_all_keys().unwrap(), vec!["flowcast.config".to_owned()]);
    }
}
