use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::is_cache_key;
use crate::crypto::{self, CryptoError};
use crate::storage::{KeyValueStore, StorageError};

pub const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("export is not available on this device")]
    CapabilityUnavailable,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported backup version {0}")]
    UnsupportedVersion(u32),
    #[error("export failed: {0}")]
    Export(String),
}

/// File/share-sheet access. Not every platform build has it, so callers
/// must check [`ExportCapability::is_available`] before handing over bytes.
pub trait ExportCapability {
    fn is_available(&self) -> bool;

    fn share(&self, file_name: &str, bytes: &[u8]) -> Result<(), BackupError>;
}

/// Export target for builds without file or share support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExport;

impl ExportCapability for NoExport {
    fn is_available(&self) -> bool {
        false
    }

    fn share(&self, _file_name: &str, _bytes: &[u8]) -> Result<(), BackupError> {
        Err(BackupError::CapabilityUnavailable)
    }
}

/// Snapshot of every application key in the store. Cache keys are left out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupBundle {
    pub id: Uuid,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub entries: BTreeMap<String, String>,
}

pub fn create_bundle<S: KeyValueStore + ?Sized>(store: &S) -> Result<BackupBundle, BackupError> {
    let mut entries = BTreeMap::new();
    for key in store.get_all_keys()? {
        if is_cache_key(&key) {
            continue;
        }
        if let Some(value) = store.get_item(&key)? {
            entries.insert(key, value);
        }
    }
    Ok(BackupBundle {
        id: Uuid::new_v4(),
        version: BACKUP_FORMAT_VERSION,
        created_at: Utc::now(),
        entries,
    })
}

pub fn seal_bundle(bundle: &BackupBundle, passphrase: &str) -> Result<Vec<u8>, BackupError> {
    let json = serde_json::to_vec(bundle)?;
    Ok(crypto::encrypt(passphrase, &json)?)
}

pub fn open_bundle(sealed: &[u8], passphrase: &str) -> Result<BackupBundle, BackupError> {
    let json = crypto::decrypt(passphrase, sealed)?;
    let bundle: BackupBundle = serde_json::from_slice(&json)?;
    if bundle.version != BACKUP_FORMAT_VERSION {
        return Err(BackupError::UnsupportedVersion(bundle.version));
    }
    Ok(bundle)
}

/// Seal the store's application data and hand it to `exporter`.
/// Fails with [`BackupError::CapabilityUnavailable`] before touching the
/// store when the exporter is not usable.
pub fn export_backup<S, E>(store: &S, exporter: &E, passphrase: &str) -> Result<Uuid, BackupError>
where
    S: KeyValueStore + ?Sized,
    E: ExportCapability + ?Sized,
{
    if !exporter.is_available() {
        return Err(BackupError::CapabilityUnavailable);
    }

    let bundle = create_bundle(store)?;
    let sealed = seal_bundle(&bundle, passphrase)?;
    let file_name = format!("flowcast-backup-{}.flowcast", bundle.created_at.format("%Y%m%d"));
    exporter.share(&file_name, &sealed)?;

    tracing::info!(backup_id = %bundle.id, keys = bundle.entries.len(), "backup exported");
    Ok(bundle.id)
}

/// Restore a sealed backup into `store`, overwriting keys it contains.
/// Returns the number of keys written.
pub fn import_backup<S: KeyValueStore + ?Sized>(
    store: &S,
    sealed: &[u8],
    passphrase: &str,
) -> Result<usize, BackupError> {
    let bundle = open_bundle(sealed, passphrase)?;
    for (key, value) in &bundle.entries {
        store.set_item(key, value)?;
    }
    tracing::info!(backup_id = %bundle.id, keys = bundle.entries.len(), "backup restored");
    Ok(bundle.entries.len())
}
