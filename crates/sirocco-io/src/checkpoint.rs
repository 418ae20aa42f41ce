//! Checkpoint store for resumable tracking sessions.
//!
//! The store keeps an opaque string-keyed record of encoded artifacts so it
//! stays ignorant of what the pipeline persists. Batched updates land
//! atomically, which is what lets the pipeline persist artifacts and advance
//! its stage tag in one durability point.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::IoError;

/// Checkpoint filename inside a dataset directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.bin";
/// Directory holding timestamped checkpoint snapshots.
pub const BACKUP_DIR: &str = "backup";

/// Encode a checkpoint artifact with the store's wire configuration.
///
/// # Errors
///
/// Returns [`IoError::Encode`] when the value cannot be encoded.
pub fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, IoError> {
    Ok(bincode::encode_to_vec(value, bincode::config::standard())?)
}

/// String-keyed store of encoded checkpoint artifacts.
pub trait CheckpointStore {
    /// Read the raw bytes of a record, or `None` when absent.
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, IoError>;

    /// Write a batch of records as one durable update.
    fn update_raw(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IoError>;

    /// Drop every record.
    fn clear(&self) -> Result<(), IoError>;

    /// Snapshot the current record set to backup storage.
    fn snapshot_backup(&self) -> Result<(), IoError>;
}

/// Typed accessors over any [`CheckpointStore`].
pub trait CheckpointExt: CheckpointStore {
    /// Decode a record, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Decode`] when the stored bytes do not decode.
    fn get<T: bincode::de::Decode<()>>(&self, key: &str) -> Result<Option<T>, IoError> {
        match self.get_raw(key)? {
            Some(bytes) => {
                let (value, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Decode a record that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::MissingKey`] when the record is absent.
    fn require<T: bincode::de::Decode<()>>(&self, key: &str) -> Result<T, IoError> {
        self.get(key)?
            .ok_or_else(|| IoError::MissingKey(key.to_string()))
    }

    /// Encode and write one record.
    fn update<T: bincode::Encode>(&self, key: &str, value: &T) -> Result<(), IoError> {
        self.update_raw(vec![(key.to_string(), encode(value)?)])
    }
}

impl<S: CheckpointStore + ?Sized> CheckpointExt for S {}

type Record = BTreeMap<String, Vec<u8>>;

/// Checkpoint store backed by a single file in the dataset directory.
///
/// The whole record is rewritten through a temp file and an atomic rename on
/// every update, so a crash leaves either the old or the new checkpoint,
/// never a torn one.
pub struct FsCheckpoint {
    dir: PathBuf,
    path: PathBuf,
    cache: Mutex<Record>,
}

impl FsCheckpoint {
    /// Open the checkpoint of a dataset directory, loading the existing
    /// record when present.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Io`] on filesystem failures and
    /// [`IoError::Decode`] on a corrupt checkpoint file.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IoError> {
        let dir = dir.into();
        let path = dir.join(CHECKPOINT_FILE);
        let cache = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let (record, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())?;
            log::debug!("loaded checkpoint from {}", path.display());
            record
        } else {
            Record::new()
        };
        Ok(Self {
            dir,
            path,
            cache: Mutex::new(cache),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Record>, IoError> {
        self.cache.lock().map_err(|_| IoError::StorePoisoned)
    }

    fn flush(&self, record: &Record) -> Result<(), IoError> {
        let bytes = bincode::encode_to_vec(record, bincode::config::standard())?;
        let tmp = self.dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for FsCheckpoint {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, IoError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn update_raw(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IoError> {
        let mut record = self.lock()?;
        record.extend(entries);
        self.flush(&record)
    }

    fn clear(&self) -> Result<(), IoError> {
        let mut record = self.lock()?;
        record.clear();
        self.flush(&record)
    }

    fn snapshot_backup(&self) -> Result<(), IoError> {
        let record = self.lock()?;
        self.flush(&record)?;
        let backup_dir = self.dir.join(BACKUP_DIR);
        std::fs::create_dir_all(&backup_dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let target = backup_dir.join(format!("checkpoint_{stamp}.bin"));
        std::fs::copy(&self.path, &target)?;
        log::info!("checkpoint backup written to {}", target.display());
        Ok(())
    }
}

/// In-memory checkpoint store for tests and library embedding.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    cache: Mutex<Record>,
}

impl MemoryCheckpoint {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Record>, IoError> {
        self.cache.lock().map_err(|_| IoError::StorePoisoned)
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, IoError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn update_raw(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IoError> {
        self.lock()?.extend(entries);
        Ok(())
    }

    fn clear(&self) -> Result<(), IoError> {
        self.lock()?.clear();
        Ok(())
    }

    fn snapshot_backup(&self) -> Result<(), IoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryCheckpoint::new();
        assert!(store.get::<Vec<u32>>("missing").unwrap().is_none());
        store.update("list", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(store.get::<Vec<u32>>("list").unwrap(), Some(vec![1, 2, 3]));
        store.clear().unwrap();
        assert!(store.get::<Vec<u32>>("list").unwrap().is_none());
    }

    #[test]
    fn require_names_the_missing_record() {
        let store = MemoryCheckpoint::new();
        let err = store.require::<u32>("state").unwrap_err();
        assert!(matches!(err, IoError::MissingKey(key) if key == "state"));
    }

    #[test]
    fn batch_update_applies_every_entry() {
        let store = MemoryCheckpoint::new();
        store
            .update_raw(vec![
                ("a".to_string(), encode(&1u32).unwrap()),
                ("b".to_string(), encode(&2u32).unwrap()),
            ])
            .unwrap();
        assert_eq!(store.get::<u32>("a").unwrap(), Some(1));
        assert_eq!(store.get::<u32>("b").unwrap(), Some(2));
    }

    #[test]
    fn fs_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsCheckpoint::open(dir.path()).unwrap();
            store.update("args", &"hello".to_string()).unwrap();
            store.update("args", &"world".to_string()).unwrap();
        }
        let store = FsCheckpoint::open(dir.path()).unwrap();
        assert_eq!(
            store.get::<String>("args").unwrap(),
            Some("world".to_string())
        );
    }

    #[test]
    fn fs_store_writes_backup_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpoint::open(dir.path()).unwrap();
        store.update("state", &4u8).unwrap();
        store.snapshot_backup().unwrap();
        let backups: Vec<_> = std::fs::read_dir(dir.path().join(BACKUP_DIR))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }
}
