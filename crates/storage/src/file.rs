use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::{KeyValueStorage, StorageError};

/// Storage snapshot kept in a single JSON object file.
///
/// Used by native tools to operate on an exported browser storage dump. Every
/// mutation rewrites the file through a temporary sibling and a rename, so a
/// crash leaves either the old or the new snapshot on disk.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Opens (or lazily creates) the snapshot at `path`.
    ///
    /// An unreadable or unparsable file is treated as empty; it is only
    /// replaced on the first successful write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let items = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&raw) {
                Ok(map) => map
                    .into_iter()
                    .map(|(k, v)| {
                        // Browser dumps store strings; tolerate inlined JSON values too.
                        let s = match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, s)
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("storage file {path:?} is corrupt, starting empty: {e}");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(format!("read {path:?}: {e}"))),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let payload =
            serde_json::to_string_pretty(items).map_err(|e| StorageError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .map_err(|e| StorageError::Io(format!("create {dir:?}: {e}")))?;
        }
        std::fs::write(&tmp, payload).map_err(|e| StorageError::Io(format!("write {tmp:?}: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StorageError::Io(format!("rename {tmp:?}: {e}")))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock();
        let previous = items.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&items) {
            match previous {
                Some(p) => items.insert(key.to_string(), p),
                None => items.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock();
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items.lock().keys().cloned().collect())
    }
}
