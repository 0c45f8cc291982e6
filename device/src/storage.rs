use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use ortus_common::{KeyValueStore, StoreError, StoredValue};

/// One namespace persisted as `<data_dir>/<namespace>.json`. Writes are
/// staged in memory and reach the file only on `commit`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    committed: BTreeMap<String, StoredValue>,
    staged: BTreeMap<String, StoredValue>,
}

impl JsonFileStore {
    pub fn open(data_dir: &Path, namespace: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{namespace}.json"));

        let committed = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        tracing::debug!(path = %path.display(), "opened store namespace");
        Ok(Self {
            path,
            staged: committed.clone(),
            committed,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.staged.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.staged.remove(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.staged == self.committed {
            return Ok(());
        }

        let payload = serde_json::to_vec_pretty(&self.staged)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, payload)?;
        std::fs::rename(&temp, &self.path)?;
        self.committed = self.staged.clone();
        Ok(())
    }
}
