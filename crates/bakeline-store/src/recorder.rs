use bakeline_hash::DataHash;
use bakeline_path::{BuildFile, BuildPath};

use crate::{AssociationOutcome, DataStore, StoreError, WriteOptions};

/// A store wrapper that records every `(path, hash)` written through it.
///
/// The scheduler clears the record before invoking a transform and installs
/// whatever accumulated into the transform's output hash table afterwards,
/// so a transform that writes its outputs through the store never has to
/// register hashes by hand. Clearing also guarantees that `.d` and `.log`
/// writes from scheduler bookkeeping are never misattributed to the next
/// transform.
pub struct RecordingStore {
    inner: Box<dyn DataStore>,
    written: Vec<(BuildPath, DataHash)>,
}

impl RecordingStore {
    #[must_use]
    pub fn new(inner: Box<dyn DataStore>) -> Self {
        RecordingStore {
            inner,
            written: Vec::new(),
        }
    }

    /// Drop any writes recorded so far.
    pub fn clear_written(&mut self) {
        self.written.clear();
    }

    /// Drain the recorded writes.
    pub fn take_written(&mut self) -> Vec<(BuildPath, DataHash)> {
        std::mem::take(&mut self.written)
    }
}

impl DataStore for RecordingStore {
    fn write_data(
        &mut self,
        path: &BuildPath,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<DataHash, StoreError> {
        let hash = self.inner.write_data(path, data, options)?;
        self.written.push((path.clone(), hash));
        Ok(hash)
    }

    fn read_data(&mut self, file: &BuildFile) -> Result<Vec<u8>, StoreError> {
        self.inner.read_data(file)
    }

    fn does_data_exist(&mut self, file: &BuildFile) -> bool {
        self.inner.does_data_exist(file)
    }

    fn register_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
        content: DataHash,
    ) -> AssociationOutcome {
        self.inner.register_association(key, path, content)
    }

    fn resolve_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
    ) -> Result<Option<DataHash>, StoreError> {
        self.inner.resolve_association(key, path)
    }

    fn retrieve_disabled_transform_key_hash(&mut self, config: &str) -> Option<DataHash> {
        self.inner.retrieve_disabled_transform_key_hash(config)
    }

    fn store_disabled_transform_key_hash(&mut self, config: &str, key: DataHash) {
        self.inner.store_disabled_transform_key_hash(config, key);
    }

    fn commit_changes(&mut self) -> Result<(), StoreError> {
        self.inner.commit_changes()
    }

    fn take_association_errors(&mut self) -> Vec<String> {
        self.inner.take_association_errors()
    }

    fn validation_errors(&self) -> Vec<(String, String)> {
        self.inner.validation_errors()
    }
}

#[cfg(test)]
mod tests {
    use crate::MemoryDataStore;

    use super::*;

    #[test]
    fn records_writes_until_cleared() {
        let mut store = RecordingStore::new(Box::new(MemoryDataStore::new()));
        let path = BuildPath::new("[build]/a.bin").unwrap();
        let hash = store
            .write_data(&path, b"data", WriteOptions::default())
            .unwrap();

        let written = store.take_written();
        assert_eq!(written, vec![(path.clone(), hash)]);
        assert!(store.take_written().is_empty());

        store.write_data(&path, b"data", WriteOptions::default()).unwrap();
        store.clear_written();
        assert!(store.take_written().is_empty());
    }
}
