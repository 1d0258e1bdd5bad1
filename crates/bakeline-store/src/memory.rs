use std::collections::{BTreeSet, HashMap};

use bakeline_hash::DataHash;
use bakeline_path::{BuildFile, BuildPath};
use tracing::trace;

use crate::{AssociationOutcome, DataStore, StoreError, WriteOptions};

/// An in-process store backed by hash maps.
///
/// This is the store used by the test suites and by single-shot local
/// builds that do not need persistence across processes.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    blobs: HashMap<DataHash, Vec<u8>>,
    associations: HashMap<(DataHash, String), DataHash>,
    disabled_keys: HashMap<String, DataHash>,
    pending_upload: BTreeSet<String>,
    association_errors: Vec<String>,
    validation_errors: Vec<(String, String)>,
    commit_count: usize,
}

impl MemoryDataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commit_count
    }

    /// Number of stored associations.
    #[must_use]
    pub fn association_count(&self) -> usize {
        self.associations.len()
    }

    /// Paths currently queued for asynchronous upload.
    #[must_use]
    pub fn pending_uploads(&self) -> Vec<String> {
        self.pending_upload.iter().cloned().collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryDataStore {
    /// Queue a backend validation error, as replication mirrors do when a
    /// blob fails verification after commit.
    pub fn inject_validation_error(&mut self, prefixed_path: &str, message: &str) {
        self.validation_errors
            .push((prefixed_path.to_string(), message.to_string()));
    }

    /// Drop a stored blob while keeping its associations, simulating an
    /// evicted cache entry.
    pub fn evict_blob(&mut self, hash: DataHash) {
        self.blobs.remove(&hash);
    }
}

impl DataStore for MemoryDataStore {
    fn write_data(
        &mut self,
        path: &BuildPath,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<DataHash, StoreError> {
        let hash = DataHash::of(data);
        self.blobs.entry(hash).or_insert_with(|| data.to_vec());
        if options.allow_async_upload {
            self.pending_upload.insert(path.as_prefixed_path().to_string());
        }
        trace!(path = %path, hash = %hash, "wrote blob");
        Ok(hash)
    }

    fn read_data(&mut self, file: &BuildFile) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .get(&file.content_hash())
            .cloned()
            .ok_or_else(|| StoreError::MissingBlob {
                file: file.to_string(),
            })
    }

    fn does_data_exist(&mut self, file: &BuildFile) -> bool {
        let exists = self.blobs.contains_key(&file.content_hash());
        if exists {
            self.pending_upload
                .insert(file.as_prefixed_path().to_string());
        }
        exists
    }

    fn register_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
        content: DataHash,
    ) -> AssociationOutcome {
        let slot = (key, path.as_prefixed_path().to_string());
        match self.associations.get(&slot) {
            Some(existing) if *existing == content => AssociationOutcome::AlreadyRegistered,
            Some(existing) => {
                self.association_errors.push(format!(
                    "association conflict for {path}#{key}: stored {existing}, attempted {content}"
                ));
                AssociationOutcome::Conflict
            }
            None => {
                self.associations.insert(slot, content);
                AssociationOutcome::Registered
            }
        }
    }

    fn resolve_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
    ) -> Result<Option<DataHash>, StoreError> {
        Ok(self
            .associations
            .get(&(key, path.as_prefixed_path().to_string()))
            .copied())
    }

    fn retrieve_disabled_transform_key_hash(&mut self, config: &str) -> Option<DataHash> {
        self.disabled_keys.get(config).copied()
    }

    fn store_disabled_transform_key_hash(&mut self, config: &str, key: DataHash) {
        self.disabled_keys.insert(config.to_string(), key);
    }

    fn commit_changes(&mut self) -> Result<(), StoreError> {
        self.pending_upload.clear();
        self.commit_count += 1;
        Ok(())
    }

    fn take_association_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.association_errors)
    }

    fn validation_errors(&self) -> Vec<(String, String)> {
        self.validation_errors.clone()
    }
}
