use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;

use bakeline_hash::DataHash;
use bakeline_path::{BuildFile, BuildPath};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{AssociationOutcome, DataStore, StoreError, WriteOptions};

const INDEX_FILE: &str = "index.json";

/// Serialized store index: associations and the disabled-transform map.
///
/// Association keys are `"<key-hex>#<prefixed-path>"` so the index stays a
/// flat string map in JSON.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    associations: BTreeMap<String, DataHash>,
    disabled_keys: BTreeMap<String, DataHash>,
}

/// A store rooted in a local directory.
///
/// Blobs live under `blobs/<first two hex chars>/<hex>`; the association
/// index is one JSON document, rewritten atomically on commit.
#[derive(Debug)]
pub struct FsDataStore {
    root: Utf8PathBuf,
    index: StoreIndex,
    index_dirty: bool,
    pending_upload: BTreeSet<String>,
    association_errors: Vec<String>,
}

impl FsDataStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("blobs")).map_err(|source| StoreError::Io {
            path: root.to_string(),
            source,
        })?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let text = fs::read_to_string(&index_path).map_err(|source| StoreError::Io {
                path: index_path.to_string(),
                source,
            })?;
            serde_json::from_str(&text).map_err(|e| StoreError::CorruptIndex(e.to_string()))?
        } else {
            StoreIndex::default()
        };

        Ok(FsDataStore {
            root,
            index,
            index_dirty: false,
            pending_upload: BTreeSet::new(),
            association_errors: Vec::new(),
        })
    }

    fn blob_path(&self, hash: DataHash) -> Utf8PathBuf {
        let hex = hash.as_text();
        self.root.join("blobs").join(&hex[..2]).join(&hex)
    }

    fn association_slot(key: DataHash, path: &BuildPath) -> String {
        format!("{}#{}", key, path.as_prefixed_path())
    }

    fn write_atomic(path: &Utf8Path, data: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_string(),
            source,
        };

        let dir = path.parent().unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl DataStore for FsDataStore {
    fn write_data(
        &mut self,
        path: &BuildPath,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<DataHash, StoreError> {
        let hash = DataHash::of(data);
        let blob_path = self.blob_path(hash);
        if !blob_path.exists() {
            Self::write_atomic(&blob_path, data)?;
            trace!(path = %path, hash = %hash, "stored blob");
        }
        if options.allow_async_upload {
            self.pending_upload.insert(path.as_prefixed_path().to_string());
        }
        Ok(hash)
    }

    fn read_data(&mut self, file: &BuildFile) -> Result<Vec<u8>, StoreError> {
        let blob_path = self.blob_path(file.content_hash());
        if !blob_path.exists() {
            return Err(StoreError::MissingBlob {
                file: file.to_string(),
            });
        }
        fs::read(&blob_path).map_err(|source| StoreError::Io {
            path: blob_path.to_string(),
            source,
        })
    }

    fn does_data_exist(&mut self, file: &BuildFile) -> bool {
        let exists = self.blob_path(file.content_hash()).exists();
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
        let slot = Self::association_slot(key, path);
        match self.index.associations.get(&slot) {
            Some(existing) if *existing == content => AssociationOutcome::AlreadyRegistered,
            Some(existing) => {
                self.association_errors.push(format!(
                    "association conflict for {path}#{key}: stored {existing}, attempted {content}"
                ));
                AssociationOutcome::Conflict
            }
            None => {
                self.index.associations.insert(slot, content);
                self.index_dirty = true;
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
            .index
            .associations
            .get(&Self::association_slot(key, path))
            .copied())
    }

    fn retrieve_disabled_transform_key_hash(&mut self, config: &str) -> Option<DataHash> {
        self.index.disabled_keys.get(config).copied()
    }

    fn store_disabled_transform_key_hash(&mut self, config: &str, key: DataHash) {
        self.index.disabled_keys.insert(config.to_string(), key);
        self.index_dirty = true;
    }

    fn commit_changes(&mut self) -> Result<(), StoreError> {
        if self.index_dirty {
            let index_path = self.root.join(INDEX_FILE);
            let json = serde_json::to_vec_pretty(&self.index)
                .map_err(|e| StoreError::CorruptIndex(e.to_string()))?;
            Self::write_atomic(&index_path, &json)?;
            self.index_dirty = false;
            debug!(associations = self.index.associations.len(), "committed store index");
        }
        self.pending_upload.clear();
        Ok(())
    }

    fn take_association_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.association_errors)
    }

    fn validation_errors(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> BuildPath {
        BuildPath::new(p).unwrap()
    }

    #[test]
    fn blobs_and_index_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let hash;
        let key = DataHash::of(b"key");
        {
            let mut store = FsDataStore::open(root.clone()).unwrap();
            hash = store
                .write_data(&path("[build]/a.bin"), b"payload", WriteOptions::default())
                .unwrap();
            store.register_association(key, &path("[build]/a.bin"), hash);
            store.store_disabled_transform_key_hash("cfg", key);
            store.commit_changes().unwrap();
        }

        let mut store = FsDataStore::open(root).unwrap();
        assert!(store.does_data_exist(&BuildFile::new(path("[build]/a.bin"), hash)));
        assert_eq!(
            store
                .resolve_association(key, &path("[build]/a.bin"))
                .unwrap(),
            Some(hash)
        );
        assert_eq!(store.retrieve_disabled_transform_key_hash("cfg"), Some(key));
        assert_eq!(
            store
                .read_data(&BuildFile::new(path("[build]/a.bin"), hash))
                .unwrap(),
            b"payload"
        );
    }

    #[test]
    fn uncommitted_index_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let key = DataHash::of(b"key");

        {
            let mut store = FsDataStore::open(root.clone()).unwrap();
            store.register_association(key, &path("[build]/a.bin"), DataHash::of(b"v"));
            // No commit.
        }

        let mut store = FsDataStore::open(root).unwrap();
        assert_eq!(
            store
                .resolve_association(key, &path("[build]/a.bin"))
                .unwrap(),
            None
        );
    }
}
