use std::collections::BTreeMap;

use bakeline_hash::DataHash;
use bakeline_path::BuildPath;
use tracing::error;

use crate::TransformError;

/// In-memory mapping from prefixed path to content hash.
///
/// Registering the same path twice with the same hash is a no-op;
/// registering it with a different hash is a build-breaking inconsistency
/// and surfaces as an error the caller must not swallow.
#[derive(Clone, Debug, Default)]
pub struct ContentHashCollection {
    hashes: BTreeMap<String, DataHash>,
}

impl ContentHashCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_content_hash(&self, path: &BuildPath) -> bool {
        self.hashes.contains_key(path.as_prefixed_path())
    }

    #[must_use]
    pub fn content_hash(&self, path: &BuildPath) -> Option<DataHash> {
        self.hashes.get(path.as_prefixed_path()).copied()
    }

    /// Record `path -> hash`. Returns `true` when the entry is new.
    pub fn register_content_hash(
        &mut self,
        path: &BuildPath,
        hash: DataHash,
    ) -> Result<bool, TransformError> {
        match self.hashes.get(path.as_prefixed_path()) {
            Some(existing) if *existing == hash => Ok(false),
            Some(existing) => {
                error!(path = %path, existing = %existing, attempted = %hash,
                       "content hash registered twice with different values");
                Err(TransformError::ContentHashConflict {
                    path: path.as_prefixed_path().to_string(),
                    existing: existing.as_text(),
                    attempted: hash.as_text(),
                })
            }
            None => {
                self.hashes
                    .insert(path.as_prefixed_path().to_string(), hash);
                Ok(true)
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DataHash)> {
        self.hashes.iter().map(|(path, hash)| (path.as_str(), *hash))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> BuildPath {
        BuildPath::new(p).unwrap()
    }

    #[test]
    fn register_and_query() {
        let mut collection = ContentHashCollection::new();
        let hash = DataHash::of(b"data");
        assert!(collection
            .register_content_hash(&path("[build]/a.bin"), hash)
            .unwrap());
        assert!(collection.has_content_hash(&path("[build]/a.bin")));
        assert_eq!(collection.content_hash(&path("[build]/a.bin")), Some(hash));
        assert_eq!(collection.content_hash(&path("[build]/b.bin")), None);
    }

    #[test]
    fn same_hash_twice_is_a_noop() {
        let mut collection = ContentHashCollection::new();
        let hash = DataHash::of(b"data");
        assert!(collection
            .register_content_hash(&path("[build]/a.bin"), hash)
            .unwrap());
        assert!(!collection
            .register_content_hash(&path("[build]/a.bin"), hash)
            .unwrap());
    }

    #[test]
    fn different_hash_is_fatal() {
        let mut collection = ContentHashCollection::new();
        collection
            .register_content_hash(&path("[build]/a.bin"), DataHash::of(b"one"))
            .unwrap();
        let err = collection
            .register_content_hash(&path("[build]/a.bin"), DataHash::of(b"two"))
            .unwrap_err();
        assert!(matches!(err, TransformError::ContentHashConflict { .. }));
    }
}
