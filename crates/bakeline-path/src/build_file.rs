use std::fmt;

use bakeline_hash::DataHash;
use serde::{Deserialize, Serialize};

use crate::BuildPath;

/// A build path paired with the content hash of its data.
///
/// A zero hash denotes a file whose content is not yet pinned, e.g. a
/// hashed-resource input before the producing transform has run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFile {
    path: BuildPath,
    content_hash: DataHash,
}

impl BuildFile {
    #[must_use]
    pub fn new(path: BuildPath, content_hash: DataHash) -> Self {
        BuildFile { path, content_hash }
    }

    /// A file whose content is not yet pinned.
    #[must_use]
    pub fn unpinned(path: BuildPath) -> Self {
        BuildFile {
            path,
            content_hash: DataHash::ZERO,
        }
    }

    #[must_use]
    pub fn build_path(&self) -> &BuildPath {
        &self.path
    }

    #[must_use]
    pub fn as_prefixed_path(&self) -> &str {
        self.path.as_prefixed_path()
    }

    #[must_use]
    pub fn content_hash(&self) -> DataHash {
        self.content_hash
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        !self.content_hash.is_zero()
    }

    /// The same path with a different pinned hash.
    #[must_use]
    pub fn pinned(&self, content_hash: DataHash) -> BuildFile {
        BuildFile {
            path: self.path.clone(),
            content_hash,
        }
    }
}

impl fmt::Debug for BuildFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildFile({}#{})", self.path, self.content_hash)
    }
}

impl fmt::Display for BuildFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.content_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinning() {
        let path = BuildPath::new("[build]/a.bin").unwrap();
        let file = BuildFile::unpinned(path);
        assert!(!file.is_pinned());

        let hash = DataHash::of(b"data");
        let pinned = file.pinned(hash);
        assert!(pinned.is_pinned());
        assert_eq!(pinned.content_hash(), hash);
        assert_eq!(pinned.as_prefixed_path(), "[build]/a.bin");
    }
}
