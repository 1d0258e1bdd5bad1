use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};

use crate::{BuildPath, PathError, Prefix};

/// Maps path prefixes to filesystem roots.
///
/// The resolver is handed to the scheduler at construction; nothing in the
/// core consults process-global state to translate paths.
#[derive(Clone, Debug, Default)]
pub struct PathResolver {
    roots: BTreeMap<Prefix, Utf8PathBuf>,
}

impl PathResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_root(mut self, prefix: Prefix, root: impl Into<Utf8PathBuf>) -> Self {
        self.roots.insert(prefix, root.into());
        self
    }

    /// Convenience constructor mapping every prefix under one base directory.
    #[must_use]
    pub fn rooted_at(base: impl AsRef<Utf8Path>) -> Self {
        let base = base.as_ref();
        Self::new()
            .with_root(Prefix::Source, base.join("src"))
            .with_root(Prefix::Build, base.join("build"))
            .with_root(Prefix::Intermediate, base.join("intermediate"))
    }

    pub fn root(&self, prefix: Prefix) -> Result<&Utf8Path, PathError> {
        self.roots
            .get(&prefix)
            .map(Utf8PathBuf::as_path)
            .ok_or(PathError::UnmappedPrefix { prefix })
    }

    /// Absolute filesystem location of a build path.
    pub fn to_absolute(&self, path: &BuildPath) -> Result<Utf8PathBuf, PathError> {
        Ok(self.root(path.prefix())?.join(path.relative_path()))
    }

    /// Re-derive the prefixed form of an absolute path printed by a job.
    pub fn to_prefixed(&self, absolute: impl AsRef<str>) -> Result<BuildPath, PathError> {
        let normalized = absolute.as_ref().replace('\\', "/");

        // An already-prefixed path passes through untouched.
        if normalized.starts_with('[') {
            return BuildPath::new(normalized);
        }

        for (prefix, root) in &self.roots {
            let root_str = root.as_str().replace('\\', "/");
            if let Some(rest) = normalized.strip_prefix(&root_str) {
                // A bare string-prefix match is not enough; the remainder
                // must sit on a path component boundary.
                if rest.is_empty() || rest.starts_with('/') {
                    let rest = rest.strip_prefix('/').unwrap_or(rest);
                    return BuildPath::new(format!("{}/{}", prefix.as_str(), rest));
                }
            }
        }

        Err(PathError::OutsideRoots { path: normalized })
    }
}
