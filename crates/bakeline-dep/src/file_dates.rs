use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::trace;

use crate::DepError;

/// Caches file modification timestamps (unix seconds).
///
/// Successful reads are cached for the lifetime of the build; failures are
/// not, since a file may appear while the build runs.
#[derive(Debug, Default)]
pub struct FileDateCache {
    times: HashMap<Utf8PathBuf, i64>,
}

impl FileDateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a timestamp obtained elsewhere, e.g. from directory enumeration.
    pub fn add_file_time(&mut self, path: impl Into<Utf8PathBuf>, timestamp: i64) {
        self.times.insert(path.into(), timestamp);
    }

    /// Modification time of `path`, from cache or the filesystem.
    pub fn read_file_time(&mut self, path: &Utf8Path) -> Option<i64> {
        if let Some(cached) = self.times.get(path) {
            return Some(*cached);
        }

        let timestamp = mtime(path)?;
        self.times.insert(path.to_owned(), timestamp);
        Some(timestamp)
    }

    /// Batched timestamp reads, one result slot per requested path.
    pub fn read_multiple_file_times(&mut self, paths: &[Utf8PathBuf]) -> Vec<Option<i64>> {
        paths.iter().map(|p| self.read_file_time(p)).collect()
    }

    /// Enumerate the files directly inside `dir`, returning their names and
    /// timestamps in name-sorted order and seeding the cache with each.
    pub fn read_dir_file_times(
        &mut self,
        dir: &Utf8Path,
    ) -> Result<BTreeMap<String, i64>, DepError> {
        let entries = fs::read_dir(dir).map_err(|source| DepError::DirEnumeration {
            dir: dir.to_string(),
            source,
        })?;

        let mut found = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|source| DepError::DirEnumeration {
                dir: dir.to_string(),
                source,
            })?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                trace!(dir = %dir, "skipping non-UTF8 file name");
                continue;
            };
            let path = dir.join(&name);
            if let Some(timestamp) = mtime(&path) {
                self.times.insert(path, timestamp);
                found.insert(name, timestamp);
            }
        }

        Ok(found)
    }

    pub fn file_exists(&mut self, path: &Utf8Path) -> bool {
        self.read_file_time(path).is_some()
    }
}

fn mtime(path: &Utf8Path) -> Option<i64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    match modified.duration_since(UNIX_EPOCH) {
        Ok(duration) => Some(duration.as_secs() as i64),
        Err(_) => Some(0),
    }
}
