use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::{DepError, FileDateCache};

/// Recursively collect the files under `search_path`, feeding every
/// discovered timestamp into the cache.
///
/// An empty `allowed_extensions` slice accepts everything except
/// `Thumbs.db`; dotfiles are always skipped.
pub fn gather_files_in_folder(
    found: &mut BTreeSet<Utf8PathBuf>,
    search_path: &Utf8Path,
    allowed_extensions: &[&str],
    cache: &mut FileDateCache,
) -> Result<(), DepError> {
    cache.read_dir_file_times(search_path)?;

    let entries = fs::read_dir(search_path).map_err(|source| DepError::DirEnumeration {
        dir: search_path.to_string(),
        source,
    })?;

    let mut subdirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DepError::DirEnumeration {
            dir: search_path.to_string(),
            source,
        })?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }

        let path = search_path.join(&name);
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            subdirs.push(path);
        } else if file_type.is_file() {
            if name == "Thumbs.db" {
                continue;
            }
            let allowed = allowed_extensions.is_empty()
                || path
                    .extension()
                    .is_some_and(|ext| allowed_extensions.contains(&ext));
            if allowed {
                found.insert(path);
            }
        }
    }

    for subdir in subdirs {
        gather_files_in_folder(found, &subdir, allowed_extensions, cache)?;
    }

    Ok(())
}

/// [`gather_files_in_folder`] keyed by file name.
///
/// Duplicate file names in different folders collapse to one entry.
pub fn gather_files_in_folder_as_map(
    search_path: &Utf8Path,
    allowed_extensions: &[&str],
    cache: &mut FileDateCache,
) -> Result<BTreeMap<String, Utf8PathBuf>, DepError> {
    let mut found = BTreeSet::new();
    gather_files_in_folder(&mut found, search_path, allowed_extensions, cache)?;

    let mut map = BTreeMap::new();
    for path in found {
        if let Some(name) = path.file_name() {
            map.insert(name.to_string(), path.clone());
        }
    }
    Ok(map)
}
