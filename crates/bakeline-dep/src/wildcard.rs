use bakeline_hash::DataHash;
use camino::{Utf8Path, Utf8PathBuf};
use globset::Glob;
use tracing::debug;

use crate::{DepError, FileDateCache};

/// Split an absolute wildcard dependency such as `/assets/sounds/*.wav`
/// into its directory and extension.
///
/// `*.*` and extensionless wildcards are rejected; without a concrete
/// extension the file-times hash would cover unrelated churn in the folder.
pub fn split_wildcard(absolute: &str) -> Result<(Utf8PathBuf, String), DepError> {
    let path = Utf8Path::new(absolute);
    let extension = path.extension().unwrap_or_default();
    if extension.is_empty() || extension == "*" {
        return Err(DepError::WildcardNeedsExtension {
            path: absolute.to_string(),
        });
    }
    let dir = path
        .parent()
        .ok_or_else(|| DepError::WildcardNeedsExtension {
            path: absolute.to_string(),
        })?;
    Ok((dir.to_owned(), extension.to_string()))
}

/// Hash the modification times of every `*.{extension}` file in `dir`.
///
/// Enumeration is name-sorted, so the digest is stable for an unchanged
/// directory. Each discovered file's timestamp is seeded into the cache.
pub fn wildcard_file_times_hash(
    dir: &Utf8Path,
    extension: &str,
    cache: &mut FileDateCache,
) -> Result<DataHash, DepError> {
    let glob = Glob::new(&format!("*.{extension}"))
        .map_err(|_| DepError::WildcardNeedsExtension {
            path: format!("{dir}/*.{extension}"),
        })?
        .compile_matcher();

    let entries = cache.read_dir_file_times(dir)?;
    let mut times = Vec::with_capacity(entries.len());
    for (name, timestamp) in entries {
        if glob.is_match(&name) {
            debug!(file = %dir.join(&name), timestamp, "wildcard source");
            times.push(timestamp);
        }
    }

    let mut bytes = Vec::with_capacity(times.len() * 8);
    for time in &times {
        bytes.extend_from_slice(&time.to_le_bytes());
    }

    Ok(DataHash::of(&bytes))
}
