use bakeline_hash::DataHash;
use bakeline_path::{BuildFile, PathResolver};
use bakeline_store::DataStore;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{ContentHashCollection, TransformError};

const TRUNCATION_MARKER: &str = "[FarmAgent] Output exceeded max output size";

static ERROR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ERROR:([^\n]*)").expect("static regex"));
static WARN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"WARN:([^\n]*)").expect("static regex"));
static CONTENT_HASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Content Hash: '([^'\n]+)' \[([0-9a-f]{32,64})\]").expect("static regex")
});

/// Scan captured job output for `ERROR:`, `WARN:` and
/// `Content Hash: '<path>' [<hex>]` lines.
///
/// Every parsed content hash must refer to data present in the store; the
/// existence probe also registers the blob for asynchronous upload. A
/// truncated-output marker produces a single fatal error and the remainder
/// is ignored, since truncation would corrupt dependency tracking.
pub fn parse_job_output(
    build_output: &str,
    warnings: &mut Vec<String>,
    errors: &mut Vec<String>,
    content_hashes: &mut ContentHashCollection,
    resolver: &PathResolver,
    store: &mut dyn DataStore,
) -> Result<(), TransformError> {
    if build_output.contains(TRUNCATION_MARKER) {
        errors.push("Output exceeded max output size".to_string());
        return Ok(());
    }

    for capture in ERROR_RE.captures_iter(build_output) {
        errors.push(capture[1].to_string());
    }

    for capture in WARN_RE.captures_iter(build_output) {
        warnings.push(capture[1].to_string());
    }

    for capture in CONTENT_HASH_RE.captures_iter(build_output) {
        let content_path = resolver.to_prefixed(&capture[1])?;
        let content_hash = DataHash::from_text(&capture[2])?;

        let file = BuildFile::new(content_path.clone(), content_hash);
        if !store.does_data_exist(&file) {
            return Err(TransformError::ClaimedDataMissing {
                file: file.to_string(),
            });
        }

        content_hashes.register_content_hash(&content_path, content_hash)?;
    }

    Ok(())
}
