//! Dependency records and file timestamp bookkeeping.
//!
//! A [`SimpleDependency`] is the unit the incremental build hinges on: a flat,
//! key-sorted map describing a transform's input closure. Its canonical JSON
//! form is hashed into the key of an association-store entry, so two builds
//! with the same closure resolve to the same key regardless of which machine
//! produced them.

mod file_dates;
mod record;
mod walk;
mod wildcard;

pub use file_dates::FileDateCache;
pub use record::{DepEntry, SimpleDependency};
pub use walk::{gather_files_in_folder, gather_files_in_folder_as_map};
pub use wildcard::{split_wildcard, wildcard_file_times_hash};

use thiserror::Error;

/// Errors produced by dependency record handling.
#[derive(Debug, Error)]
pub enum DepError {
    #[error("failed to parse dependency record: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Hash(#[from] bakeline_hash::HashError),

    #[error("wildcard dependencies need a concrete extension, not {path:?}")]
    WildcardNeedsExtension { path: String },

    #[error("failed to enumerate {dir}: {source}")]
    DirEnumeration {
        dir: String,
        source: std::io::Error,
    },
}
