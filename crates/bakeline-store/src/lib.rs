//! Content-addressed blob storage and the association model.
//!
//! The store is the scheduler's memory between builds. Blobs are addressed
//! by content hash; an *association* is a retrievable triple
//! `(key hash, path) -> content hash` that lets a later build walk from a
//! dependency key to the outputs it produced last time. The scheduler core
//! only ever sees the [`DataStore`] trait; the concrete backends here are
//! an in-memory store and an on-disk store rooted in a directory.

mod fs_store;
mod memory;
mod recorder;

pub use fs_store::FsDataStore;
pub use memory::MemoryDataStore;
pub use recorder::RecordingStore;

use bakeline_hash::DataHash;
use bakeline_path::{BuildFile, BuildPath};
use thiserror::Error;

/// Errors produced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob {file} does not exist in the store")]
    MissingBlob { file: String },

    #[error("store I/O failure at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("store index is corrupt: {0}")]
    CorruptIndex(String),
}

/// Outcome of registering an association.
///
/// `Conflict` means a different content hash was already stored under the
/// same `(key, path)`; whether that is fatal is the caller's decision (it is
/// downgraded to a warning for nondeterministic outputs and log files).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationOutcome {
    Registered,
    AlreadyRegistered,
    Conflict,
}

/// Flags accompanying a blob write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// The blob may be served from a local cache.
    pub allow_caching: bool,
    /// The blob may be uploaded to the remote mirror asynchronously.
    pub allow_async_upload: bool,
}

impl WriteOptions {
    pub const ASYNC_UPLOAD: WriteOptions = WriteOptions {
        allow_caching: false,
        allow_async_upload: true,
    };

    pub const CACHED_ASYNC_UPLOAD: WriteOptions = WriteOptions {
        allow_caching: true,
        allow_async_upload: true,
    };
}

/// The abstract content-addressed store consumed by the scheduler.
pub trait DataStore {
    /// Store a blob under its content hash and remember that `path` now
    /// refers to it. Returns the content hash.
    fn write_data(
        &mut self,
        path: &BuildPath,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<DataHash, StoreError>;

    /// Fetch the blob a pinned file refers to.
    fn read_data(&mut self, file: &BuildFile) -> Result<Vec<u8>, StoreError>;

    /// Whether the blob exists. Also registers the file for asynchronous
    /// upload, which is why callers probe even when they trust the hash.
    fn does_data_exist(&mut self, file: &BuildFile) -> bool;

    /// Record `(key, path) -> content`. A mismatch with an existing entry
    /// yields [`AssociationOutcome::Conflict`] and queues a diagnostic
    /// retrievable via [`DataStore::take_association_errors`].
    fn register_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
        content: DataHash,
    ) -> AssociationOutcome;

    /// Look up the content hash stored under `(key, path)`.
    fn resolve_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
    ) -> Result<Option<DataHash>, StoreError>;

    /// The short-circuit map consulted for `Disabled` transforms.
    fn retrieve_disabled_transform_key_hash(&mut self, config: &str) -> Option<DataHash>;

    /// Record the key hash a disabled transform should reuse next build.
    fn store_disabled_transform_key_hash(&mut self, config: &str, key: DataHash);

    /// Flush pending writes, uploads and index state.
    fn commit_changes(&mut self) -> Result<(), StoreError>;

    /// Drain accumulated association diagnostics.
    fn take_association_errors(&mut self) -> Vec<String>;

    /// Validation errors reported by the storage backend, as
    /// `(prefixed path, message)` pairs. May arrive after commit.
    fn validation_errors(&self) -> Vec<(String, String)>;
}
