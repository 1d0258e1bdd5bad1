//! Content digests and canonical JSON hashing.
//!
//! Everything in the pipeline that is addressed by content goes through this
//! crate: blobs in the data store, dependency records, association keys. The
//! digest is BLAKE3; JSON-shaped values are canonicalized with JCS (RFC 8785)
//! before hashing so field ordering can never perturb a key hash.

mod canonical;
mod digest;

pub use canonical::{hash_canonical_json, hash_text, to_canonical_json};
pub use digest::{DIGEST_LEN, DataHash};

use thiserror::Error;

/// Errors produced while parsing or computing digests.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("digest text must be 32 to {max} hex characters, got {len}")]
    InvalidLength { len: usize, max: usize },

    #[error("digest text contains a non-hex character: {text:?}")]
    InvalidHex { text: String },

    #[error("failed to serialize value for hashing: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to canonicalize JSON: {0}")]
    Canonicalize(String),
}
