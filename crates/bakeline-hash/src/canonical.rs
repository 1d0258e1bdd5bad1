use serde::Serialize;

use crate::{DataHash, HashError};

/// Emit a value as JCS-canonical JSON (RFC 8785).
///
/// This is the standard way to serialize anything whose hash acts as a key:
/// dependency records, association indices, config snapshots. JCS guarantees
/// deterministic output regardless of field ordering in the source value.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, HashError> {
    let json_value = serde_json::to_value(value)?;
    let bytes = serde_json_canonicalizer::to_vec(&json_value)
        .map_err(|e| HashError::Canonicalize(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| HashError::Canonicalize(e.to_string()))
}

/// BLAKE3 digest of the JCS-canonical JSON form of a value.
pub fn hash_canonical_json<T: Serialize>(value: &T) -> Result<DataHash, HashError> {
    Ok(hash_text(&to_canonical_json(value)?))
}

/// BLAKE3 digest of a UTF-8 string.
#[must_use]
pub fn hash_text(text: &str) -> DataHash {
    DataHash::of(text.as_bytes())
}
