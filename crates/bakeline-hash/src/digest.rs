use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::HashError;

/// Width of a [`DataHash`] in bytes.
pub const DIGEST_LEN: usize = 32;

/// A fixed-width content digest with a canonical lowercase-hex text form.
///
/// The all-zero digest is the "unset" value; a [`BuildFile`] whose hash is
/// zero names a path whose content is not yet pinned.
///
/// [`BuildFile`]: https://docs.rs/bakeline-path
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DataHash([u8; DIGEST_LEN]);

impl DataHash {
    /// The unset digest.
    pub const ZERO: DataHash = DataHash([0u8; DIGEST_LEN]);

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        DataHash(bytes)
    }

    /// Digest of a byte slice.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        DataHash(*blake3::hash(data).as_bytes())
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Whether this is the unset digest.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse the hex text form.
    ///
    /// Accepts 32 to 64 hex characters (an even count); shorter digests, as
    /// printed by external jobs with 128-bit hashes, fill the leading bytes
    /// and leave the remainder zero.
    pub fn from_text(text: &str) -> Result<Self, HashError> {
        let len = text.len();
        if len < 32 || len > DIGEST_LEN * 2 || len % 2 != 0 {
            return Err(HashError::InvalidLength {
                len,
                max: DIGEST_LEN * 2,
            });
        }

        let mut bytes = [0u8; DIGEST_LEN];
        for (i, chunk) in text.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_nibble(chunk[0]);
            let lo = hex_nibble(chunk[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => bytes[i] = (hi << 4) | lo,
                _ => {
                    return Err(HashError::InvalidHex {
                        text: text.to_string(),
                    });
                }
            }
        }

        Ok(DataHash(bytes))
    }

    /// Canonical lowercase-hex text form, always 64 characters.
    #[must_use]
    pub fn as_text(&self) -> String {
        let mut out = String::with_capacity(DIGEST_LEN * 2);
        for byte in &self.0 {
            out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0'));
            out.push(char::from_digit(u32::from(byte & 0xf), 16).unwrap_or('0'));
        }
        out
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl fmt::Debug for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataHash({})", self.as_text())
    }
}

impl FromStr for DataHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

impl Serialize for DataHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_text())
    }
}

impl<'de> Deserialize<'de> for DataHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        DataHash::from_text(&text).map_err(serde::de::Error::custom)
    }
}
