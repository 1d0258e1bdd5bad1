use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::PathError;

/// The known path prefix sentinels.
///
/// `Source` paths name artist-authored inputs on disk and are tracked by
/// modification time; everything else is produced by transforms and tracked
/// by content hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Prefix {
    Source,
    Build,
    Intermediate,
}

impl Prefix {
    pub const ALL: [Prefix; 3] = [Prefix::Source, Prefix::Build, Prefix::Intermediate];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Prefix::Source => "[src]",
            Prefix::Build => "[build]",
            Prefix::Intermediate => "[intermediate]",
        }
    }

    #[must_use]
    pub fn from_sentinel(sentinel: &str) -> Option<Prefix> {
        Prefix::ALL.into_iter().find(|p| p.as_str() == sentinel)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual path beginning with a known prefix sentinel.
///
/// Equality, ordering and hashing are all by the normalized prefixed form,
/// so a `BuildPath` can be used directly as a map key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildPath {
    prefixed: String,
    prefix: Prefix,
}

impl BuildPath {
    /// Parse a prefixed path such as `[build]/levels/city.pak`.
    ///
    /// Backslashes are normalized to forward slashes.
    pub fn new(prefixed: impl AsRef<str>) -> Result<Self, PathError> {
        let normalized = prefixed.as_ref().replace('\\', "/");
        if !normalized.starts_with('[') {
            return Err(PathError::MissingPrefix { path: normalized });
        }
        let Some(close) = normalized.find(']') else {
            return Err(PathError::MissingPrefix { path: normalized });
        };
        let Some(prefix) = Prefix::from_sentinel(&normalized[..=close]) else {
            return Err(PathError::UnknownPrefix { path: normalized });
        };

        Ok(BuildPath {
            prefixed: normalized,
            prefix,
        })
    }

    #[must_use]
    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// The normalized prefixed form, the path's identity.
    #[must_use]
    pub fn as_prefixed_path(&self) -> &str {
        &self.prefixed
    }

    /// The portion after the prefix sentinel, without a leading slash.
    #[must_use]
    pub fn relative_path(&self) -> &str {
        let rest = &self.prefixed[self.prefix.as_str().len()..];
        rest.strip_prefix('/').unwrap_or(rest)
    }

    /// Whether this path names an artist-authored source file.
    #[must_use]
    pub fn is_source_path(&self) -> bool {
        self.prefix == Prefix::Source
    }

    /// Whether this path is a `*.ext` wildcard dependency.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.prefixed.contains("*.")
    }

    /// Append a literal suffix, e.g. `.log` or `.0.d`.
    #[must_use]
    pub fn with_suffix(&self, suffix: &str) -> BuildPath {
        BuildPath {
            prefixed: format!("{}{}", self.prefixed, suffix),
            prefix: self.prefix,
        }
    }

    /// The extension after the final dot of the final component, if any.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        let name = self.prefixed.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then_some(ext)
    }

    /// Everything up to and including the final slash.
    #[must_use]
    pub fn parent_dir(&self) -> &str {
        match self.prefixed.rfind('/') {
            Some(pos) => &self.prefixed[..=pos],
            None => &self.prefixed,
        }
    }
}

impl fmt::Display for BuildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed)
    }
}

impl fmt::Debug for BuildPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildPath({})", self.prefixed)
    }
}

impl Serialize for BuildPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.prefixed)
    }
}

impl<'de> Deserialize<'de> for BuildPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        BuildPath::new(text).map_err(serde::de::Error::custom)
    }
}
