use std::collections::BTreeMap;

use bakeline_hash::{DataHash, hash_canonical_json, to_canonical_json};
use serde::{Deserialize, Serialize};

use crate::DepError;

const INPUT_PREFIX: &str = "input-";
const OUTPUT_PREFIX: &str = "output-";
const CONFIG_PREFIX: &str = "config-";
const TIMESTAMP_SUFFIX: &str = "-timestamp";
const CONTENT_HASH_SUFFIX: &str = "-contenthash";
const MISSING_SUFFIX: &str = "-missing";

/// How a single input is pinned inside a [`SimpleDependency`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepEntry<'a> {
    /// Path only; the timestamp gets filled in at resolve time.
    Plain(&'a str),
    /// Source file pinned by modification time.
    Timestamped { path: &'a str, timestamp: i64 },
    /// Wildcard or hashed resource pinned by content hash.
    Hashed { path: &'a str, hash: DataHash },
    /// The file could not be read when the record was written.
    Missing(&'a str),
}

impl<'a> DepEntry<'a> {
    #[must_use]
    pub fn path(&self) -> &'a str {
        match self {
            DepEntry::Plain(path) | DepEntry::Missing(path) => path,
            DepEntry::Timestamped { path, .. } | DepEntry::Hashed { path, .. } => path,
        }
    }
}

/// A structured, serializable dependency record.
///
/// Each input lives under exactly one key, whose suffix encodes how the
/// input is pinned:
///
/// | Key | Value |
/// |---|---|
/// | `input-<k>` | `<path>` |
/// | `input-<k>-timestamp` | `<path>;<mtime>` |
/// | `input-<k>-contenthash` | `<path>;<hex>` |
/// | `input-<k>-missing` | `<path>` |
/// | `output-<k>` | `<path>` |
/// | `config-<k>` | free-form |
///
/// The map is key-sorted, and serialization goes through JCS, so the JSON
/// form (and therefore the key hash) is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimpleDependency {
    entries: BTreeMap<String, String>,
}

impl SimpleDependency {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear_input(&mut self, key: &str) {
        self.entries.remove(&format!("{INPUT_PREFIX}{key}"));
        self.entries
            .remove(&format!("{INPUT_PREFIX}{key}{TIMESTAMP_SUFFIX}"));
        self.entries
            .remove(&format!("{INPUT_PREFIX}{key}{CONTENT_HASH_SUFFIX}"));
        self.entries
            .remove(&format!("{INPUT_PREFIX}{key}{MISSING_SUFFIX}"));
    }

    /// Record an input by path only. The timestamp or hash is added later,
    /// once the deps-without-timestamps form has been written out.
    pub fn set_input_filename(&mut self, key: &str, path: impl Into<String>) {
        self.clear_input(key);
        self.entries
            .insert(format!("{INPUT_PREFIX}{key}"), path.into());
    }

    pub fn set_input_filename_and_timestamp(&mut self, key: &str, path: &str, timestamp: i64) {
        self.clear_input(key);
        self.entries.insert(
            format!("{INPUT_PREFIX}{key}{TIMESTAMP_SUFFIX}"),
            format!("{path};{timestamp}"),
        );
    }

    pub fn set_input_filename_and_hash(&mut self, key: &str, path: &str, hash: DataHash) {
        self.clear_input(key);
        self.entries.insert(
            format!("{INPUT_PREFIX}{key}{CONTENT_HASH_SUFFIX}"),
            format!("{path};{hash}"),
        );
    }

    pub fn add_missing_input_file(&mut self, key: &str, path: impl Into<String>) {
        self.clear_input(key);
        self.entries
            .insert(format!("{INPUT_PREFIX}{key}{MISSING_SUFFIX}"), path.into());
    }

    pub fn set_output_filename(&mut self, key: &str, path: impl Into<String>) {
        self.entries
            .insert(format!("{OUTPUT_PREFIX}{key}"), path.into());
    }

    pub fn set_config_string(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(format!("{CONFIG_PREFIX}{key}"), value.into());
    }

    pub fn set_config_int(&mut self, key: &str, value: i64) {
        self.set_config_string(key, value.to_string());
    }

    /// How the input under `key` is currently pinned, if present.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<DepEntry<'_>> {
        if let Some(path) = self.entries.get(&format!("{INPUT_PREFIX}{key}")) {
            return Some(DepEntry::Plain(path));
        }
        if let Some(value) = self
            .entries
            .get(&format!("{INPUT_PREFIX}{key}{TIMESTAMP_SUFFIX}"))
        {
            let (path, ts) = value.rsplit_once(';')?;
            return Some(DepEntry::Timestamped {
                path,
                timestamp: ts.parse().ok()?,
            });
        }
        if let Some(value) = self
            .entries
            .get(&format!("{INPUT_PREFIX}{key}{CONTENT_HASH_SUFFIX}"))
        {
            let (path, hex) = value.rsplit_once(';')?;
            return Some(DepEntry::Hashed {
                path,
                hash: DataHash::from_text(hex).ok()?,
            });
        }
        if let Some(path) = self
            .entries
            .get(&format!("{INPUT_PREFIX}{key}{MISSING_SUFFIX}"))
        {
            return Some(DepEntry::Missing(path));
        }
        None
    }

    /// Keys whose input is recorded by path only, with no timestamp, content
    /// hash or missing marker. These are the entries a resolve pass must
    /// refresh against the filesystem before hashing.
    #[must_use]
    pub fn untimestamped_input_keys(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter_map(|key| key.strip_prefix(INPUT_PREFIX))
            .filter(|rest| {
                !rest.ends_with(TIMESTAMP_SUFFIX)
                    && !rest.ends_with(CONTENT_HASH_SUFFIX)
                    && !rest.ends_with(MISSING_SUFFIX)
            })
            .map(str::to_string)
            .collect()
    }

    /// The `config-` entries, suffix keys only, in sorted order.
    #[must_use]
    pub fn config_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(CONFIG_PREFIX)
                    .map(|k| (k.to_string(), value.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Deterministic JSON form (JCS).
    pub fn to_json(&self) -> Result<String, DepError> {
        Ok(to_canonical_json(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DepError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The key hash of this record: the digest of its canonical JSON form.
    pub fn key_hash(&self) -> Result<DataHash, DepError> {
        Ok(hash_canonical_json(self)?)
    }
}
