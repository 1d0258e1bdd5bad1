use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Build-wide scheduler configuration.
///
/// Deserializable from TOML so tool frontends can keep per-branch defaults
/// in a checked-in file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSchedulerConfig {
    /// Build is local to this machine; replication skips cross-machine
    /// locking.
    pub local: bool,

    /// Force re-evaluation of every transform and suppress replication.
    pub validate: bool,

    /// Substring matches on prefixed output paths; matching transforms are
    /// force re-evaluated.
    pub validate_outputs: Vec<String>,

    /// When non-empty, transforms whose outputs match no entry are set to
    /// disabled evaluation.
    pub only_execute_outputs: Vec<String>,

    pub no_replicate: bool,

    /// Replicate outputs flagged for the manifest even when replication is
    /// otherwise suppressed.
    pub replicate_manifest: bool,

    /// Emit scheduler trace logging.
    pub tracing_enabled: bool,

    pub user_name: String,
}

impl BuildSchedulerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, SchedulerError> {
        toml::from_str(text).map_err(|e| SchedulerError::Config(e.to_string()))
    }
}
