use std::collections::HashMap;

use bakeline_path::BuildPath;

/// A pre-captured view of source-file timestamps.
///
/// When populated, dependency checks read timestamps from the view instead
/// of the filesystem, letting a build be checked against the state a sync
/// tool captured rather than whatever the disk currently holds. A transform
/// that turns out to need evaluation falls back to real file times first.
#[derive(Debug, Default)]
pub struct SourceAssetView {
    file_times: HashMap<String, i64>,
}

impl SourceAssetView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_times.is_empty()
    }

    pub fn set_file_time(&mut self, path: &BuildPath, timestamp: i64) {
        self.file_times
            .insert(path.as_prefixed_path().to_string(), timestamp);
    }

    #[must_use]
    pub fn file_time(&self, path: &BuildPath) -> Option<i64> {
        self.file_times.get(path.as_prefixed_path()).copied()
    }
}
