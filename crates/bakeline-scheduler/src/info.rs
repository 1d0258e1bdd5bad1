use bakeline_transform::{ResumeItem, TransformStatus};

/// Overall outcome of a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BuildStatus {
    #[default]
    Ok,
    ErrorOccurred,
}

/// Whether a transform's source-file timestamps come from the source asset
/// view instead of the filesystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SourceAssetViewStatus {
    #[default]
    Ignore,
    Use,
    Using,
}

/// Per-transform scheduling metadata.
#[derive(Debug)]
pub struct TransformSchedulerInfo {
    pub status: TransformStatus,
    pub source_asset_view_status: SourceAssetViewStatus,

    /// Seconds since scheduler start, `0.0` when the phase never ran.
    pub evaluate_start_time: f32,
    pub evaluate_end_time: f32,
    pub resume_start_time: f32,
    pub resume_end_time: f32,

    /// `-1` when the transform never touched the farm.
    pub farm_execution_time: i64,

    /// 1-based evaluation start ordinal, `0` when the transform never
    /// started (e.g. it was skipped via the dependency check).
    pub start_order: i32,

    /// 0-based ordinal of the OutputsUpdated/Failed observation.
    pub completion_order: usize,

    /// Captured stdout/stderr of the evaluation, written to
    /// `<firstOutput>.log`.
    pub captured_log: String,

    /// The wakeup payload consumed by the next resume.
    pub resume_item: Option<ResumeItem>,

    /// Force re-evaluation and report mismatches for this transform.
    pub validate: bool,
}

impl Default for TransformSchedulerInfo {
    fn default() -> Self {
        TransformSchedulerInfo {
            status: TransformStatus::WaitingInputs,
            source_asset_view_status: SourceAssetViewStatus::Ignore,
            evaluate_start_time: 0.0,
            evaluate_end_time: 0.0,
            resume_start_time: 0.0,
            resume_end_time: 0.0,
            farm_execution_time: -1,
            start_order: 0,
            completion_order: 0,
            captured_log: String::new(),
            resume_item: None,
            validate: false,
        }
    }
}
