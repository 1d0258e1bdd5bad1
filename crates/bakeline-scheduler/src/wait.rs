use bakeline_remote::{FarmJobId, FarmJobSpec, WorkItemHandle};
use bakeline_transform::XformId;

/// Record of a transform suspended on a farm job.
///
/// `spec` is retained for jobs submitted through the scheduler so a failed
/// job can be resubmitted while `retries` remain; waits registered against
/// an externally submitted job carry no spec and are never retried.
#[derive(Debug)]
pub(crate) struct FarmWaitItem {
    pub sequence_id: u64,
    pub xform: XformId,
    pub job_id: FarmJobId,
    pub spec: Option<FarmJobSpec>,
    pub retries: u32,
}

#[derive(Debug)]
pub(crate) struct ThreadPoolWaitItem {
    pub sequence_id: u64,
    pub xform: XformId,
    pub handle: WorkItemHandle,
}

#[derive(Debug)]
pub(crate) struct TransformWaitItem {
    pub sequence_id: u64,
    pub xform: XformId,
    pub waited: XformId,
}

#[derive(Debug)]
pub(crate) struct SnDbsWaitItem {
    pub sequence_id: u64,
    pub xform: XformId,
    pub project: String,
    pub job_id: String,
}
