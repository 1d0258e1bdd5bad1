use std::fmt;

use bakeline_dep::FileDateCache;
use bakeline_path::{BuildPath, PathResolver};
use bakeline_remote::{
    FarmJob, FarmJobId, FarmJobSpec, JobPayload, SnDbsJobResult, ThreadPool, WorkItemHandle,
};
use bakeline_store::DataStore;

use crate::{TransformDecl, TransformError};

/// Identity of a transform inside one scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XformId(pub usize);

/// Status a transform reports back from evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransformStatus {
    /// Initial state; also the failure status when inputs never arrived.
    #[default]
    WaitingInputs,
    Failed,
    OutputsUpdated,
    /// The transform suspended on a wait item and must be resumed.
    ResumeNeeded,
}

/// What a wakeup delivers to a resuming transform.
pub enum ResumePayload {
    Farm(FarmJob),
    ThreadJob(JobPayload),
    Transform(XformId),
    SnDbs(SnDbsJobResult),
}

impl fmt::Debug for ResumePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumePayload::Farm(job) => f.debug_tuple("Farm").field(job).finish(),
            ResumePayload::ThreadJob(_) => f.write_str("ThreadJob(..)"),
            ResumePayload::Transform(id) => f.debug_tuple("Transform").field(id).finish(),
            ResumePayload::SnDbs(result) => f.debug_tuple("SnDbs").field(result).finish(),
        }
    }
}

/// The record handed to `resume_evaluation`, tagged with the sequence id of
/// the wait item it replaces.
#[derive(Debug)]
pub struct ResumeItem {
    pub sequence_id: u64,
    pub payload: ResumePayload,
}

/// What a transform may ask of the scheduler while evaluating.
///
/// Registering a wait item commits the transform to returning
/// [`TransformStatus::ResumeNeeded`] from the current entry point; exactly
/// one wait item may be registered per suspension.
pub trait TransformContext {
    /// The content-addressed store, with write accounting attached: every
    /// hash written through it is installed as an output content hash when
    /// the transform completes.
    fn store(&mut self) -> &mut dyn DataStore;

    fn file_date_cache(&mut self) -> &mut FileDateCache;

    fn resolver(&self) -> &PathResolver;

    fn thread_pool(&mut self) -> &mut ThreadPool;

    /// Append a line to this transform's captured log.
    fn log(&mut self, line: &str);

    /// Submit a farm job and wait on it. Returns the wait item's sequence
    /// id; refusal by the farm is fatal for the transform.
    fn submit_farm_job(
        &mut self,
        spec: FarmJobSpec,
        num_retries: u32,
    ) -> Result<u64, TransformError>;

    /// Wait on a job already submitted to the farm session.
    fn register_farm_wait_item(&mut self, job_id: FarmJobId) -> Result<u64, TransformError>;

    fn register_thread_pool_wait_item(&mut self, handle: WorkItemHandle) -> u64;

    /// Wait on another transform reaching any terminal state.
    fn register_transform_wait_item(&mut self, waited: XformId) -> u64;

    fn register_sndbs_wait_item(&mut self, project: &str, job_id: &str) -> u64;

    /// Add a sub-transform to the build. Returns the id of the registered
    /// transform, which is the existing one when the addition collapses
    /// into a duplicate.
    fn add_build_transform(
        &mut self,
        xform: Box<dyn BuildTransform>,
    ) -> Result<XformId, TransformError>;

    /// Id of the transform that produces `path`, if one is registered.
    fn producer_of(&self, path: &BuildPath) -> Option<XformId>;
}

/// One build step.
///
/// Implementations embed a [`TransformDecl`] and expose it through the two
/// accessors; `evaluate` and `resume_evaluation` are the only places
/// transform code runs.
pub trait BuildTransform {
    fn decl(&self) -> &TransformDecl;

    fn decl_mut(&mut self) -> &mut TransformDecl;

    /// Perform the build step. Returning `ResumeNeeded` requires a wait
    /// item to have been registered through `ctx`.
    fn evaluate(
        &mut self,
        ctx: &mut dyn TransformContext,
    ) -> Result<TransformStatus, TransformError>;

    /// Continue after a wakeup. Invoked at most once per wakeup event.
    fn resume_evaluation(
        &mut self,
        ctx: &mut dyn TransformContext,
        resume: &ResumeItem,
    ) -> Result<TransformStatus, TransformError> {
        let _ = (ctx, resume);
        Ok(TransformStatus::OutputsUpdated)
    }

    /// Called when a farm job this transform waited on failed terminally.
    fn on_job_error(&mut self) {}
}
