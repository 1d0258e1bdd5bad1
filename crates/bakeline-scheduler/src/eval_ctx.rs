//! The scheduler-side implementation of [`TransformContext`].
//!
//! Constructed around the scheduler for the duration of one
//! `evaluate`/`resume_evaluation` call. Wait items register at the front
//! of their lists, and each receives a sequence id from the scheduler's
//! monotonic mint.

use bakeline_dep::FileDateCache;
use bakeline_path::{BuildPath, PathResolver};
use bakeline_remote::{FarmJobId, FarmJobSpec, ThreadPool, WorkItemHandle};
use bakeline_store::DataStore;
use bakeline_transform::{
    BuildTransform, EvaluationMode, TransformContext, TransformError, XformId,
};
use tracing::debug;

use crate::scheduler::BuildScheduler;
use crate::wait::{FarmWaitItem, SnDbsWaitItem, ThreadPoolWaitItem, TransformWaitItem};

pub(crate) struct EvalContext<'a> {
    sched: &'a mut BuildScheduler,
    current: XformId,
    parent_eval_mode: EvaluationMode,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(
        sched: &'a mut BuildScheduler,
        current: XformId,
        parent_eval_mode: EvaluationMode,
    ) -> Self {
        EvalContext {
            sched,
            current,
            parent_eval_mode,
        }
    }
}

impl TransformContext for EvalContext<'_> {
    fn store(&mut self) -> &mut dyn DataStore {
        &mut self.sched.store
    }

    fn file_date_cache(&mut self) -> &mut FileDateCache {
        &mut self.sched.file_date_cache
    }

    fn resolver(&self) -> &PathResolver {
        &self.sched.resolver
    }

    fn thread_pool(&mut self) -> &mut ThreadPool {
        &mut self.sched.thread_pool
    }

    fn log(&mut self, line: &str) {
        self.sched
            .append_transform_log(self.current, &format!("{line}\n"));
    }

    fn submit_farm_job(
        &mut self,
        spec: FarmJobSpec,
        num_retries: u32,
    ) -> Result<u64, TransformError> {
        let job_id = self.sched.farm.submit_job(&spec);
        if !job_id.is_valid() {
            return Err(TransformError::FarmSubmitFailed);
        }

        let sequence_id = self.sched.next_seq();
        self.sched.farm_waiting.insert(
            0,
            FarmWaitItem {
                sequence_id,
                xform: self.current,
                job_id,
                spec: Some(spec),
                retries: num_retries,
            },
        );
        // A zero farm time flags this transform as a farm job.
        self.sched
            .info
            .get_mut(&self.current)
            .expect("registered transform")
            .farm_execution_time = 0;

        debug!(
            xform = self.current.0,
            job = %job_id,
            retries = num_retries,
            "transform kicked a farm job and is waiting"
        );
        Ok(sequence_id)
    }

    fn register_farm_wait_item(&mut self, job_id: FarmJobId) -> Result<u64, TransformError> {
        if self.sched.farm.job(job_id).is_none() {
            return Err(TransformError::msg(format!(
                "transform is attempting to wait on farm job {job_id} that was never added to this session"
            )));
        }

        let sequence_id = self.sched.next_seq();
        self.sched.farm_waiting.insert(
            0,
            FarmWaitItem {
                sequence_id,
                xform: self.current,
                job_id,
                spec: None,
                retries: 0,
            },
        );
        self.sched
            .info
            .get_mut(&self.current)
            .expect("registered transform")
            .farm_execution_time = 0;

        debug!(xform = self.current.0, job = %job_id, "transform is waiting on a farm job");
        Ok(sequence_id)
    }

    fn register_thread_pool_wait_item(&mut self, handle: WorkItemHandle) -> u64 {
        let sequence_id = self.sched.next_seq();
        self.sched.threadpool_waiting.insert(
            0,
            ThreadPoolWaitItem {
                sequence_id,
                xform: self.current,
                handle,
            },
        );
        sequence_id
    }

    fn register_transform_wait_item(&mut self, waited: XformId) -> u64 {
        let sequence_id = self.sched.next_seq();
        self.sched.transform_waiting.insert(
            0,
            TransformWaitItem {
                sequence_id,
                xform: self.current,
                waited,
            },
        );
        sequence_id
    }

    fn register_sndbs_wait_item(&mut self, project: &str, job_id: &str) -> u64 {
        let sequence_id = self.sched.next_seq();
        self.sched.sndbs_waiting.insert(
            0,
            SnDbsWaitItem {
                sequence_id,
                xform: self.current,
                project: project.to_string(),
                job_id: job_id.to_string(),
            },
        );
        sequence_id
    }

    fn add_build_transform(
        &mut self,
        mut xform: Box<dyn BuildTransform>,
    ) -> Result<XformId, TransformError> {
        // A non-normally-evaluated parent drags its children along.
        if self.parent_eval_mode != EvaluationMode::Normal
            && xform.decl().evaluation_mode() == EvaluationMode::Normal
        {
            xform.decl_mut().set_evaluation_mode(self.parent_eval_mode);
        }

        let contexts = self.sched.transform_contexts(self.current).to_vec();
        self.sched
            .add_build_transform(xform, &contexts)
            .map(|added| added.id)
            .map_err(|e| TransformError::msg(e.to_string()))
    }

    fn producer_of(&self, path: &BuildPath) -> Option<XformId> {
        self.sched
            .output_to_xform
            .get(path.as_prefixed_path())
            .copied()
    }
}
