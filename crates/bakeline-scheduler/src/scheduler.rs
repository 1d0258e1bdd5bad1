use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use bakeline_dep::FileDateCache;
use bakeline_hash::DataHash;
use bakeline_path::{BuildPath, PathResolver};
use bakeline_remote::{FarmConfig, FarmSession, NullFarm, NullSnDbs, SnDbsSession, ThreadPool};
use bakeline_store::{DataStore, RecordingStore};
use bakeline_transform::{
    BuildTransform, ContentHashCollection, DependencyMode, EvaluationMode, InputKind,
    TransformDecl, TransformStatus, XformId,
};
use tracing::{debug, error, info, warn};

use crate::context::{AssetType, BuildContext, ContextId};
use crate::info::{BuildStatus, SourceAssetViewStatus, TransformSchedulerInfo};
use crate::scheduler_log::SchedulerLogTransform;
use crate::source_view::SourceAssetView;
use crate::wait::{FarmWaitItem, SnDbsWaitItem, ThreadPoolWaitItem, TransformWaitItem};
use crate::{BuildSchedulerConfig, SchedulerError};

/// How long the loop blocks when no progress was made and at least one wait
/// list is non-empty.
const IDLE_POLL_SLEEP: Duration = Duration::from_millis(500);

/// Result of [`BuildScheduler::add_build_transform`]: the id under which
/// the transform (or the existing one it collapsed into) is registered.
#[derive(Clone, Copy, Debug)]
pub struct AddedTransform {
    pub id: XformId,
    /// `false` when the addition collapsed into an existing transform.
    pub unique: bool,
}

pub(crate) struct XformSlot {
    /// `None` only while the transform is being evaluated.
    pub xform: Option<Box<dyn BuildTransform>>,
    /// Output prefixed paths, cached at registration for duplicate
    /// detection while the box is in flight.
    pub outputs: Vec<String>,
    pub type_name: String,
}

/// The content-addressed build scheduler.
///
/// Owns every transform handed to it, the content-hash collection, the four
/// wait lists and the store handle. All scheduling happens on the calling
/// thread; see the crate docs for the concurrency model.
pub struct BuildScheduler {
    pub(crate) config: BuildSchedulerConfig,
    pub(crate) resolver: PathResolver,
    pub(crate) store: RecordingStore,
    pub(crate) farm: Box<dyn FarmSession>,
    pub(crate) sndbs: Box<dyn SnDbsSession>,
    pub(crate) thread_pool: ThreadPool,
    pub(crate) file_date_cache: FileDateCache,
    pub(crate) source_asset_view: SourceAssetView,
    pub(crate) content_hashes: ContentHashCollection,

    pub(crate) xforms: Vec<XformSlot>,
    pub(crate) unique_xforms: Vec<XformId>,
    pub(crate) schedulable: Vec<XformId>,
    pub(crate) new_xforms: Vec<XformId>,
    pub(crate) output_to_xform: HashMap<String, XformId>,
    pub(crate) updated_outputs: BTreeSet<String>,
    pub(crate) failed_outputs: BTreeSet<String>,

    pub(crate) info: HashMap<XformId, TransformSchedulerInfo>,
    pub(crate) transform_contexts: HashMap<XformId, Vec<ContextId>>,
    pub(crate) context_arena: Vec<BuildContext>,
    pub(crate) asset_contexts: BTreeMap<(AssetType, String), ContextId>,

    pub(crate) farm_waiting: Vec<FarmWaitItem>,
    pub(crate) threadpool_waiting: Vec<ThreadPoolWaitItem>,
    pub(crate) transform_waiting: Vec<TransformWaitItem>,
    pub(crate) sndbs_waiting: Vec<SnDbsWaitItem>,

    pub(crate) next_sequence_id: u64,
    pub(crate) started_count: i32,
    pub(crate) completed_count: usize,
    pub(crate) build_status: BuildStatus,
    pub(crate) internal_log: String,
    pub(crate) internal_log_enabled: bool,
    pub(crate) start_instant: Instant,
}

impl BuildScheduler {
    /// Create a scheduler over the given store. The farm and SN-DBS
    /// substrates default to disconnected sessions; attach real ones with
    /// [`BuildScheduler::with_farm`] and [`BuildScheduler::with_sndbs`].
    #[must_use]
    pub fn new(
        config: BuildSchedulerConfig,
        resolver: PathResolver,
        store: Box<dyn DataStore>,
    ) -> Self {
        BuildScheduler {
            config,
            resolver,
            store: RecordingStore::new(store),
            farm: Box::new(NullFarm),
            sndbs: Box::new(NullSnDbs),
            thread_pool: ThreadPool::new(4),
            file_date_cache: FileDateCache::new(),
            source_asset_view: SourceAssetView::new(),
            content_hashes: ContentHashCollection::new(),
            xforms: Vec::new(),
            unique_xforms: Vec::new(),
            schedulable: Vec::new(),
            new_xforms: Vec::new(),
            output_to_xform: HashMap::new(),
            updated_outputs: BTreeSet::new(),
            failed_outputs: BTreeSet::new(),
            info: HashMap::new(),
            transform_contexts: HashMap::new(),
            context_arena: Vec::new(),
            asset_contexts: BTreeMap::new(),
            farm_waiting: Vec::new(),
            threadpool_waiting: Vec::new(),
            transform_waiting: Vec::new(),
            sndbs_waiting: Vec::new(),
            next_sequence_id: 0,
            started_count: 0,
            completed_count: 0,
            build_status: BuildStatus::Ok,
            internal_log: String::new(),
            internal_log_enabled: false,
            start_instant: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_farm(mut self, farm: Box<dyn FarmSession>) -> Self {
        self.farm = farm;
        self
    }

    #[must_use]
    pub fn with_sndbs(mut self, sndbs: Box<dyn SnDbsSession>) -> Self {
        self.sndbs = sndbs;
        self
    }

    #[must_use]
    pub fn with_thread_pool(mut self, pool: ThreadPool) -> Self {
        self.thread_pool = pool;
        self
    }

    /// Register a transform, taking ownership.
    ///
    /// When an earlier transform already claims the same first output and
    /// declares an identical output list, the new transform collapses into
    /// it: contexts are merged, the evaluation mode is upgraded, and the
    /// returned handle names the existing transform. A same-first-output
    /// transform with a *different* output list is a configuration error.
    pub fn add_build_transform(
        &mut self,
        xform: Box<dyn BuildTransform>,
        contexts: &[ContextId],
    ) -> Result<AddedTransform, SchedulerError> {
        let outputs: Vec<String> = xform
            .decl()
            .outputs()
            .iter()
            .map(|o| o.path.as_prefixed_path().to_string())
            .collect();
        let type_name = xform.decl().type_name().to_string();

        if let Some(first) = outputs.first() {
            if let Some(&existing_id) = self.output_to_xform.get(first) {
                let existing_outputs = &self.xforms[existing_id.0].outputs;
                if *existing_outputs == outputs {
                    self.merge_duplicate(existing_id, xform.decl().evaluation_mode(), contexts);
                    return Ok(AddedTransform {
                        id: existing_id,
                        unique: false,
                    });
                }

                for (i, path) in existing_outputs.iter().enumerate() {
                    error!("existing transform output {i}: {path}");
                }
                for (i, path) in outputs.iter().enumerate() {
                    error!("new transform output {i}: {path}");
                }
                return Err(SchedulerError::DuplicateOutputMismatch {
                    type_name,
                    first_output: first.clone(),
                });
            }
        }

        let id = XformId(self.xforms.len());
        let mut xform = xform;
        let mut transform_info = TransformSchedulerInfo::default();

        // Validation marking: a global validate build, or any output
        // matching a validate-outputs substring.
        if self.config.validate
            || outputs.iter().any(|path| {
                self.config
                    .validate_outputs
                    .iter()
                    .any(|pattern| path.contains(pattern))
            })
        {
            transform_info.validate = true;
        }

        // Restriction to a subset of outputs: transforms matching no
        // pattern are disabled so they can only be satisfied from the
        // store.
        if !self.config.only_execute_outputs.is_empty() {
            let matches_any = outputs.iter().any(|path| {
                self.config
                    .only_execute_outputs
                    .iter()
                    .any(|pattern| path.contains(pattern))
            });
            if !matches_any {
                xform.decl_mut().disable_evaluation();
            }
        }

        for output in &outputs {
            self.output_to_xform.insert(output.clone(), id);
        }
        self.xforms.push(XformSlot {
            xform: Some(xform),
            outputs,
            type_name,
        });
        self.unique_xforms.push(id);
        self.new_xforms.push(id);
        self.info.insert(id, transform_info);
        self.transform_contexts.insert(id, contexts.to_vec());

        Ok(AddedTransform { id, unique: true })
    }

    fn merge_duplicate(
        &mut self,
        existing_id: XformId,
        new_mode: EvaluationMode,
        contexts: &[ContextId],
    ) {
        let existing_contexts = self.transform_contexts.entry(existing_id).or_default();
        for context in contexts {
            if !existing_contexts.contains(context) {
                existing_contexts.push(*context);
            }
        }

        if let Some(existing) = self.xforms[existing_id.0].xform.as_deref_mut() {
            let existing_mode = existing.decl().evaluation_mode();
            match (new_mode, existing_mode) {
                (EvaluationMode::Normal, EvaluationMode::Disabled) => {
                    existing.decl_mut().set_evaluation_mode(EvaluationMode::Normal);
                }
                (EvaluationMode::Forced, mode) if mode != EvaluationMode::Forced => {
                    existing.decl_mut().set_evaluation_mode(EvaluationMode::Forced);
                }
                _ => {}
            }
        }
    }

    /// Drive the scheduling loop until no transform is schedulable, new or
    /// waiting, then commit the store and propagate contexts upstream.
    ///
    /// Once a build ended with errors, further calls return the error
    /// status without doing any work.
    pub fn evaluate(
        &mut self,
        farm_config: &FarmConfig,
        add_scheduler_log: bool,
        command_line: &str,
    ) -> Result<BuildStatus, SchedulerError> {
        if self.build_status != BuildStatus::Ok {
            return Ok(self.build_status);
        }

        self.internal_log_enabled = true;
        self.log_internal(&format!("Command line : {command_line}"));
        self.log_internal("Starting Evaluation");
        let evaluation_start = Instant::now();

        self.farm.configure(farm_config);

        while !self.schedulable.is_empty() || !self.new_xforms.is_empty() || self.any_waiting() {
            self.log_trace("Scheduling loop iteration begun");

            if !self.new_xforms.is_empty() {
                self.log_internal(&format!(
                    "Scheduling {} new transforms.",
                    self.new_xforms.len()
                ));
                let mut incoming = std::mem::take(&mut self.new_xforms);
                self.schedulable.append(&mut incoming);
            }

            // Iterate over a snapshot; transforms added during execution
            // land in new_xforms and are considered next iteration.
            let mut progress_was_made = false;
            let pending = std::mem::take(&mut self.schedulable);
            let mut retained = Vec::new();

            for id in pending {
                if self.fail_if_inputs_failed(id)? {
                    continue;
                }
                if self.fail_if_sources_missing(id)? {
                    continue;
                }

                if self.inputs_available(id) {
                    self.execute_transform(id)?;
                    progress_was_made = true;
                } else {
                    retained.push(id);
                }
            }
            self.schedulable = retained;

            self.wake_up_waiting_transforms()?;

            // Wait for external builds without spin-looping.
            if !progress_was_made && self.new_xforms.is_empty() && self.any_waiting() {
                std::thread::sleep(IDLE_POLL_SLEEP);
            }

            // No progress, nothing new, nothing in flight: the remaining
            // transforms can never run. Diagnose and fail them all.
            if !progress_was_made
                && !self.schedulable.is_empty()
                && self.new_xforms.is_empty()
                && !self.any_waiting()
            {
                self.diagnose_stalled_transforms()?;
                self.build_status = BuildStatus::ErrorOccurred;
                break;
            }
        }

        self.store.commit_changes()?;

        if self.has_errors() {
            self.build_status = BuildStatus::ErrorOccurred;
        } else {
            self.log_internal(&format!(
                "Completed {} Build Transforms in {:.3} seconds",
                self.unique_xforms.len(),
                evaluation_start.elapsed().as_secs_f32()
            ));
        }
        self.log_internal("Evaluation Completed");

        self.push_contexts_to_parents();

        if add_scheduler_log {
            self.append_scheduler_log_transform()?;
        }

        Ok(self.build_status)
    }

    /// Fail `id` when any of its hashed inputs is a failed output.
    /// Returns `true` when the transform was failed and consumed.
    fn fail_if_inputs_failed(&mut self, id: XformId) -> Result<bool, SchedulerError> {
        let inputs = self.input_summaries(id);
        let any_failed = inputs.iter().any(|(path, kind)| {
            *kind != InputKind::SourceFile && self.failed_outputs.contains(path.as_prefixed_path())
        });
        if !any_failed {
            return Ok(false);
        }

        for output in self.xforms[id.0].outputs.clone() {
            self.failed_outputs.insert(output);
        }

        let mut xform = self.take_xform(id);
        xform
            .decl_mut()
            .add_error_message("Dependent input files failed to update");
        for (path, _) in &inputs {
            if !self.updated_outputs.contains(path.as_prefixed_path()) {
                xform
                    .decl_mut()
                    .add_error_message(format!("Missing Input: {}", path.as_prefixed_path()));
            }
        }
        let result =
            self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::WaitingInputs);
        self.put_xform(id, xform);
        result?;
        Ok(true)
    }

    /// Fail `id` when one of its source-file inputs is missing on disk.
    fn fail_if_sources_missing(&mut self, id: XformId) -> Result<bool, SchedulerError> {
        let inputs = self.input_summaries(id);
        let mut missing = None;
        for (path, kind) in &inputs {
            if *kind != InputKind::SourceFile {
                continue;
            }
            let absolute = self.resolver.to_absolute(path)?;
            if self.file_date_cache.read_file_time(&absolute).is_none() {
                missing = Some((path.clone(), absolute));
                break;
            }
        }
        let Some((_, absolute)) = missing else {
            return Ok(false);
        };

        let type_name = self.xforms[id.0].type_name.clone();
        let mut xform = self.take_xform(id);
        xform
            .decl_mut()
            .add_error_message(format!("Input file '{absolute}' is missing for '{type_name}'"));
        let result = self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::Failed);
        self.put_xform(id, xform);
        result?;
        Ok(true)
    }

    fn inputs_available(&self, id: XformId) -> bool {
        self.input_summaries(id).iter().all(|(path, kind)| {
            *kind == InputKind::SourceFile || self.updated_outputs.contains(path.as_prefixed_path())
        })
    }

    /// Run one transform to its next state: completed, failed or suspended.
    pub(crate) fn execute_transform(&mut self, id: XformId) -> Result<(), SchedulerError> {
        let type_name = self.xforms[id.0].type_name.clone();
        let first_output = self.xforms[id.0].outputs.first().cloned().unwrap_or_default();
        self.log_internal(&format!(
            "Executing Transform of type '{type_name}' - '{first_output}'"
        ));

        let status = self.info[&id].status;
        match status {
            TransformStatus::WaitingInputs => self.execute_first_evaluation(id)?,
            TransformStatus::ResumeNeeded => self.execute_resume(id)?,
            _ => {}
        }

        if self.info[&id].status == TransformStatus::OutputsUpdated {
            let replicate = (!self.config.no_replicate
                && !self.config.validate
                && self.config.validate_outputs.is_empty())
                || self.config.replicate_manifest;
            if replicate {
                self.replicate_transform_outputs(id)?;
            }
        }

        Ok(())
    }

    fn execute_first_evaluation(&mut self, id: XformId) -> Result<(), SchedulerError> {
        let mut xform = self.take_xform(id);

        let result = self.first_evaluation_inner(id, &mut xform);
        self.put_xform(id, xform);
        result
    }

    fn first_evaluation_inner(
        &mut self,
        id: XformId,
        xform: &mut Box<dyn BuildTransform>,
    ) -> Result<(), SchedulerError> {
        // Timestamps may come from the source asset view unless this
        // transform is forced or ignores dependencies outright.
        if !self.source_asset_view.is_empty()
            && !self.should_force(id, xform.decl().evaluation_mode())
            && xform.decl().dependency_mode() == DependencyMode::DependencyChecked
        {
            self.info.get_mut(&id).expect("registered transform").source_asset_view_status =
                SourceAssetViewStatus::Use;
        }

        self.populate_input_content_hashes(id, xform.decl_mut())?;
        self.seed_pre_evaluate_dependencies(id, xform.decl_mut(), false)?;

        let mut post_eval_dep_hash = None;
        let mut requires_evaluation = false;

        if xform.decl().dependency_mode() == DependencyMode::DependencyChecked {
            let mut check_deps = false;

            if self.should_force(id, xform.decl().evaluation_mode()) {
                xform.decl_mut().add_dep_mismatch("Forced update");
                requires_evaluation = true;
            } else if xform.decl().evaluation_mode() == EvaluationMode::Disabled {
                // Fall back on the dependency check when no stored key
                // exists for this output configuration.
                let config_string = xform.decl().output_config_string();
                match self.store.retrieve_disabled_transform_key_hash(&config_string) {
                    Some(key) => {
                        post_eval_dep_hash = Some(key);
                        xform.decl_mut().add_dep_mismatch("Disabled");
                    }
                    None => check_deps = true,
                }
            } else {
                check_deps = true;
            }

            let mismatch_len = xform.decl().dep_mismatches().len();
            if check_deps {
                let (requires, resolved) = self.check_dependencies(id, xform.decl_mut())?;
                requires_evaluation = requires;
                post_eval_dep_hash = resolved;
            }

            // Using view timestamps but the transform must run anyway:
            // discard the view, re-seed from real file times, re-check.
            if requires_evaluation
                && self.info[&id].source_asset_view_status == SourceAssetViewStatus::Using
            {
                self.info.get_mut(&id).expect("registered transform").source_asset_view_status =
                    SourceAssetViewStatus::Ignore;
                self.seed_pre_evaluate_dependencies(id, xform.decl_mut(), true)?;

                if check_deps {
                    xform.decl_mut().truncate_dep_mismatches(mismatch_len);
                    let (requires, resolved) = self.check_dependencies(id, xform.decl_mut())?;
                    requires_evaluation = requires;
                    post_eval_dep_hash = resolved;
                }
            }
        } else {
            xform.decl_mut().add_dep_mismatch("Ignore Deps");
            requires_evaluation = true;
        }

        if requires_evaluation {
            self.pre_transform_evaluate(id);
            let status = self.invoke_evaluate(id, xform);
            self.post_transform_evaluate(id, xform, status)?;
        } else {
            let key = post_eval_dep_hash.expect("skip decided without a resolved key hash");
            self.skip_transform(id, xform, key)?;
        }

        Ok(())
    }

    /// Invoke `evaluate` with the full exception guard: a returned error or
    /// a panic both become a failed status with the message recorded.
    fn invoke_evaluate(&mut self, id: XformId, xform: &mut Box<dyn BuildTransform>) -> TransformStatus {
        let mut ctx = crate::eval_ctx::EvalContext::new(self, id, xform.decl().evaluation_mode());
        let outcome = catch_unwind(AssertUnwindSafe(|| xform.evaluate(&mut ctx)));
        drop(ctx);

        match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                xform.decl_mut().add_error_message(err.to_string());
                TransformStatus::Failed
            }
            Err(panic) => {
                xform
                    .decl_mut()
                    .add_error_message(panic_message(panic.as_ref()));
                TransformStatus::Failed
            }
        }
    }

    fn execute_resume(&mut self, id: XformId) -> Result<(), SchedulerError> {
        let mut xform = self.take_xform(id);
        self.pre_transform_resume(id);

        let resume_item = self.info.get_mut(&id).expect("registered transform").resume_item.take();
        let status = match resume_item {
            Some(resume) => {
                let mut ctx =
                    crate::eval_ctx::EvalContext::new(self, id, xform.decl().evaluation_mode());
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| xform.resume_evaluation(&mut ctx, &resume)));
                drop(ctx);
                match outcome {
                    Ok(Ok(status)) => status,
                    Ok(Err(err)) => {
                        xform.decl_mut().add_error_message(err.to_string());
                        TransformStatus::Failed
                    }
                    Err(panic) => {
                        xform
                            .decl_mut()
                            .add_error_message(panic_message(panic.as_ref()));
                        TransformStatus::Failed
                    }
                }
            }
            None => {
                xform
                    .decl_mut()
                    .add_error_message("transform resumed without a resume item");
                TransformStatus::Failed
            }
        };

        let result = self.post_transform_resume(id, &mut xform, status);
        self.put_xform(id, xform);
        result
    }

    fn pre_transform_evaluate(&mut self, id: XformId) {
        self.log_internal(&format!(
            "Evaluating Build Transform - {} [x{:08}]",
            self.xforms[id.0].type_name, id.0
        ));
        self.internal_log_enabled = false;

        let now = self.now_secs();
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let build_ids: Vec<i64> = self
            .transform_contexts(id)
            .iter()
            .map(|c| self.context(*c).build_id)
            .collect();

        // No stale store writes may be attributed to this transform.
        self.store.clear_written();

        let transform_info = self.info.get_mut(&id).expect("registered transform");
        transform_info.captured_log.push_str(&format!("Transform executed at {timestamp}\n"));
        for build_id in build_ids {
            transform_info
                .captured_log
                .push_str(&format!("Transform executed in bid {build_id}\n"));
        }
        transform_info.evaluate_start_time = now;
        self.started_count += 1;
        self.info.get_mut(&id).expect("registered transform").start_order = self.started_count;
    }

    fn post_transform_evaluate(
        &mut self,
        id: XformId,
        xform: &mut Box<dyn BuildTransform>,
        status: TransformStatus,
    ) -> Result<(), SchedulerError> {
        self.info.get_mut(&id).expect("registered transform").status = status;
        self.install_written_hashes(xform.as_mut())?;

        let result = match status {
            TransformStatus::OutputsUpdated => {
                self.on_build_transform_outputs_updated(id, xform.as_mut())
            }
            TransformStatus::Failed => {
                self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::Failed)
            }
            _ => Ok(()),
        };

        self.info.get_mut(&id).expect("registered transform").evaluate_end_time = self.now_secs();
        self.internal_log_enabled = true;
        result
    }

    fn pre_transform_resume(&mut self, id: XformId) {
        self.log_internal(&format!(
            "Resuming Evaluation of Build Transform - {} [x{:08}]",
            self.xforms[id.0].type_name, id.0
        ));
        self.internal_log_enabled = false;
        self.store.clear_written();
        let now = self.now_secs();
        self.info.get_mut(&id).expect("registered transform").resume_start_time = now;
    }

    fn post_transform_resume(
        &mut self,
        id: XformId,
        xform: &mut Box<dyn BuildTransform>,
        status: TransformStatus,
    ) -> Result<(), SchedulerError> {
        self.info.get_mut(&id).expect("registered transform").status = status;
        self.install_written_hashes(xform.as_mut())?;

        let result = match status {
            TransformStatus::OutputsUpdated => {
                self.on_build_transform_outputs_updated(id, xform.as_mut())
            }
            TransformStatus::Failed => {
                self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::Failed)
            }
            _ => Ok(()),
        };

        self.info.get_mut(&id).expect("registered transform").resume_end_time = self.now_secs();
        self.internal_log_enabled = true;
        result
    }

    /// Every hash written through the store during the evaluation becomes
    /// an output content hash of the transform.
    fn install_written_hashes(
        &mut self,
        xform: &mut dyn BuildTransform,
    ) -> Result<(), SchedulerError> {
        for (path, hash) in self.store.take_written() {
            xform
                .decl_mut()
                .output_content_hashes_mut()
                .register_content_hash(&path, hash)?;
        }
        Ok(())
    }

    fn diagnose_stalled_transforms(&mut self) -> Result<(), SchedulerError> {
        let has_prior_failure = !self.failed_outputs.is_empty();
        let stalled = self.schedulable.clone();
        let schedulable_set: BTreeSet<XformId> = stalled.iter().copied().collect();

        for id in stalled {
            let inputs = self.input_summaries(id);
            let mut messages = Vec::new();

            for (path, kind) in inputs {
                if kind == InputKind::SourceFile {
                    let absolute = self.resolver.to_absolute(&path)?;
                    if !absolute.exists() {
                        messages.push(format!("Missing Source Input: {}", path.as_prefixed_path()));
                        error!(input = %path, "missing SOURCE input");
                    }
                    continue;
                }

                match self.output_to_xform.get(path.as_prefixed_path()) {
                    None => {
                        messages.push(format!(
                            "Missing UNPROVIDED Input: {}",
                            path.as_prefixed_path()
                        ));
                        if !has_prior_failure {
                            error!(input = %path, "missing UNPROVIDED input");
                        }
                    }
                    Some(producer) if schedulable_set.contains(producer) => {
                        messages.push(format!(
                            "Missing PENDING Input: {}",
                            path.as_prefixed_path()
                        ));
                    }
                    Some(_) => {
                        messages.push(format!(
                            "Missing FAILED Input: {}",
                            path.as_prefixed_path()
                        ));
                        if !has_prior_failure {
                            error!(input = %path, "missing FAILED input");
                        }
                    }
                }
            }

            let mut xform = self.take_xform(id);
            for message in messages {
                xform.decl_mut().add_error_message(message);
            }
            let result =
                self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::WaitingInputs);
            self.put_xform(id, xform);
            result?;
        }

        self.schedulable.clear();
        Ok(())
    }

    /// Append the synthetic transform embedding the scheduler's own log,
    /// attribute any late validation errors, and execute it.
    fn append_scheduler_log_transform(&mut self) -> Result<(), SchedulerError> {
        let log_xform = SchedulerLogTransform::boxed(self.internal_log.clone())?;
        let outputs: Vec<String> = log_xform
            .decl()
            .outputs()
            .iter()
            .map(|o| o.path.as_prefixed_path().to_string())
            .collect();
        let type_name = log_xform.decl().type_name().to_string();

        let id = XformId(self.xforms.len());
        for output in &outputs {
            self.output_to_xform.insert(output.clone(), id);
        }
        self.xforms.push(XformSlot {
            xform: Some(log_xform),
            outputs,
            type_name,
        });
        self.unique_xforms.push(id);
        self.info.insert(id, TransformSchedulerInfo::default());
        let all_contexts: Vec<ContextId> = self.asset_contexts.values().copied().collect();
        self.transform_contexts.insert(id, all_contexts);

        // Validation errors arrive from the storage backend after commit;
        // they are matched back to transforms by output path, stripping a
        // `.<N>.d` suffix when needed.
        let validation_errors = self.store.validation_errors();
        for (path, message) in validation_errors {
            let mut target = self.output_to_xform.get(&path).copied();
            if target.is_none() && path.ends_with(".d") && path.len() > 4 {
                target = self.output_to_xform.get(&path[..path.len() - 4]).copied();
            }
            let Some(target) = target else {
                return Err(SchedulerError::ValidationNotAttributable { path });
            };

            if let Some(xform) = self.xforms[target.0].xform.as_deref_mut() {
                xform.decl_mut().add_validation_error_message(message.clone());
            }
            if let Some(log) = self.xforms[id.0].xform.as_deref_mut() {
                log.decl_mut().add_validation_error_message(message.clone());
            }
            warn!(path = %path, message = %message, "validation error");
        }

        self.internal_log_enabled = false;
        self.execute_transform(id)?;
        self.info.get_mut(&id).expect("scheduler log transform").start_order = 0;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Every unique transform, in registration order.
    #[must_use]
    pub fn all_transforms(&self) -> &[XformId] {
        &self.unique_xforms
    }

    #[must_use]
    pub fn transform_info(&self, id: XformId) -> Option<&TransformSchedulerInfo> {
        self.info.get(&id)
    }

    /// The declaration of a registered transform.
    ///
    /// # Panics
    ///
    /// Panics when called for a transform that is currently evaluating.
    #[must_use]
    pub fn transform_decl(&self, id: XformId) -> &TransformDecl {
        self.xforms[id.0]
            .xform
            .as_deref()
            .expect("transform is currently evaluating")
            .decl()
    }

    /// A build is busy while transforms are pending or waiting to start.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.new_xforms.is_empty()
            || self
                .info
                .values()
                .any(|info| info.status == TransformStatus::WaitingInputs)
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.unique_xforms
            .iter()
            .filter_map(|id| self.xforms[id.0].xform.as_deref())
            .any(|xform| xform.decl().has_error())
    }

    #[must_use]
    pub fn has_validation_errors(&self) -> bool {
        self.unique_xforms
            .iter()
            .filter_map(|id| self.xforms[id.0].xform.as_deref())
            .any(|xform| xform.decl().has_validation_error())
    }

    #[must_use]
    pub fn content_hash_collection(&self) -> &ContentHashCollection {
        &self.content_hashes
    }

    pub fn register_content_hash(
        &mut self,
        path: &BuildPath,
        hash: DataHash,
    ) -> Result<bool, SchedulerError> {
        Ok(self.content_hashes.register_content_hash(path, hash)?)
    }

    pub fn file_date_cache_mut(&mut self) -> &mut FileDateCache {
        &mut self.file_date_cache
    }

    pub fn source_asset_view_mut(&mut self) -> &mut SourceAssetView {
        &mut self.source_asset_view
    }

    #[must_use]
    pub fn updated_outputs(&self) -> &BTreeSet<String> {
        &self.updated_outputs
    }

    #[must_use]
    pub fn failed_outputs(&self) -> &BTreeSet<String> {
        &self.failed_outputs
    }

    #[must_use]
    pub fn build_status(&self) -> BuildStatus {
        self.build_status
    }

    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    // ------------------------------------------------------------------
    // Internal helpers shared across modules
    // ------------------------------------------------------------------

    pub(crate) fn take_xform(&mut self, id: XformId) -> Box<dyn BuildTransform> {
        self.xforms[id.0]
            .xform
            .take()
            .expect("transform already in flight")
    }

    pub(crate) fn put_xform(&mut self, id: XformId, xform: Box<dyn BuildTransform>) {
        debug_assert!(self.xforms[id.0].xform.is_none());
        self.xforms[id.0].xform = Some(xform);
    }

    pub(crate) fn input_summaries(&self, id: XformId) -> Vec<(BuildPath, InputKind)> {
        self.transform_decl(id)
            .inputs()
            .iter()
            .map(|input| (input.path().clone(), input.kind))
            .collect()
    }

    pub(crate) fn should_force(&self, id: XformId, mode: EvaluationMode) -> bool {
        mode == EvaluationMode::Forced || self.info[&id].validate
    }

    pub(crate) fn any_waiting(&self) -> bool {
        !self.farm_waiting.is_empty()
            || !self.threadpool_waiting.is_empty()
            || !self.transform_waiting.is_empty()
            || !self.sndbs_waiting.is_empty()
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_sequence_id;
        self.next_sequence_id += 1;
        seq
    }

    pub(crate) fn now_secs(&self) -> f32 {
        self.start_instant.elapsed().as_secs_f32()
    }

    pub(crate) fn log_internal(&mut self, message: &str) {
        let stamped = format!("[{:.3}] {message}", self.now_secs());
        info!("{stamped}");
        if self.internal_log_enabled {
            self.internal_log.push_str(&stamped);
            self.internal_log.push('\n');
        }
    }

    pub(crate) fn log_trace(&mut self, message: &str) {
        if self.config.tracing_enabled {
            let stamped = format!("[{:.3}] {message}", self.now_secs());
            debug!("{stamped}");
            if self.internal_log_enabled {
                self.internal_log.push_str(&stamped);
                self.internal_log.push('\n');
            }
        }
    }

    pub(crate) fn append_transform_log(&mut self, id: XformId, text: &str) {
        self.info
            .get_mut(&id)
            .expect("registered transform")
            .captured_log
            .push_str(text);
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("panic during evaluation: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("panic during evaluation: {text}")
    } else {
        "panic during evaluation".to_string()
    }
}
