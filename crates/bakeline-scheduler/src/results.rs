//! Transform result handling: output registration on success, forensic
//! side files on failure.

use bakeline_hash::DataHash;
use bakeline_path::BuildPath;
use bakeline_store::{AssociationOutcome, DataStore, WriteOptions};
use bakeline_transform::{
    BuildTransform, ContentHashCollection, DependencyMode, OutputFlags, TransformDecl,
    TransformError, TransformStatus, XformId, parse_job_output,
};
use tracing::{error, info, warn};

use crate::scheduler::BuildScheduler;
use crate::SchedulerError;

const FARM_OUTPUT_BEGIN: &str = "[ Farm Output - BEGIN ]";

impl BuildScheduler {
    /// A transform reported `OutputsUpdated`: validate the claim, register
    /// the dependency chain, associate every output with the final dep
    /// hash, and write the `.log`/`.assetd` side files.
    pub(crate) fn on_build_transform_outputs_updated(
        &mut self,
        id: XformId,
        xform: &mut dyn BuildTransform,
    ) -> Result<(), SchedulerError> {
        let type_name = xform.decl().type_name().to_string();
        self.log_internal(&format!("OnOutputsUpdated - {type_name}"));

        xform.decl_mut().mark_outputs_updated();
        let completion = self.completed_count;
        self.completed_count += 1;
        self.info.get_mut(&id).expect("registered transform").completion_order = completion;

        // A transform that claims success while carrying errors is lying
        // to the scheduler; there is no sane way to continue.
        if xform.decl().has_error() {
            return Err(SchedulerError::SucceededWithErrors { type_name });
        }

        // Dependency-ignoring transforms still need unique hashes to tie
        // their logs and dep files to, so the build id joins the record.
        if xform.decl().dependency_mode() == DependencyMode::IgnoreDependency {
            if let Some(context) = self.transform_contexts(id).first().copied() {
                let build_id = self.context(context).build_id;
                xform
                    .decl_mut()
                    .pre_evaluate_dependencies_mut()
                    .set_config_int("_SchedulerIgnoreDepsBuildId", build_id);
            }
        }

        if !self.gather_output_content_hashes(xform.decl())? {
            xform.decl_mut().add_error_message(
                "Error: Transform returned a success but did not register all outputs",
            );
            return self.on_build_transform_failed(id, xform, TransformStatus::Failed);
        }

        // Scan the captured output, truncated to the last farm attempt so
        // retried-job noise cannot fail the transform.
        let mut job_output = self.info[&id].captured_log.clone();
        if let Some(position) = job_output.rfind(FARM_OUTPUT_BEGIN) {
            job_output = job_output[position..].to_string();
        }

        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        parse_job_output(
            &job_output,
            &mut warnings,
            &mut errors,
            xform.decl_mut().output_content_hashes_mut(),
            &self.resolver,
            &mut self.store,
        )?;

        if !errors.is_empty() {
            for warning in warnings {
                xform.decl_mut().add_error_message(format!("Warning: {warning}"));
            }
            for parse_error in errors {
                xform.decl_mut().add_error_message(format!("Error: {parse_error}"));
            }
            xform.decl_mut().add_error_message(
                "Error: Transform returned a success but printed an error message",
            );
            return self.on_build_transform_failed(id, xform, TransformStatus::Failed);
        }

        let final_dep_hash = self.register_dependencies(id, xform.decl())?;

        // Associate every output with the complete input closure.
        let outputs: Vec<(BuildPath, OutputFlags)> = xform
            .decl()
            .outputs()
            .iter()
            .map(|o| (o.path.clone(), o.flags))
            .collect();
        for (path, flags) in &outputs {
            self.updated_outputs
                .insert(path.as_prefixed_path().to_string());
            self.output_to_xform
                .entry(path.as_prefixed_path().to_string())
                .or_insert(id);

            let Some(output_hash) = self.content_hashes.content_hash(path) else {
                return Err(SchedulerError::Transform(TransformError::msg(format!(
                    "output '{path}' lost its content hash between gathering and association"
                ))));
            };

            if self.store.register_association(final_dep_hash, path, output_hash)
                == AssociationOutcome::Conflict
            {
                if flags.contains(OutputFlags::NONDETERMINISTIC) {
                    self.drain_association_warnings();
                } else {
                    let details = self.store.take_association_errors().join("; ");
                    return Err(SchedulerError::AssociationConflict { details });
                }
            }
        }

        // Remember the final key for the disabled-transform short circuit.
        let config_string = xform.decl().output_config_string();
        self.store
            .store_disabled_transform_key_hash(&config_string, final_dep_hash);

        self.print_transform_status(xform.decl(), TransformStatus::OutputsUpdated);
        self.log_internal(&format!("OnOutputsUpdated COMPLETED - {type_name}"));

        // Side files: the captured log, then the asset dependencies.
        if let Some(first_output) = xform.decl().first_output_path().cloned() {
            let log_path = first_output.with_suffix(".log");
            let log_text = self.info[&id].captured_log.clone();
            let log_hash = self.store.write_data(
                &log_path,
                log_text.as_bytes(),
                WriteOptions::ASYNC_UPLOAD,
            )?;
            if self.store.register_association(final_dep_hash, &log_path, log_hash)
                == AssociationOutcome::Conflict
            {
                self.drain_association_warnings();
            }
            self.content_hashes.register_content_hash(&log_path, log_hash)?;

            self.write_asset_dependencies(xform.decl(), &first_output, final_dep_hash)?;
        }

        Ok(())
    }

    /// A transform failed. Record its outputs as failed, make sure the
    /// failure carries a message, and write the `.d`/`.log` side files a
    /// forensic UI needs, without associating outputs.
    pub(crate) fn on_build_transform_failed(
        &mut self,
        id: XformId,
        xform: &mut dyn BuildTransform,
        fail_status: TransformStatus,
    ) -> Result<(), SchedulerError> {
        let completion = self.completed_count;
        self.completed_count += 1;
        {
            let transform_info = self.info.get_mut(&id).expect("registered transform");
            transform_info.completion_order = completion;
            transform_info.status = fail_status;
        }
        self.print_transform_status(xform.decl(), fail_status);

        for output in xform.decl().outputs() {
            self.failed_outputs
                .insert(output.path.as_prefixed_path().to_string());
        }

        // Pull any job-reported diagnostics into the error list.
        let log_text = self.info[&id].captured_log.clone();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut scratch = ContentHashCollection::new();
        parse_job_output(
            &log_text,
            &mut warnings,
            &mut errors,
            &mut scratch,
            &self.resolver,
            &mut self.store,
        )?;
        for warning in warnings {
            xform.decl_mut().add_error_message(format!("Warning: {warning}"));
        }
        for parse_error in errors {
            xform.decl_mut().add_error_message(format!("Error: {parse_error}"));
        }

        if xform.decl().error_messages().is_empty() {
            return Err(SchedulerError::FailedWithoutMessage {
                type_name: xform.decl().type_name().to_string(),
            });
        }
        let error_block = xform.decl().error_messages().join("\n");
        self.append_transform_log(id, &error_block);

        let Some(first_output) = xform.decl().first_output_path().cloned() else {
            return Ok(());
        };

        // Post-evaluation dependency record: discovered deps with their
        // current timestamps, missing files marked. No output
        // associations for failed transforms.
        let mut dependencies = xform.decl().pre_evaluate_dependencies().clone();
        for (index, dep) in xform.decl().discovered_dependencies().enumerate() {
            let key = format!("discoveredDep-{index}");
            let prefixed = dep.path.as_prefixed_path();
            let absolute = self.resolver.to_absolute(&dep.path)?;
            match self.file_date_cache.read_file_time(&absolute) {
                Some(timestamp) => {
                    dependencies.set_input_filename_and_timestamp(&key, prefixed, timestamp);
                }
                None => {
                    dependencies.add_missing_input_file(&key, prefixed);
                }
            }
        }

        let dep_path = first_output.with_suffix(".d");
        let dep_json = dependencies.to_json()?;
        let post_eval_dep_hash = self.store.write_data(
            &dep_path,
            dep_json.as_bytes(),
            WriteOptions::CACHED_ASYNC_UPLOAD,
        )?;
        self.content_hashes
            .register_content_hash(&dep_path, post_eval_dep_hash)?;

        let log_path = first_output.with_suffix(".log");
        let captured = self.info[&id].captured_log.clone();
        let log_hash =
            self.store
                .write_data(&log_path, captured.as_bytes(), WriteOptions::ASYNC_UPLOAD)?;
        if self.store.register_association(post_eval_dep_hash, &log_path, log_hash)
            == AssociationOutcome::Conflict
        {
            self.drain_association_warnings();
        }
        self.content_hashes.register_content_hash(&log_path, log_hash)?;

        // Outputs explicitly flagged to survive failure still register
        // their hashes.
        let failure_outputs: Vec<BuildPath> = xform
            .decl()
            .outputs()
            .iter()
            .filter(|o| o.flags.contains(OutputFlags::OUTPUT_ON_FAILURE))
            .map(|o| o.path.clone())
            .collect();
        for path in failure_outputs {
            match xform.decl().output_content_hashes().content_hash(&path) {
                Some(hash) => {
                    if self.content_hashes.register_content_hash(&path, hash)? {
                        self.log_trace(&format!("Registering content hash for '{path}' [{hash}]"));
                    }
                }
                None => {
                    error!(output = %path, type_name = xform.decl().type_name(),
                           "unable to find content hash of OUTPUT file for failed transform");
                }
            }
        }

        self.write_asset_dependencies(xform.decl(), &first_output, post_eval_dep_hash)?;

        Ok(())
    }

    /// Short-circuit a transform whose dependency closure resolved: pull
    /// the output hashes out of the association store instead of running
    /// it.
    pub(crate) fn skip_transform(
        &mut self,
        id: XformId,
        xform: &mut Box<dyn BuildTransform>,
        post_eval_dep_hash: DataHash,
    ) -> Result<(), SchedulerError> {
        let first_output = xform
            .decl()
            .first_output_path()
            .cloned()
            .expect("skipping a transform with no outputs");

        // The final dependency hash still lands in the collection so the
        // `.d` file can be looked up for the web log.
        self.content_hashes
            .register_content_hash(&first_output.with_suffix(".d"), post_eval_dep_hash)?;

        let outputs: Vec<BuildPath> =
            xform.decl().outputs().iter().map(|o| o.path.clone()).collect();
        for (index, output) in outputs.iter().enumerate() {
            let Some(content_hash) = self.store.resolve_association(post_eval_dep_hash, output)?
            else {
                return Err(SchedulerError::SkippedOutputUnresolved {
                    type_name: xform.decl().type_name().to_string(),
                    path: output.as_prefixed_path().to_string(),
                });
            };
            xform
                .decl_mut()
                .register_output_content_hash(output, content_hash)?;

            if index == 0 {
                // Re-register the previous run's log and asset-dependency
                // hashes; zero-byte logs may legitimately be absent.
                let log_path = first_output.with_suffix(".log");
                if let Some(log_hash) =
                    self.store.resolve_association(post_eval_dep_hash, &log_path)?
                {
                    self.content_hashes.register_content_hash(&log_path, log_hash)?;
                }

                let assetd_path = first_output.with_suffix(".assetd");
                if let Some(assetd_hash) =
                    self.store.resolve_association(post_eval_dep_hash, &assetd_path)?
                {
                    self.content_hashes
                        .register_content_hash(&assetd_path, assetd_hash)?;
                }
            }
        }

        for output in &outputs {
            self.updated_outputs
                .insert(output.as_prefixed_path().to_string());
        }

        if !self.gather_output_content_hashes(xform.decl())? {
            return Err(SchedulerError::Transform(TransformError::msg(format!(
                "failed to gather output content hashes from skipped transform '{}'",
                xform.decl().type_name()
            ))));
        }

        self.info.get_mut(&id).expect("registered transform").status =
            TransformStatus::OutputsUpdated;
        self.print_transform_status(xform.decl(), TransformStatus::OutputsUpdated);

        Ok(())
    }

    /// Copy every declared output's hash from the transform's table into
    /// the global collection. `false` when a declared output has no hash.
    pub(crate) fn gather_output_content_hashes(
        &mut self,
        decl: &TransformDecl,
    ) -> Result<bool, SchedulerError> {
        let mut all_present = true;
        for output in decl.outputs() {
            match decl.output_content_hashes().content_hash(&output.path) {
                Some(hash) => {
                    if !output.path.as_prefixed_path().is_empty()
                        && self.content_hashes.register_content_hash(&output.path, hash)?
                    {
                        self.log_trace(&format!(
                            "Registering content hash for '{}' [{}]",
                            output.path, hash
                        ));
                    }
                }
                None => {
                    error!(output = %output.path, type_name = decl.type_name(),
                           "unable to find content hash of OUTPUT file");
                    all_present = false;
                }
            }
        }

        if !all_present {
            error!(
                type_name = decl.type_name(),
                "transform succeeded but did not register content hashes for all outputs"
            );
        }
        Ok(all_present)
    }

    fn write_asset_dependencies(
        &mut self,
        decl: &TransformDecl,
        first_output: &BuildPath,
        key_hash: DataHash,
    ) -> Result<(), SchedulerError> {
        let document = decl
            .asset_dependencies()
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let json = serde_json::to_string(&document)
            .map_err(|e| SchedulerError::Config(e.to_string()))?;

        let assetd_path = first_output.with_suffix(".assetd");
        let assetd_hash =
            self.store
                .write_data(&assetd_path, json.as_bytes(), WriteOptions::ASYNC_UPLOAD)?;
        if self.store.register_association(key_hash, &assetd_path, assetd_hash)
            == AssociationOutcome::Conflict
        {
            self.drain_association_warnings();
        }
        self.content_hashes
            .register_content_hash(&assetd_path, assetd_hash)?;
        Ok(())
    }

    pub(crate) fn drain_association_warnings(&mut self) {
        for message in self.store.take_association_errors() {
            warn!("{message}");
        }
    }

    pub(crate) fn print_transform_status(&mut self, decl: &TransformDecl, status: TransformStatus) {
        let output = decl
            .first_output_path()
            .map(|p| p.as_prefixed_path().to_string())
            .unwrap_or_default();
        let status_text = match status {
            TransformStatus::WaitingInputs => "WAITING",
            TransformStatus::Failed => "FAILED",
            TransformStatus::OutputsUpdated if decl.has_validation_error() => "FAILED VALIDATION",
            TransformStatus::OutputsUpdated => "OK",
            TransformStatus::ResumeNeeded => "SUSPENDED",
        };
        let type_name = decl.type_name();
        info!("[{type_name}] {output} {status_text}");
    }
}
