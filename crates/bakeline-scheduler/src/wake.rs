//! Wait-list polling: wake transforms whose substrate event arrived.
//!
//! All four pollers share the same shape: snapshot the list, remove an
//! item *before* its heavy post-processing so a non-fatal error leaves the
//! list consistent, package the result into a resume item, and queue the
//! transform into `new_xforms`.

use bakeline_transform::{ResumeItem, ResumePayload, TransformStatus, parse_job_output};
use chrono::DateTime;
use tracing::warn;

use crate::scheduler::BuildScheduler;
use crate::wait::FarmWaitItem;
use crate::SchedulerError;

impl BuildScheduler {
    pub(crate) fn wake_up_waiting_transforms(&mut self) -> Result<(), SchedulerError> {
        self.check_farm_waiting()?;
        self.check_threadpool_waiting()?;
        self.check_transform_waiting();
        self.check_sndbs_waiting();
        Ok(())
    }

    fn check_farm_waiting(&mut self) -> Result<(), SchedulerError> {
        let completed = self.farm.done_jobs();
        if completed.is_empty() {
            return Ok(());
        }

        let mut index = 0;
        while index < self.farm_waiting.len() {
            if !completed.contains(&self.farm_waiting[index].job_id) {
                index += 1;
                continue;
            }

            let item = self.farm_waiting.remove(index);
            let id = item.xform;
            let Some(job) = self.farm.job(item.job_id) else {
                return Err(SchedulerError::UnknownFarmJob {
                    type_name: self.xforms[id.0].type_name.clone(),
                    job_id: item.job_id.as_u64(),
                });
            };
            self.log_trace(&format!(
                "Farm Job Completed - {} [exitcode: {}]",
                job.id, job.exit_code
            ));

            let mut xform = self.take_xform(id);

            // Extract warnings, errors and generated content hashes from
            // the job output before deciding the transform's fate.
            let mut warnings = Vec::new();
            let mut errors = Vec::new();
            let parse_result = parse_job_output(
                &job.output,
                &mut warnings,
                &mut errors,
                xform.decl_mut().output_content_hashes_mut(),
                &self.resolver,
                &mut self.store,
            );

            self.append_transform_log(
                id,
                &format!(
                    "\n\n=== [ Farm Command on client '{}'] ==================================================\n\
                     {}\n\n\
                     === [ Farm Output - BEGIN ] ===========================================\n\
                     {}\n\n\
                     === [ Farm Output - END ] =============================================\n",
                    job.client, job.command, job.output
                ),
            );

            if let Err(parse_error) = parse_result {
                self.put_xform(id, xform);
                return Err(parse_error.into());
            }

            let mut terminal_failure = false;
            if job.exit_code != 0 {
                // With retries remaining, resubmit and keep waiting.
                let mut retry_successful = false;
                if item.retries > 0 {
                    if let Some(spec) = &item.spec {
                        let new_job_id = self.farm.submit_job(spec);
                        if new_job_id.is_valid() {
                            retry_successful = true;
                            let sequence_id = self.next_seq();
                            self.farm_waiting.insert(
                                0,
                                FarmWaitItem {
                                    sequence_id,
                                    xform: id,
                                    job_id: new_job_id,
                                    spec: item.spec.clone(),
                                    retries: item.retries - 1,
                                },
                            );
                            warn!("job failed, retrying");
                            self.log_trace(&format!(
                                "Build Transform {} farm job {} failed, retrying with jobid {}",
                                self.xforms[id.0].type_name, item.job_id, new_job_id
                            ));
                        } else {
                            xform
                                .decl_mut()
                                .add_error_message("Error: job retry failed!");
                        }
                    }
                }

                if !retry_successful {
                    if errors.is_empty() {
                        xform.decl_mut().add_error_message(format!(
                            "Error: Executable returned an error code without printing an error message. Exit code {}",
                            job.exit_code
                        ));
                    }
                    xform.on_job_error();
                    xform.decl_mut().add_dep_mismatch("Farm job failed");
                    terminal_failure = true;
                }
            } else {
                let transform_info = self.info.get_mut(&id).expect("registered transform");
                transform_info.farm_execution_time = job.duration_secs;
                transform_info.resume_item = Some(ResumeItem {
                    sequence_id: item.sequence_id,
                    payload: ResumePayload::Farm(job),
                });
                self.new_xforms.push(id);
            }

            let result = if terminal_failure {
                self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::Failed)
            } else {
                Ok(())
            };
            self.put_xform(id, xform);
            result?;
        }

        Ok(())
    }

    fn check_threadpool_waiting(&mut self) -> Result<(), SchedulerError> {
        let mut index = 0;
        while index < self.threadpool_waiting.len() {
            let handle = self.threadpool_waiting[index].handle;
            let Some(outcome) = self.thread_pool.try_take(handle) else {
                index += 1;
                continue;
            };

            let item = self.threadpool_waiting.remove(index);
            let id = item.xform;
            match outcome {
                Ok(payload) => {
                    self.info
                        .get_mut(&id)
                        .expect("registered transform")
                        .resume_item = Some(ResumeItem {
                        sequence_id: item.sequence_id,
                        payload: ResumePayload::ThreadJob(payload),
                    });
                    self.new_xforms.push(id);
                }
                Err(panic_message) => {
                    let mut xform = self.take_xform(id);
                    xform
                        .decl_mut()
                        .add_error_message(format!("Worker job panicked: {panic_message}"));
                    let result =
                        self.on_build_transform_failed(id, xform.as_mut(), TransformStatus::Failed);
                    self.put_xform(id, xform);
                    result?;
                }
            }
        }

        Ok(())
    }

    fn check_transform_waiting(&mut self) {
        let mut index = 0;
        while index < self.transform_waiting.len() {
            let waited = self.transform_waiting[index].waited;
            if !self.info.contains_key(&waited) {
                index += 1;
                continue;
            }

            let item = self.transform_waiting.remove(index);
            self.info
                .get_mut(&item.xform)
                .expect("registered transform")
                .resume_item = Some(ResumeItem {
                sequence_id: item.sequence_id,
                payload: ResumePayload::Transform(item.waited),
            });
            self.new_xforms.push(item.xform);
        }
    }

    fn check_sndbs_waiting(&mut self) {
        let mut index = 0;
        while index < self.sndbs_waiting.len() {
            let (project, job_id) = {
                let item = &self.sndbs_waiting[index];
                (item.project.clone(), item.job_id.clone())
            };

            let result = self.sndbs.job_result(&project, &job_id);
            if result.status.is_in_flight() {
                index += 1;
                continue;
            }

            let item = self.sndbs_waiting.remove(index);
            let id = item.xform;

            let mut banner = format!(
                "\n\n=== [ SN-DBS Command on client '{}' Status: {} ] ==================================================\n",
                result.where_ran,
                result.status.as_str()
            );
            banner.push_str(&format!("  Command: {}\n", result.command));
            if !result.host_name.is_empty() {
                banner.push_str(&format!(
                    "  Host: {} ({})\n",
                    result.host_name, result.host_ip
                ));
            }
            banner.push_str(&format!("  Start: {}\n", format_timestamp(result.start_time)));
            banner.push_str(&format!("  End:   {}\n", format_timestamp(result.end_time)));
            banner.push_str(&format!(
                "  Duration:   {:.2} seconds\n",
                (result.end_time - result.start_time) as f32
            ));

            if !result.std_err.is_empty() {
                banner.push_str(
                    "\n\n=== [ Job Std Err ] ===================================================\n",
                );
                for line in result.std_err.lines() {
                    banner.push_str(&format!("ERROR: {line}\n"));
                }
            }

            banner.push_str(
                "\n\n=== [ Job Std Out ] ===================================================\n",
            );
            banner.push_str(&result.std_out);
            banner.push_str(
                "\n\n=======================================================================\n",
            );

            self.append_transform_log(id, &banner);
            self.info
                .get_mut(&id)
                .expect("registered transform")
                .resume_item = Some(ResumeItem {
                sequence_id: item.sequence_id,
                payload: ResumePayload::SnDbs(result),
            });
            self.new_xforms.push(id);
        }
    }
}

fn format_timestamp(unix_seconds: i64) -> String {
    DateTime::from_timestamp(unix_seconds, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "BAD-TIME-VALUE".to_string())
}
