//! Scripted substrate sessions for tests.

use std::collections::{HashMap, VecDeque};

use crate::{
    FarmConfig, FarmJob, FarmJobId, FarmJobSpec, FarmSession, SnDbsJobResult, SnDbsSession,
};

/// One planned outcome for the next submitted farm job.
#[derive(Clone, Debug)]
pub struct PlannedFarmJob {
    pub exit_code: i32,
    pub output: String,
    pub client: String,
    pub duration_secs: i64,
}

impl Default for PlannedFarmJob {
    fn default() -> Self {
        PlannedFarmJob {
            exit_code: 0,
            output: String::new(),
            client: "farm-client-01".to_string(),
            duration_secs: 3,
        }
    }
}

impl PlannedFarmJob {
    #[must_use]
    pub fn succeeding(output: impl Into<String>) -> Self {
        PlannedFarmJob {
            output: output.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn failing(exit_code: i32, output: impl Into<String>) -> Self {
        PlannedFarmJob {
            exit_code,
            output: output.into(),
            ..Default::default()
        }
    }
}

/// A farm whose job outcomes are scripted in submission order.
///
/// Each submission consumes the next plan (success with empty output when
/// the plan queue runs dry) and completes on the following `done_jobs`
/// poll.
#[derive(Debug, Default)]
pub struct ScriptedFarm {
    next_id: u64,
    plans: VecDeque<PlannedFarmJob>,
    jobs: HashMap<FarmJobId, FarmJob>,
    pending_done: Vec<FarmJobId>,
    /// Every spec this farm was asked to run, in order.
    pub submitted: Vec<FarmJobSpec>,
    /// When set, submissions are refused with the invalid id.
    pub refuse_submissions: bool,
}

impl ScriptedFarm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&mut self, plan: PlannedFarmJob) {
        self.plans.push_back(plan);
    }

    #[must_use]
    pub fn with_plans(plans: impl IntoIterator<Item = PlannedFarmJob>) -> Self {
        let mut farm = Self::new();
        farm.plans.extend(plans);
        farm
    }
}

impl FarmSession for ScriptedFarm {
    fn configure(&mut self, _config: &FarmConfig) {}

    fn submit_job(&mut self, spec: &FarmJobSpec) -> FarmJobId {
        self.submitted.push(spec.clone());
        if self.refuse_submissions {
            return FarmJobId::INVALID;
        }

        self.next_id += 1;
        let id = FarmJobId::new(self.next_id);
        let plan = self.plans.pop_front().unwrap_or_default();
        self.jobs.insert(
            id,
            FarmJob {
                id,
                command: spec.command_line.clone(),
                client: plan.client,
                exit_code: plan.exit_code,
                output: plan.output,
                duration_secs: plan.duration_secs,
            },
        );
        self.pending_done.push(id);
        id
    }

    fn done_jobs(&mut self) -> Vec<FarmJobId> {
        std::mem::take(&mut self.pending_done)
    }

    fn job(&self, id: FarmJobId) -> Option<FarmJob> {
        self.jobs.get(&id).cloned()
    }
}

/// An SN-DBS session answering polls from scripted result queues.
///
/// Queued results for a job are returned in order; the final one repeats,
/// so a sequence of `Pending, Succeeded` holds at `Succeeded`.
#[derive(Debug, Default)]
pub struct ScriptedSnDbs {
    results: HashMap<(String, String), VecDeque<SnDbsJobResult>>,
}

impl ScriptedSnDbs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&mut self, project: &str, job_id: &str, result: SnDbsJobResult) {
        self.results
            .entry((project.to_string(), job_id.to_string()))
            .or_default()
            .push_back(result);
    }
}

impl SnDbsSession for ScriptedSnDbs {
    fn job_result(&mut self, project: &str, job_id: &str) -> SnDbsJobResult {
        let Some(queue) = self
            .results
            .get_mut(&(project.to_string(), job_id.to_string()))
        else {
            return SnDbsJobResult::default();
        };

        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}
