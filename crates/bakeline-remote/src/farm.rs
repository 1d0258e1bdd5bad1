use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a farm job. `INVALID` is the sentinel returned when a
/// submission is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FarmJobId(u64);

impl FarmJobId {
    pub const INVALID: FarmJobId = FarmJobId(0);

    #[must_use]
    pub const fn new(id: u64) -> Self {
        FarmJobId(id)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for FarmJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-level farm configuration, applied once per build.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FarmConfig {
    pub pool: String,
    pub user_name: String,
    /// Restrict jobs to the submitting machine.
    pub local_only: bool,
}

/// Everything needed to (re)submit one farm job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FarmJobSpec {
    pub command_line: String,
    pub required_memory: u64,
    pub num_threads: u32,
    pub remotable: bool,
}

/// The record a finished farm job leaves behind.
#[derive(Clone, Debug)]
pub struct FarmJob {
    pub id: FarmJobId,
    pub command: String,
    /// Farm client machine that ran the job.
    pub client: String,
    pub exit_code: i32,
    /// Combined stdout/stderr text of the job.
    pub output: String,
    pub duration_secs: i64,
}

/// A live session against the build farm, polled by the scheduler.
pub trait FarmSession {
    fn configure(&mut self, config: &FarmConfig);

    /// Submit a job. Returns [`FarmJobId::INVALID`] when submission fails.
    fn submit_job(&mut self, spec: &FarmJobSpec) -> FarmJobId;

    /// Drain the set of jobs that finished since the last poll.
    fn done_jobs(&mut self) -> Vec<FarmJobId>;

    /// The record of a submitted job, finished or not.
    fn job(&self, id: FarmJobId) -> Option<FarmJob>;
}

/// A farm session for builds with no farm attached. Submissions are
/// refused, which the scheduler treats as fatal for the submitting
/// transform.
#[derive(Debug, Default)]
pub struct NullFarm;

impl FarmSession for NullFarm {
    fn configure(&mut self, _config: &FarmConfig) {}

    fn submit_job(&mut self, _spec: &FarmJobSpec) -> FarmJobId {
        FarmJobId::INVALID
    }

    fn done_jobs(&mut self) -> Vec<FarmJobId> {
        Vec::new()
    }

    fn job(&self, _id: FarmJobId) -> Option<FarmJob> {
        None
    }
}
