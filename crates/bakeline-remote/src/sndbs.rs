/// Lifecycle states an SN-DBS job reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnDbsJobStatus {
    Pending,
    NotFound,
    Succeeded,
    Failed,
    Cancelled,
}

impl SnDbsJobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SnDbsJobStatus::Pending => "pending",
            SnDbsJobStatus::NotFound => "not-found",
            SnDbsJobStatus::Succeeded => "succeeded",
            SnDbsJobStatus::Failed => "failed",
            SnDbsJobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a poller should keep waiting on this status.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, SnDbsJobStatus::Pending | SnDbsJobStatus::NotFound)
    }
}

/// The result payload of an SN-DBS job.
///
/// Host fields may legitimately be blank; formatting code must tolerate
/// that.
#[derive(Clone, Debug)]
pub struct SnDbsJobResult {
    pub status: SnDbsJobStatus,
    pub command: String,
    /// Human-readable "where it ran" string from the SN-DBS monitor.
    pub where_ran: String,
    pub host_name: String,
    pub host_ip: String,
    /// Unix seconds.
    pub start_time: i64,
    pub end_time: i64,
    pub std_out: String,
    pub std_err: String,
    pub fail_reason: String,
}

impl Default for SnDbsJobResult {
    fn default() -> Self {
        SnDbsJobResult {
            status: SnDbsJobStatus::NotFound,
            command: String::new(),
            where_ran: String::new(),
            host_name: String::new(),
            host_ip: String::new(),
            start_time: 0,
            end_time: 0,
            std_out: String::new(),
            std_err: String::new(),
            fail_reason: String::new(),
        }
    }
}

/// A session against the SN-DBS distributed build service.
pub trait SnDbsSession {
    /// Poll the status of a job. `Pending` and `NotFound` mean keep waiting.
    fn job_result(&mut self, project: &str, job_id: &str) -> SnDbsJobResult;
}

/// An SN-DBS session for builds without the service attached; every job
/// reports `NotFound` forever.
#[derive(Debug, Default)]
pub struct NullSnDbs;

impl SnDbsSession for NullSnDbs {
    fn job_result(&mut self, _project: &str, _job_id: &str) -> SnDbsJobResult {
        SnDbsJobResult::default()
    }
}
