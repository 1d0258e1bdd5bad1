//! The build scheduler.
//!
//! [`BuildScheduler`] owns the transform DAG and drives the cooperative,
//! single-threaded work loop: it decides which transforms are runnable,
//! short-circuits the ones whose dependency closure is unchanged, suspends
//! transforms onto the farm / SN-DBS / thread-pool substrates, polls those
//! substrates for wakeups, and records every output in the content-hash
//! collection and the association store.
//!
//! Parallelism never happens on the scheduling thread itself; a transform
//! that wants concurrency dispatches work to a substrate and returns
//! [`TransformStatus::ResumeNeeded`].
//!
//! [`TransformStatus::ResumeNeeded`]: bakeline_transform::TransformStatus

mod config;
mod context;
mod engine;
mod eval_ctx;
mod info;
mod replicate;
mod results;
mod scheduler;
mod scheduler_log;
mod source_view;
mod wait;
mod wake;

pub use config::BuildSchedulerConfig;
pub use context::{AssetType, BuildContext, ContextId};
pub use info::{BuildStatus, SourceAssetViewStatus, TransformSchedulerInfo};
pub use scheduler::{AddedTransform, BuildScheduler};
pub use source_view::SourceAssetView;

use thiserror::Error;

/// Fatal scheduler errors.
///
/// These correspond to conditions the pipeline treats as immediate aborts:
/// configuration and programmer errors, association conflicts on
/// deterministic outputs, and internal bookkeeping inconsistencies.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "multiple instantiations of transform '{type_name}' with first output '{first_output}' specify different outputs"
    )]
    DuplicateOutputMismatch {
        type_name: String,
        first_output: String,
    },

    #[error("unable to find content hash of INPUT file '{path}' for transform '{type_name}'")]
    MissingInputHash { path: String, type_name: String },

    #[error("BuildTransform '{type_name}' claims to have succeeded but it generated errors")]
    SucceededWithErrors { type_name: String },

    #[error("BuildTransform '{type_name}' failed but is not reporting why")]
    FailedWithoutMessage { type_name: String },

    #[error("association conflict: {details}")]
    AssociationConflict { details: String },

    #[error("transform '{type_name}' should be skipped but no association exists for '{path}'")]
    SkippedOutputUnresolved { type_name: String, path: String },

    #[error(
        "a validation error for output '{path}' could not be associated back to a transform; this is a logic bug"
    )]
    ValidationNotAttributable { path: String },

    #[error("transform '{type_name}' is waiting on farm job {job_id} that was never submitted to this session")]
    UnknownFarmJob { type_name: String, job_id: u64 },

    #[error("failed to replicate '{path}': {reason}")]
    Replication { path: String, reason: String },

    #[error("invalid scheduler configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Transform(#[from] bakeline_transform::TransformError),

    #[error(transparent)]
    Store(#[from] bakeline_store::StoreError),

    #[error(transparent)]
    Path(#[from] bakeline_path::PathError),

    #[error(transparent)]
    Dep(#[from] bakeline_dep::DepError),

    #[error(transparent)]
    Hash(#[from] bakeline_hash::HashError),
}
