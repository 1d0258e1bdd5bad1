//! bakeline — a content-addressed build scheduler for game asset
//! pipelines.
//!
//! The scheduler coordinates a heterogeneous DAG of *build transforms*:
//! discrete build steps that consume typed inputs (source files or prior
//! transform outputs) and produce typed outputs, executing across a local
//! thread pool, a distributed build farm, and an SN-DBS service. A content
//! hash database plus a key-to-(file, content hash) association store make
//! builds incremental: a transform is skipped when its tracked dependency
//! closure is unchanged and its outputs are still retrievable.
//!
//! The crates compose bottom-up:
//!
//! - [`bakeline_hash`] — digests and canonical JSON hashing
//! - [`bakeline_path`] — prefixed virtual paths and pinned files
//! - [`bakeline_dep`] — dependency records and file timestamp caching
//! - [`bakeline_store`] — the content-addressed store and associations
//! - [`bakeline_remote`] — farm / SN-DBS / thread-pool substrates
//! - [`bakeline_transform`] — the transform contract
//! - [`bakeline_scheduler`] — the scheduler itself
//!
//! This crate re-exports the public surface and provides the tracing
//! bootstrap used by tool frontends.

pub mod logging;

pub use bakeline_dep::{FileDateCache, SimpleDependency};
pub use bakeline_hash::DataHash;
pub use bakeline_path::{BuildFile, BuildPath, PathResolver, Prefix};
pub use bakeline_remote::{
    FarmConfig, FarmJob, FarmJobId, FarmJobSpec, FarmSession, SnDbsJobResult, SnDbsJobStatus,
    SnDbsSession, ThreadPool, WorkItemHandle,
};
pub use bakeline_scheduler::{
    AddedTransform, AssetType, BuildContext, BuildScheduler, BuildSchedulerConfig, BuildStatus,
    ContextId, SchedulerError, SourceAssetView, TransformSchedulerInfo,
};
pub use bakeline_store::{
    AssociationOutcome, DataStore, FsDataStore, MemoryDataStore, StoreError, WriteOptions,
};
pub use bakeline_transform::{
    BuildTransform, ContentHashCollection, DependencyMode, EvaluationMode, InputKind, OutputFlags,
    ResumeItem, ResumePayload, TransformContext, TransformDecl, TransformError, TransformInput,
    TransformOutput, TransformStatus, XformId,
};
