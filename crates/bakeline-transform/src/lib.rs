//! The build transform contract.
//!
//! A transform is one discrete build step: it consumes typed inputs (source
//! files or prior transform outputs), produces typed outputs, and may
//! suspend itself on an execution substrate. The scheduler only sees this
//! crate's [`BuildTransform`] trait plus the [`TransformDecl`] state every
//! implementation embeds; transforms in turn only see the scheduler through
//! the [`TransformContext`] interface handed to `evaluate`.

mod content_hashes;
mod decl;
mod io;
mod parse;
mod traits;

pub use content_hashes::ContentHashCollection;
pub use decl::{DependencyMode, DiscoveredDependency, EvaluationMode, TransformDecl};
pub use io::{InputKind, OutputFlags, TransformInput, TransformOutput};
pub use parse::parse_job_output;
pub use traits::{
    BuildTransform, ResumeItem, ResumePayload, TransformContext, TransformStatus, XformId,
};

use thiserror::Error;

/// Errors a transform (or the bookkeeping around it) can produce.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{0}")]
    Message(String),

    #[error("input '{nickname}' not found for transform '{type_name}'")]
    UnknownInput {
        nickname: String,
        type_name: String,
    },

    #[error("output '{nickname}' not found for transform '{type_name}'")]
    UnknownOutput {
        nickname: String,
        type_name: String,
    },

    #[error("'{path}' was registered twice with different content hashes: {existing} then {attempted}")]
    ContentHashConflict {
        path: String,
        existing: String,
        attempted: String,
    },

    #[error("transform claimed to write {file} but the data does not exist")]
    ClaimedDataMissing { file: String },

    #[error("farm job submission was refused")]
    FarmSubmitFailed,

    #[error("no transform produces '{path}'")]
    NoProducer { path: String },

    #[error(transparent)]
    Store(#[from] bakeline_store::StoreError),

    #[error(transparent)]
    Path(#[from] bakeline_path::PathError),

    #[error(transparent)]
    Dep(#[from] bakeline_dep::DepError),

    #[error(transparent)]
    Hash(#[from] bakeline_hash::HashError),
}

impl TransformError {
    pub fn msg(text: impl Into<String>) -> Self {
        TransformError::Message(text.into())
    }
}
