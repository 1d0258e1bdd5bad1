//! Prefixed virtual build paths.
//!
//! Every file the pipeline touches is named by a [`BuildPath`]: a virtual
//! path whose first component is a bracketed prefix sentinel such as
//! `[src]` or `[build]`. Prefixed form is the identity used in maps, sets
//! and the association store; conversion to a real filesystem location goes
//! through a [`PathResolver`] configured with one root per prefix.

mod build_file;
mod build_path;
mod resolver;

pub use build_file::BuildFile;
pub use build_path::{BuildPath, Prefix};
pub use resolver::PathResolver;

use thiserror::Error;

/// Errors produced while parsing or resolving build paths.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("build path must start with a bracketed prefix: {path:?}")]
    MissingPrefix { path: String },

    #[error("unknown path prefix in {path:?}")]
    UnknownPrefix { path: String },

    #[error("no filesystem root configured for prefix {prefix}")]
    UnmappedPrefix { prefix: Prefix },

    #[error("absolute path {path} is not under any configured root")]
    OutsideRoots { path: String },
}
