use std::ops::BitOr;

use bakeline_hash::DataHash;
use bakeline_path::{BuildFile, BuildPath};

/// How an input participates in dependency tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// An artist-authored file on disk, tracked by modification time.
    SourceFile,
    /// Another transform's output, tracked by content hash.
    HashedResource,
}

/// One typed input of a transform.
#[derive(Clone, Debug)]
pub struct TransformInput {
    pub file: BuildFile,
    pub nickname: String,
    pub kind: InputKind,
}

impl TransformInput {
    /// The kind is inferred from the path prefix: `[src]` paths are source
    /// files, everything else is a hashed resource.
    #[must_use]
    pub fn new(path: BuildPath) -> Self {
        let kind = if path.is_source_path() {
            InputKind::SourceFile
        } else {
            InputKind::HashedResource
        };
        TransformInput {
            file: BuildFile::unpinned(path),
            nickname: String::new(),
            kind,
        }
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    /// Wire another transform's output up as an input.
    #[must_use]
    pub fn from_output(output: &TransformOutput) -> Self {
        TransformInput {
            file: BuildFile::unpinned(output.path.clone()),
            nickname: output.nickname.clone(),
            kind: InputKind::HashedResource,
        }
    }

    #[must_use]
    pub fn path(&self) -> &BuildPath {
        self.file.build_path()
    }

    #[must_use]
    pub fn content_hash(&self) -> DataHash {
        self.file.content_hash()
    }
}

/// Behavior flags on a transform output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputFlags(u8);

impl OutputFlags {
    pub const NONE: OutputFlags = OutputFlags(0);
    /// Copy the output to its physical filesystem location after the build.
    pub const REPLICATE: OutputFlags = OutputFlags(1 << 0);
    /// Association conflicts on this output are warnings, not fatal.
    pub const NONDETERMINISTIC: OutputFlags = OutputFlags(1 << 1);
    /// Replicated when the build replicates the manifest.
    pub const INCLUDE_IN_MANIFEST: OutputFlags = OutputFlags(1 << 2);
    /// The content hash is registered even when the transform fails.
    pub const OUTPUT_ON_FAILURE: OutputFlags = OutputFlags(1 << 3);

    #[must_use]
    pub fn contains(self, other: OutputFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OutputFlags {
    type Output = OutputFlags;

    fn bitor(self, rhs: OutputFlags) -> OutputFlags {
        OutputFlags(self.0 | rhs.0)
    }
}

/// One typed output of a transform.
#[derive(Clone, Debug)]
pub struct TransformOutput {
    pub path: BuildPath,
    pub nickname: String,
    pub flags: OutputFlags,
}

impl TransformOutput {
    #[must_use]
    pub fn new(path: BuildPath) -> Self {
        TransformOutput {
            path,
            nickname: String::new(),
            flags: OutputFlags::NONE,
        }
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: OutputFlags) -> Self {
        self.flags = flags;
        self
    }
}
