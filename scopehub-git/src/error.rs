//! Error types for scopehub-git.

use thiserror::Error;

/// All errors that can arise while reading commits, trees and diffs.
#[derive(Debug, Error)]
pub enum GitError {
    /// An error from libgit2.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// A commit id that does not parse or is absent from the object store.
    #[error("commit {commit} not found in repository")]
    CommitNotFound { commit: String },

    /// A diff base that exists but is not an ancestor of the target commit.
    #[error("base {base} is not an ancestor of {target}; request a full bundle instead")]
    BaseNotAncestor { base: String, target: String },
}
