//! # scopehub-git
//!
//! Read-only git plumbing for scopes: policy bundle construction and
//! changed-directory computation over a [`CommitRange`](scopehub_core::CommitRange).
//!
//! Nothing in this crate moves refs; fetching and fast-forwarding live in
//! `scopehub-sync`.

pub mod bundle;
pub mod changes;
pub mod error;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use bundle::{BundleEntry, BundleMaker, PolicyBundle, Selection};
pub use changes::{changed_directories, changed_paths, notified_directory, DIRECTORY_DEPTH};
pub use error::GitError;

use git2::{ErrorCode, Oid, Repository};
use scopehub_core::CommitId;

/// Resolve a commit id to an object id present in `repo`.
pub fn find_commit_oid(repo: &Repository, commit: &CommitId) -> Result<Oid, GitError> {
    let not_found = || GitError::CommitNotFound {
        commit: commit.0.clone(),
    };
    let oid = Oid::from_str(commit.as_str()).map_err(|_| not_found())?;
    match repo.find_commit(oid) {
        Ok(found) => Ok(found.id()),
        Err(err) if err.code() == ErrorCode::NotFound => Err(not_found()),
        Err(err) => Err(err.into()),
    }
}

/// Commit id currently checked out in `repo`.
pub fn head_commit(repo: &Repository) -> Result<CommitId, GitError> {
    let oid = repo.head()?.peel_to_commit()?.id();
    Ok(CommitId(oid.to_string()))
}
