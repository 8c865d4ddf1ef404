//! Puller variants: how a scope's upstream is checked, diffed and fast-forwarded.
//!
//! The set of source types is closed. Adding one means a new [`SourceKind`]
//! value, a new [`ScopePuller`] variant and its four operations; callers only
//! ever go through [`ScopePuller`].

mod git;

use std::ffi::c_int;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use scopehub_core::{CommitId, CommitRange, Scope, ScopeRepository};

use crate::error::SyncError;

pub use git::GitPuller;

/// Default bound on a single clone or fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Source kinds
// ---------------------------------------------------------------------------

/// Recognised values of `ScopePolicy::source_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Git repository polled over the network.
    Git,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
        }
    }
}

impl FromStr for SourceKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(SourceKind::Git),
            other => Err(SyncError::InvalidSourceType {
                source_type: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullerOptions {
    /// Upper bound for one network operation. A pull that exceeds it leaves
    /// the tracked head where it was.
    pub fetch_timeout: Duration,
}

impl Default for PullerOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A scope's puller, selected by its source type.
#[derive(Debug)]
pub enum ScopePuller {
    Git(GitPuller),
}

impl ScopePuller {
    /// Build the puller for `scope`, cloning into `clone_dir` when needed.
    pub fn for_scope(
        scope: &Scope,
        clone_dir: PathBuf,
        options: &PullerOptions,
    ) -> Result<Self, SyncError> {
        match scope.policy.source_type.parse::<SourceKind>()? {
            SourceKind::Git => Ok(ScopePuller::Git(GitPuller::new(scope, clone_dir, options))),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            ScopePuller::Git(_) => SourceKind::Git,
        }
    }

    /// Ensure a local copy exists and return the commit it has checked out.
    pub fn materialize(&self) -> Result<CommitId, SyncError> {
        match self {
            ScopePuller::Git(puller) => puller.materialize(),
        }
    }

    /// True iff upstream has moved past the tracked head. Never mutates local state.
    pub fn check(&self, registry: &dyn ScopeRepository) -> Result<bool, SyncError> {
        match self {
            ScopePuller::Git(puller) => puller.check(registry),
        }
    }

    /// Range from the tracked head to the newly observed upstream head.
    /// Fails with [`SyncError::NothingToPull`] when that range is empty.
    pub fn diff(&self, registry: &dyn ScopeRepository) -> Result<CommitRange, SyncError> {
        match self {
            ScopePuller::Git(puller) => puller.diff(registry),
        }
    }

    /// Fast-forward the local copy to upstream and record the new head.
    /// Returns the range that was applied (empty when already current).
    pub fn pull(&self, registry: &dyn ScopeRepository) -> Result<CommitRange, SyncError> {
        match self {
            ScopePuller::Git(puller) => puller.pull(registry),
        }
    }

    /// Like [`pull`](Self::pull), but advances to `range.new` as fetched by a
    /// preceding [`diff`](Self::diff) instead of contacting upstream again.
    pub fn pull_range(
        &self,
        registry: &dyn ScopeRepository,
        range: &CommitRange,
    ) -> Result<CommitRange, SyncError> {
        match self {
            ScopePuller::Git(puller) => puller.pull_range(registry, range),
        }
    }

    /// Branch the local copy follows. Requires a local copy.
    pub fn tracked_branch(&self) -> Result<String, SyncError> {
        match self {
            ScopePuller::Git(puller) => puller.local_branch(),
        }
    }
}

/// Bound libgit2's socket connects and reads by `timeout`.
///
/// The setting is process-wide, so the most recently built store wins. A
/// stalled connection produces no progress callbacks; only this bounds it.
pub(crate) fn apply_transport_timeouts(timeout: Duration) {
    static WRITER: Mutex<()> = Mutex::new(());
    let _guard = WRITER.lock().unwrap_or_else(PoisonError::into_inner);

    // libgit2 reads 0 as "no timeout".
    let millis = c_int::try_from(timeout.as_millis())
        .unwrap_or(c_int::MAX)
        .max(1);
    // SAFETY: both calls store an int in a libgit2 global; concurrent writers
    // from this crate are serialized by WRITER.
    let applied = unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)
            .and_then(|()| git2::opts::set_server_timeout_in_milliseconds(millis))
    };
    if let Err(err) = applied {
        tracing::warn!(error = %err, "failed to set git transport timeouts");
    }
}
