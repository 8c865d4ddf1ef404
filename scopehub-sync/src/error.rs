//! Error types for scopehub-sync.

use std::path::PathBuf;

use thiserror::Error;

use scopehub_core::RegistryError;
use scopehub_git::GitError;

/// All errors that can arise from scope store and puller operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the durable registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A local git failure (object store, refs, checkout).
    #[error("{0}")]
    Git(#[from] GitError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scope '{scope_id}' not found")]
    ScopeNotFound { scope_id: String },

    /// No puller variant handles this source type.
    #[error("Invalid scope source type: {source_type}")]
    InvalidSourceType { source_type: String },

    #[error("invalid scope id '{scope_id}': {reason}")]
    InvalidScopeId {
        scope_id: String,
        reason: &'static str,
    },

    /// Network failure while contacting the upstream.
    #[error("fetch from {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("fetch from {url} timed out after {timeout_secs}s")]
    FetchTimeout { url: String, timeout_secs: u64 },

    /// Local history diverged from upstream; the clone is left untouched.
    #[error("refusing non-fast-forward update from {local} to {upstream}")]
    NonFastForward { local: String, upstream: String },

    /// The requested diff base is a known commit but not an ancestor of the target.
    #[error("base {base} is not an ancestor of {target}")]
    DiffBaseUnresolvable { base: String, target: String },

    /// A re-add named a different upstream than the registered one.
    #[error("scope '{scope_id}' is already registered with a different source")]
    SourceChanged { scope_id: String },

    /// `diff` was asked for a range while upstream has nothing new.
    #[error("scope '{scope_id}' has nothing to pull")]
    NothingToPull { scope_id: String },
}

impl From<git2::Error> for SyncError {
    fn from(err: git2::Error) -> Self {
        SyncError::Git(GitError::Git(err))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Errors from webhook validation. Callers learn that the
/// request was rejected, not which check failed.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("malformed push payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}
