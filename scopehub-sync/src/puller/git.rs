//! Git polling puller.
//!
//! One clone per scope under `<base_dir>/scopes/<scope_id>`. Clones land in a
//! hidden `.<scope_id>.tmp` sibling first and are renamed into place, so a
//! half-finished clone is never mistaken for a usable one.
//!
//! Every network operation gets a deadline. Stalled sockets are bounded by
//! libgit2's transport timeouts (set when the store is built). Slow transfers
//! are cut off from the progress callbacks (returning `false` aborts them),
//! and the deadline is re-checked before any ref is moved.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, CredentialType, Direction, ErrorCode, FetchOptions, Oid, RemoteCallbacks, Repository,
};

use scopehub_core::{CommitId, CommitRange, GitAuth, Scope, ScopeId, ScopeRepository};
use scopehub_git::head_commit;

use crate::error::{io_err, SyncError};
use crate::puller::PullerOptions;

/// libgit2 re-asks for credentials after each rejection; give up after this many.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct GitPuller {
    scope_id: ScopeId,
    url: String,
    branch: Option<String>,
    auth: GitAuth,
    clone_dir: PathBuf,
    fetch_timeout: Duration,
}

impl GitPuller {
    pub fn new(scope: &Scope, clone_dir: PathBuf, options: &PullerOptions) -> Self {
        Self {
            scope_id: scope.scope_id.clone(),
            url: scope.policy.url.clone(),
            branch: scope.policy.branch.clone(),
            auth: scope.policy.auth.clone(),
            clone_dir,
            fetch_timeout: options.fetch_timeout,
        }
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub fn materialize(&self) -> Result<CommitId, SyncError> {
        let repo = self.open_or_clone(self.deadline())?;
        Ok(head_commit(&repo)?)
    }

    pub fn check(&self, registry: &dyn ScopeRepository) -> Result<bool, SyncError> {
        if !self.is_cloned() {
            // Nothing local to compare against; a pull re-clones.
            return Ok(true);
        }
        let deadline = self.deadline();
        let repo = self.open()?;
        let branch = self.tracked_branch(&repo)?;
        let upstream = self.remote_head(&repo, &branch, deadline)?;
        let tracked = registry.get_head(&self.scope_id)?;

        let changed = tracked.as_ref().map(CommitId::as_str) != Some(upstream.to_string().as_str());
        tracing::debug!(
            scope_id = %self.scope_id,
            branch = %branch,
            upstream = %upstream,
            tracked = ?tracked.as_ref().map(CommitId::as_str),
            changed,
            "checked upstream head",
        );
        Ok(changed)
    }

    pub fn diff(&self, registry: &dyn ScopeRepository) -> Result<CommitRange, SyncError> {
        let deadline = self.deadline();
        let repo = self.open_or_clone(deadline)?;
        let branch = self.tracked_branch(&repo)?;
        let upstream = self.fetch(&repo, &branch, deadline)?;

        let range = CommitRange::new(
            registry.get_head(&self.scope_id)?,
            CommitId(upstream.to_string()),
        );
        if range.is_empty() {
            return Err(SyncError::NothingToPull {
                scope_id: self.scope_id.0.clone(),
            });
        }
        Ok(range)
    }

    pub fn pull(&self, registry: &dyn ScopeRepository) -> Result<CommitRange, SyncError> {
        let deadline = self.deadline();
        let repo = self.open_or_clone(deadline)?;
        let branch = self.tracked_branch(&repo)?;
        let upstream = self.fetch(&repo, &branch, deadline)?;
        self.fast_forward(&repo, &branch, upstream, deadline, registry)
    }

    /// Advance to `range.new`, which [`diff`](Self::diff) already fetched.
    pub fn pull_range(
        &self,
        registry: &dyn ScopeRepository,
        range: &CommitRange,
    ) -> Result<CommitRange, SyncError> {
        let deadline = self.deadline();
        let repo = self.open()?;
        let branch = self.tracked_branch(&repo)?;
        let upstream = Oid::from_str(range.new.as_str())?;
        self.fast_forward(&repo, &branch, upstream, deadline, registry)
    }

    pub fn local_branch(&self) -> Result<String, SyncError> {
        let repo = self.open()?;
        self.tracked_branch(&repo)
    }

    fn fast_forward(
        &self,
        repo: &Repository,
        branch: &str,
        upstream: Oid,
        deadline: Instant,
        registry: &dyn ScopeRepository,
    ) -> Result<CommitRange, SyncError> {
        let local_ref_name = format!("refs/heads/{branch}");
        let mut local_ref = repo.find_reference(&local_ref_name)?;
        let local = local_ref.peel_to_commit()?.id();

        if local != upstream && !repo.graph_descendant_of(upstream, local)? {
            return Err(SyncError::NonFastForward {
                local: local.to_string(),
                upstream: upstream.to_string(),
            });
        }
        if Instant::now() >= deadline {
            return Err(self.timeout_error());
        }

        if local != upstream {
            local_ref.set_target(upstream, "scopehub: fast-forward")?;
            repo.set_head(&local_ref_name)?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        }

        let old = registry.get_head(&self.scope_id)?;
        let new = CommitId(upstream.to_string());
        if old.as_ref() != Some(&new) {
            registry.set_head(&self.scope_id, &new)?;
        }

        let range = CommitRange::new(old, new);
        tracing::info!(scope_id = %self.scope_id, range = %range, "pulled scope");
        Ok(range)
    }

    // -----------------------------------------------------------------------
    // Local clone
    // -----------------------------------------------------------------------

    fn is_cloned(&self) -> bool {
        self.clone_dir.join(".git").is_dir()
    }

    fn open(&self) -> Result<Repository, SyncError> {
        Ok(Repository::open(&self.clone_dir)?)
    }

    fn open_or_clone(&self, deadline: Instant) -> Result<Repository, SyncError> {
        if self.is_cloned() {
            return self.open();
        }
        self.clone_fresh(deadline)?;
        self.open()
    }

    fn clone_fresh(&self, deadline: Instant) -> Result<(), SyncError> {
        let parent = self
            .clone_dir
            .parent()
            .ok_or_else(|| io_err(&self.clone_dir, std::io::ErrorKind::InvalidInput.into()))?;
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

        let tmp = parent.join(format!(".{}.tmp", self.scope_id));
        remove_dir_if_exists(&tmp)?;
        remove_dir_if_exists(&self.clone_dir)?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.callbacks(deadline));
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(branch) = &self.branch {
            builder.branch(branch);
        }

        tracing::info!(scope_id = %self.scope_id, url = %self.url, "cloning scope upstream");
        if let Err(err) = builder.clone(&self.url, &tmp) {
            let _ = fs::remove_dir_all(&tmp);
            return Err(self.network_error(err, deadline));
        }

        fs::rename(&tmp, &self.clone_dir).map_err(|e| io_err(&self.clone_dir, e))
    }

    /// The configured branch, or the branch the clone checked out.
    fn tracked_branch(&self, repo: &Repository) -> Result<String, SyncError> {
        if let Some(branch) = &self.branch {
            return Ok(branch.clone());
        }
        let head = repo.head()?;
        match head.shorthand() {
            Some(name) if head.is_branch() => Ok(name.to_owned()),
            _ => Err(SyncError::Fetch {
                url: self.url.clone(),
                message: "clone has no checked-out branch and none is configured".to_owned(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------------

    /// List upstream refs and return the tip of `branch`.
    fn remote_head(&self, repo: &Repository, branch: &str, deadline: Instant) -> Result<Oid, SyncError> {
        let mut remote = repo.remote_anonymous(&self.url)?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(self.callbacks(deadline)), None)
            .map_err(|err| self.network_error(err, deadline))?;

        let wanted = format!("refs/heads/{branch}");
        let heads = connection
            .list()
            .map_err(|err| self.network_error(err, deadline))?;
        heads
            .iter()
            .find(|head| head.name() == wanted)
            .map(|head| head.oid())
            .ok_or_else(|| SyncError::Fetch {
                url: self.url.clone(),
                message: format!("upstream has no branch '{branch}'"),
            })
    }

    /// Fetch `branch` into `refs/remotes/origin/<branch>` and return its tip.
    fn fetch(&self, repo: &Repository, branch: &str, deadline: Instant) -> Result<Oid, SyncError> {
        let mut remote = repo.find_remote("origin")?;
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");

        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks(deadline));
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .map_err(|err| self.network_error(err, deadline))?;

        let fetched = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
        Ok(fetched.peel_to_commit()?.id())
    }

    fn callbacks(&self, deadline: Instant) -> RemoteCallbacks<'static> {
        let auth = self.auth.clone();
        let mut attempts = 0usize;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, allowed| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("upstream rejected the configured credentials"));
            }
            credentials(&auth, username_from_url, allowed)
        });
        callbacks.transfer_progress(move |_| Instant::now() < deadline);
        callbacks.sideband_progress(move |_| Instant::now() < deadline);
        callbacks
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.fetch_timeout
    }

    fn network_error(&self, err: git2::Error, deadline: Instant) -> SyncError {
        if err.code() == ErrorCode::Timeout || Instant::now() >= deadline {
            return self.timeout_error();
        }
        SyncError::Fetch {
            url: self.url.clone(),
            message: err.message().to_owned(),
        }
    }

    fn timeout_error(&self) -> SyncError {
        SyncError::FetchTimeout {
            url: self.url.clone(),
            timeout_secs: self.fetch_timeout.as_secs(),
        }
    }
}

fn credentials(
    auth: &GitAuth,
    username_from_url: Option<&str>,
    allowed: CredentialType,
) -> Result<Cred, git2::Error> {
    match auth {
        GitAuth::None => {
            if allowed.contains(CredentialType::DEFAULT) {
                Cred::default()
            } else {
                Err(git2::Error::from_str(
                    "upstream requires credentials but the scope has none configured",
                ))
            }
        }
        GitAuth::Token { username, token } => Cred::userpass_plaintext(
            username.as_deref().unwrap_or("x-access-token"),
            token,
        ),
        GitAuth::Ssh {
            username,
            private_key,
            passphrase,
        } => Cred::ssh_key(
            username.as_deref().or(username_from_url).unwrap_or("git"),
            None,
            private_key,
            passphrase.as_deref(),
        ),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<(), SyncError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}
