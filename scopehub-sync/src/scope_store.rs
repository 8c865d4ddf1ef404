//! The scope store: registry of scopes and owner of their local clones.
//!
//! Per-scope reader/writer locks serialize everything that moves a clone
//! (add, pull, poll) while letting bundle reads run side by side. Different
//! scopes never contend.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use git2::{Oid, Repository};

use scopehub_core::{CommitId, CommitRange, RegistryError, Scope, ScopeId, ScopeRepository};
use scopehub_git::{BundleMaker, GitError, PolicyBundle, Selection};

use crate::error::SyncError;
use crate::puller::{apply_transport_timeouts, PullerOptions, ScopePuller, SourceKind};
use crate::webhook::WebhookTarget;

pub struct ScopeStore {
    repository: Arc<dyn ScopeRepository>,
    base_dir: PathBuf,
    options: PullerOptions,
    locks: Mutex<HashMap<ScopeId, Arc<RwLock<()>>>>,
}

impl ScopeStore {
    pub fn new(
        repository: Arc<dyn ScopeRepository>,
        base_dir: impl Into<PathBuf>,
        options: PullerOptions,
    ) -> Self {
        apply_transport_timeouts(options.fetch_timeout);
        Self {
            repository,
            base_dir: base_dir.into(),
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn options(&self) -> &PullerOptions {
        &self.options
    }

    pub fn repository(&self) -> &dyn ScopeRepository {
        self.repository.as_ref()
    }

    /// Clone directory for a scope: `<base_dir>/scopes/<scope_id>`.
    pub fn clone_dir(&self, scope_id: &ScopeId) -> PathBuf {
        self.base_dir.join("scopes").join(scope_id.as_str())
    }

    // -----------------------------------------------------------------------
    // 1. Registration
    // -----------------------------------------------------------------------

    /// Register `scope`, cloning its upstream, and return the tracked head.
    ///
    /// Re-adding a registered scope re-validates it and replaces its policy
    /// and data without re-cloning; the tracked head is kept. The upstream
    /// itself (type, URL, branch) cannot change this way.
    pub fn add_scope(&self, scope: Scope) -> Result<CommitId, SyncError> {
        scope.scope_id.validate().map_err(|err| match err {
            RegistryError::InvalidScopeId { scope_id, reason } => {
                SyncError::InvalidScopeId { scope_id, reason }
            }
            other => SyncError::Registry(other),
        })?;
        scope.policy.source_type.parse::<SourceKind>()?;

        let lock = self.lock_for(&scope.scope_id);
        let _guard = lock.write().unwrap_or_else(PoisonError::into_inner);

        let existing = self.repository.get_scope(&scope.scope_id)?;
        if let Some(existing) = &existing {
            if !existing.same_source(&scope) {
                return Err(SyncError::SourceChanged {
                    scope_id: scope.scope_id.0.clone(),
                });
            }
        }

        let puller = ScopePuller::for_scope(&scope, self.clone_dir(&scope.scope_id), &self.options)?;
        let checked_out = puller.materialize()?;

        self.repository.put_scope(&scope)?;
        let head = match self.repository.get_head(&scope.scope_id)? {
            Some(head) => head,
            None => {
                self.repository.set_head(&scope.scope_id, &checked_out)?;
                checked_out
            }
        };

        tracing::info!(
            scope_id = %scope.scope_id,
            source_type = %puller.kind(),
            head = %head,
            readded = existing.is_some(),
            "registered scope",
        );
        Ok(head)
    }

    pub fn get_scope(&self, scope_id: &ScopeId) -> Result<Scope, SyncError> {
        self.repository
            .get_scope(scope_id)?
            .ok_or_else(|| SyncError::ScopeNotFound {
                scope_id: scope_id.0.clone(),
            })
    }

    /// Every registered scope, in registration order.
    pub fn all_scopes(&self) -> Result<Vec<Scope>, SyncError> {
        Ok(self.repository.list_scopes()?)
    }

    pub fn head(&self, scope_id: &ScopeId) -> Result<Option<CommitId>, SyncError> {
        Ok(self.repository.get_head(scope_id)?)
    }

    // -----------------------------------------------------------------------
    // 2. Pulls
    // -----------------------------------------------------------------------

    /// Fast-forward the scope's clone to upstream and record the new head.
    pub fn pull_scope(&self, scope_id: &ScopeId) -> Result<CommitRange, SyncError> {
        let scope = self.get_scope(scope_id)?;
        let lock = self.lock_for(scope_id);
        let _guard = lock.write().unwrap_or_else(PoisonError::into_inner);

        self.puller(&scope)?.pull(self.repository.as_ref())
    }

    /// check → diff → pull under one write lock. `None` when upstream has
    /// nothing new.
    pub fn poll_scope(&self, scope_id: &ScopeId) -> Result<Option<CommitRange>, SyncError> {
        let scope = self.get_scope(scope_id)?;
        let lock = self.lock_for(scope_id);
        let _guard = lock.write().unwrap_or_else(PoisonError::into_inner);

        let puller = self.puller(&scope)?;
        let registry = self.repository.as_ref();
        if !puller.check(registry)? {
            return Ok(None);
        }
        let fetched = match puller.diff(registry) {
            Ok(range) => range,
            Err(SyncError::NothingToPull { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let range = puller.pull_range(registry, &fetched)?;
        Ok((!range.is_empty()).then_some(range))
    }

    // -----------------------------------------------------------------------
    // 3. Reads
    // -----------------------------------------------------------------------

    /// Bundle of the scope's selection at its tracked head.
    pub fn make_bundle(
        &self,
        scope_id: &ScopeId,
        base_hash: Option<&str>,
    ) -> Result<PolicyBundle, SyncError> {
        let scope = self.get_scope(scope_id)?;
        let lock = self.lock_for(scope_id);
        let _guard = lock.read().unwrap_or_else(PoisonError::into_inner);

        let repo = self.open_clone(scope_id)?;
        let maker = BundleMaker::new(&repo, Selection::from_policy(&scope.policy));
        let bundle = match self.repository.get_head(scope_id)? {
            Some(head) => {
                let target = Oid::from_str(head.as_str())?;
                maker.make_at(target, base_hash)
            }
            None => maker.make(base_hash),
        };

        bundle.map_err(|err| match err {
            GitError::BaseNotAncestor { base, target } => {
                SyncError::DiffBaseUnresolvable { base, target }
            }
            other => SyncError::Git(other),
        })
    }

    /// Directories to notify for `range`, read from the scope's clone.
    pub fn changed_directories(
        &self,
        scope_id: &ScopeId,
        range: &CommitRange,
    ) -> Result<BTreeSet<String>, SyncError> {
        let lock = self.lock_for(scope_id);
        let _guard = lock.read().unwrap_or_else(PoisonError::into_inner);

        let repo = self.open_clone(scope_id)?;
        Ok(scopehub_git::changed_directories(&repo, range)?)
    }

    /// Every scope with the URL and branch its clone follows, for webhook
    /// matching. Scopes whose branch cannot be resolved get `branch: None`.
    pub fn webhook_targets(&self) -> Result<Vec<WebhookTarget>, SyncError> {
        let scopes = self.all_scopes()?;
        let mut targets = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let branch = match &scope.policy.branch {
                Some(branch) => Some(branch.clone()),
                None => self.resolved_branch(&scope),
            };
            targets.push(WebhookTarget {
                scope_id: scope.scope_id,
                url: scope.policy.url,
                branch,
            });
        }
        Ok(targets)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn puller(&self, scope: &Scope) -> Result<ScopePuller, SyncError> {
        ScopePuller::for_scope(scope, self.clone_dir(&scope.scope_id), &self.options)
    }

    fn resolved_branch(&self, scope: &Scope) -> Option<String> {
        let lock = self.lock_for(&scope.scope_id);
        let _guard = lock.read().unwrap_or_else(PoisonError::into_inner);

        match self.puller(scope).and_then(|puller| puller.tracked_branch()) {
            Ok(branch) => Some(branch),
            Err(err) => {
                tracing::debug!(scope_id = %scope.scope_id, error = %err, "tracked branch unresolved");
                None
            }
        }
    }

    fn open_clone(&self, scope_id: &ScopeId) -> Result<Repository, SyncError> {
        Ok(Repository::open(self.clone_dir(scope_id))?)
    }

    fn lock_for(&self, scope_id: &ScopeId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(scope_id.clone()).or_default().clone()
    }
}

impl std::fmt::Debug for ScopeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeStore")
            .field("repository", &self.repository)
            .field("base_dir", &self.base_dir)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
