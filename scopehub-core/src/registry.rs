//! Durable per-scope registry.
//!
//! # Storage port
//!
//! The rest of the system only sees [`ScopeRepository`]: get/set scope
//! metadata, get/set tracked head, plus an insertion-ordered listing.
//!
//! # YAML layout
//!
//! ```text
//! <base_dir>/
//!   registry/               (mode 0700, created on first write)
//!     <scope_id>.yaml       (one ScopeRecord per scope, mode 0600)
//! ```
//!
//! Writes use `.yaml.tmp` + `rename` in the same directory, so a crash never
//! leaves a half-written record behind the real file name.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::Utc;

use crate::error::{io_err, RegistryError};
use crate::types::{CommitId, Scope, ScopeId, ScopeRecord};

/// Narrow persistence interface for scope metadata and tracked heads.
pub trait ScopeRepository: Send + Sync + fmt::Debug {
    fn get_scope(&self, scope_id: &ScopeId) -> Result<Option<Scope>, RegistryError>;

    /// Insert a new scope or replace the metadata of an existing one. The
    /// tracked head and registration order of an existing scope are kept.
    fn put_scope(&self, scope: &Scope) -> Result<(), RegistryError>;

    fn get_head(&self, scope_id: &ScopeId) -> Result<Option<CommitId>, RegistryError>;

    /// Fails with [`RegistryError::ScopeNotRegistered`] for unknown scopes.
    fn set_head(&self, scope_id: &ScopeId, head: &CommitId) -> Result<(), RegistryError>;

    /// All scopes in registration order.
    fn list_scopes(&self) -> Result<Vec<Scope>, RegistryError>;
}

// ---------------------------------------------------------------------------
// 1. YAML file repository
// ---------------------------------------------------------------------------

/// File-backed repository, one YAML record per scope.
#[derive(Debug)]
pub struct YamlScopeRepository {
    root: PathBuf,
    // Serializes read-modify-write cycles and sequence allocation.
    write_lock: Mutex<()>,
}

impl YamlScopeRepository {
    /// Repository rooted at `<base_dir>/registry`.
    pub fn new(base_dir: &Path) -> Self {
        Self::at(base_dir.join("registry"))
    }

    /// Repository rooted at an explicit directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<scope_id>.yaml`. Pure, no I/O.
    pub fn record_path(&self, scope_id: &ScopeId) -> PathBuf {
        self.root.join(format!("{}.yaml", scope_id.0))
    }

    /// Load a single record, `None` if absent,
    /// `RegistryError::Parse` (with path + line context) if malformed YAML.
    pub fn load_record(&self, scope_id: &ScopeId) -> Result<Option<ScopeRecord>, RegistryError> {
        let path = self.record_path(scope_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|e| RegistryError::Parse { path, source: e })
    }

    /// Every record under the root, sorted by registration order.
    pub fn load_all(&self) -> Result<Vec<ScopeRecord>, RegistryError> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut records = Vec::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_err(&self.root, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            let record: ScopeRecord = serde_yaml::from_str(&contents)
                .map_err(|e| RegistryError::Parse { path, source: e })?;
            records.push(record);
        }
        records.sort_by(|a, b| {
            a.seq
                .cmp(&b.seq)
                .then_with(|| a.scope.scope_id.cmp(&b.scope.scope_id))
        });
        Ok(records)
    }

    /// Atomically save a record.
    ///
    /// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
    pub fn save_record(&self, record: &ScopeRecord) -> Result<(), RegistryError> {
        self.ensure_root()?;
        let path = self.record_path(&record.scope.scope_id);
        let tmp_path = path.with_file_name(format!("{}.yaml.tmp", record.scope.scope_id.0));

        let yaml = serde_yaml::to_string(record)?;
        std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
        set_file_permissions(&tmp_path)?;
        if let Err(err) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err(&path, err));
        }
        Ok(())
    }

    fn ensure_root(&self) -> Result<(), RegistryError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
            set_dir_permissions(&self.root)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScopeRepository for YamlScopeRepository {
    fn get_scope(&self, scope_id: &ScopeId) -> Result<Option<Scope>, RegistryError> {
        Ok(self.load_record(scope_id)?.map(|record| record.scope))
    }

    fn put_scope(&self, scope: &Scope) -> Result<(), RegistryError> {
        scope.scope_id.validate()?;
        let _guard = self.lock();
        let now = Utc::now();
        let record = match self.load_record(&scope.scope_id)? {
            Some(existing) => ScopeRecord {
                scope: scope.clone(),
                updated_at: now,
                ..existing
            },
            None => {
                let seq = self
                    .load_all()?
                    .iter()
                    .map(|r| r.seq + 1)
                    .max()
                    .unwrap_or(0);
                ScopeRecord {
                    seq,
                    scope: scope.clone(),
                    head: None,
                    created_at: now,
                    updated_at: now,
                }
            }
        };
        self.save_record(&record)
    }

    fn get_head(&self, scope_id: &ScopeId) -> Result<Option<CommitId>, RegistryError> {
        Ok(self.load_record(scope_id)?.and_then(|record| record.head))
    }

    fn set_head(&self, scope_id: &ScopeId, head: &CommitId) -> Result<(), RegistryError> {
        let _guard = self.lock();
        let Some(mut record) = self.load_record(scope_id)? else {
            return Err(RegistryError::ScopeNotRegistered {
                scope_id: scope_id.0.clone(),
            });
        };
        record.head = Some(head.clone());
        record.updated_at = Utc::now();
        self.save_record(&record)
    }

    fn list_scopes(&self) -> Result<Vec<Scope>, RegistryError> {
        Ok(self.load_all()?.into_iter().map(|r| r.scope).collect())
    }
}

// ---------------------------------------------------------------------------
// 2. In-memory repository
// ---------------------------------------------------------------------------

/// Volatile repository for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryScopeRepository {
    records: RwLock<Vec<ScopeRecord>>,
}

impl MemoryScopeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScopeRepository for MemoryScopeRepository {
    fn get_scope(&self, scope_id: &ScopeId) -> Result<Option<Scope>, RegistryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .find(|r| &r.scope.scope_id == scope_id)
            .map(|r| r.scope.clone()))
    }

    fn put_scope(&self, scope: &Scope) -> Result<(), RegistryError> {
        scope.scope_id.validate()?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.scope.scope_id == scope.scope_id)
        {
            existing.scope = scope.clone();
            existing.updated_at = now;
            return Ok(());
        }
        let seq = records.len() as u64;
        records.push(ScopeRecord {
            seq,
            scope: scope.clone(),
            head: None,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    fn get_head(&self, scope_id: &ScopeId) -> Result<Option<CommitId>, RegistryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .find(|r| &r.scope.scope_id == scope_id)
            .and_then(|r| r.head.clone()))
    }

    fn set_head(&self, scope_id: &ScopeId, head: &CommitId) -> Result<(), RegistryError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let Some(record) = records.iter_mut().find(|r| &r.scope.scope_id == scope_id) else {
            return Err(RegistryError::ScopeNotRegistered {
                scope_id: scope_id.0.clone(),
            });
        };
        record.head = Some(head.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    fn list_scopes(&self) -> Result<Vec<Scope>, RegistryError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().map(|r| r.scope.clone()).collect())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
