//! Throwaway upstream repositories for tests.
//!
//! Only compiled for this crate's tests or with the `test-fixtures` feature.
//! Panics on failure; never use outside tests.

use std::path::Path;

use git2::{Repository, RepositoryInitOptions, ResetType, Signature};
use scopehub_core::CommitId;
use tempfile::TempDir;

/// A non-bare repository in a temp dir whose `main` branch tests commit to.
pub struct UpstreamRepo {
    dir: TempDir,
    repo: Repository,
}

impl UpstreamRepo {
    pub fn init() -> Self {
        let dir = TempDir::new().expect("upstream tempdir");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir.path(), &opts).expect("init upstream");
        Self { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Clone URL: the plain filesystem path.
    pub fn url(&self) -> String {
        self.dir.path().display().to_string()
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Apply file writes (`Some(content)`) and deletions (`None`) on top of
    /// `HEAD` and commit them to the current branch.
    pub fn commit(&self, changes: &[(&str, Option<&str>)], message: &str) -> CommitId {
        let mut index = self.repo.index().expect("index");
        for (rel, content) in changes {
            let full = self.dir.path().join(rel);
            match content {
                Some(content) => {
                    if let Some(parent) = full.parent() {
                        std::fs::create_dir_all(parent).expect("mkdir");
                    }
                    std::fs::write(&full, content).expect("write file");
                    index.add_path(Path::new(rel)).expect("stage");
                }
                None => {
                    std::fs::remove_file(&full).expect("remove file");
                    index.remove_path(Path::new(rel)).expect("unstage");
                }
            }
        }
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = self.repo.find_tree(tree_id).expect("find tree");

        let sig = Signature::now("scopehub-tests", "tests@scopehub.invalid").expect("signature");
        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("commit");
        CommitId(oid.to_string())
    }

    /// Move `main` (and the work tree) back to `commit`, rewriting history.
    pub fn reset_hard(&self, commit: &CommitId) {
        let oid = git2::Oid::from_str(commit.as_str()).expect("oid");
        let object = self.repo.find_object(oid, None).expect("object");
        self.repo
            .reset(&object, ResetType::Hard, None)
            .expect("reset");
    }
}
