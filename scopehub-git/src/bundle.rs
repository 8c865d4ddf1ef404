//! Policy bundle construction.
//!
//! A bundle is either a full snapshot of a scope's selection at a commit, or,
//! when the caller names a base commit that is an ancestor of the target, a
//! diff carrying only the added/modified/deleted files inside the selection.
//!
//! ## Base resolution
//!
//! 1. No base, or not a full 40-hex id → full bundle.
//! 2. Well-formed id missing from the object store → full bundle.
//! 3. Known commit that is neither the target nor one of its ancestors →
//!    [`GitError::BaseNotAncestor`]. A full bundle is never labelled as a diff.
//! 4. Otherwise → diff bundle with `old_hash` set to the base.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use git2::{Delta, ErrorCode, ObjectType, Oid, Repository, Tree, TreeWalkMode, TreeWalkResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use scopehub_core::ScopePolicy;

use crate::error::GitError;

// ---------------------------------------------------------------------------
// Bundle types
// ---------------------------------------------------------------------------

/// One file in a bundle. Deleted entries carry no content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Transferable artifact for a scope's selected files at one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBundle {
    /// Target commit id; hand it back as `base_hash` to get a diff next time.
    pub hash: String,
    /// SHA-256 over the target commit and the selection parameters.
    pub selection_hash: String,
    /// Base commit for diff bundles, `None` for full bundles.
    #[serde(default)]
    pub old_hash: Option<String>,
    /// Raw manifest content at the target commit, if the file exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    pub entries: Vec<BundleEntry>,
}

impl PolicyBundle {
    pub fn is_diff(&self) -> bool {
        self.old_hash.is_some()
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Normalized directory/extension/manifest selection of a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    directories: Vec<PathBuf>,
    extensions: Vec<String>,
    manifest: PathBuf,
}

impl Selection {
    /// Directories `"."`/`""` select the whole tree; an empty extension list
    /// selects every file. Extensions match with or without a leading dot.
    pub fn new(directories: &[String], extensions: &[String], manifest: &str) -> Self {
        let mut directories: Vec<PathBuf> = directories.iter().map(|d| normalize(d)).collect();
        directories.sort();
        directories.dedup();

        let mut extensions: Vec<String> = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();

        Self {
            directories,
            extensions,
            manifest: normalize(manifest),
        }
    }

    pub fn from_policy(policy: &ScopePolicy) -> Self {
        Self::new(&policy.directories, &policy.extensions, &policy.manifest)
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    /// True when `path` is inside a selected directory and has a selected
    /// extension. The manifest file itself never matches.
    pub fn matches(&self, path: &Path) -> bool {
        if path == self.manifest {
            return false;
        }

        let in_directory = self.directories.is_empty()
            || self
                .directories
                .iter()
                .any(|dir| dir.as_os_str().is_empty() || path.starts_with(dir));
        if !in_directory {
            return false;
        }

        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn digest(&self, target: Oid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(target.to_string().as_bytes());
        for dir in &self.directories {
            hasher.update(b"\0d:");
            hasher.update(dir.to_string_lossy().as_bytes());
        }
        for ext in &self.extensions {
            hasher.update(b"\0e:");
            hasher.update(ext.as_bytes());
        }
        hasher.update(b"\0m:");
        hasher.update(self.manifest.to_string_lossy().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn normalize(raw: &str) -> PathBuf {
    Path::new(raw.trim())
        .components()
        .filter_map(|c| match c {
            Component::Normal(seg) => Some(seg),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Bundle maker
// ---------------------------------------------------------------------------

/// Builds bundles from one repository for one selection.
pub struct BundleMaker<'r> {
    repo: &'r Repository,
    selection: Selection,
}

impl<'r> BundleMaker<'r> {
    pub fn new(repo: &'r Repository, selection: Selection) -> Self {
        Self { repo, selection }
    }

    /// Bundle at the checked-out `HEAD`.
    pub fn make(&self, base_hash: Option<&str>) -> Result<PolicyBundle, GitError> {
        let target = self.repo.head()?.peel_to_commit()?.id();
        self.make_at(target, base_hash)
    }

    /// Bundle at an explicit target commit.
    pub fn make_at(&self, target: Oid, base_hash: Option<&str>) -> Result<PolicyBundle, GitError> {
        let target_tree = self.repo.find_commit(target)?.tree()?;
        let manifest = self.read_text(&target_tree, &self.selection.manifest)?;
        let order = manifest
            .as_deref()
            .map(|content| manifest_order(&self.selection.manifest, content))
            .unwrap_or_default();

        let base = match base_hash {
            Some(base_hash) => self.resolve_base(base_hash, target)?,
            None => None,
        };

        let mut entries = match base {
            Some(base) => self.diff_entries(base, &target_tree)?,
            None => self.full_entries(&target_tree)?,
        };
        entries.sort_by(|a, b| {
            let rank = |e: &BundleEntry| order.get(&e.path).copied().unwrap_or(usize::MAX);
            rank(a).cmp(&rank(b)).then_with(|| a.path.cmp(&b.path))
        });

        tracing::debug!(
            commit = %target,
            base = ?base,
            entries = entries.len(),
            "built policy bundle",
        );

        Ok(PolicyBundle {
            hash: target.to_string(),
            selection_hash: self.selection.digest(target),
            old_hash: base.map(|oid| oid.to_string()),
            manifest,
            entries,
        })
    }

    fn resolve_base(&self, base_hash: &str, target: Oid) -> Result<Option<Oid>, GitError> {
        let is_full_hex =
            base_hash.len() == 40 && base_hash.chars().all(|c| c.is_ascii_hexdigit());
        if !is_full_hex {
            tracing::debug!(base_hash, "ignoring malformed base hash, serving full bundle");
            return Ok(None);
        }

        let base = Oid::from_str(base_hash)?;
        match self.repo.find_commit(base) {
            Ok(_) => {}
            Err(err) if err.code() == ErrorCode::NotFound => {
                tracing::debug!(base_hash, "unknown base hash, serving full bundle");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }

        if base != target && !self.repo.graph_descendant_of(target, base)? {
            return Err(GitError::BaseNotAncestor {
                base: base.to_string(),
                target: target.to_string(),
            });
        }
        Ok(Some(base))
    }

    fn full_entries(&self, tree: &Tree<'_>) -> Result<Vec<BundleEntry>, GitError> {
        let mut blobs = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    let path = PathBuf::from(format!("{root}{name}"));
                    if self.selection.matches(&path) {
                        blobs.push((path, entry.id()));
                    }
                }
            }
            TreeWalkResult::Ok
        })?;

        blobs
            .into_iter()
            .map(|(path, oid)| {
                Ok(BundleEntry {
                    path: path_string(&path),
                    content: Some(self.blob_text(oid)?),
                    is_deleted: false,
                })
            })
            .collect()
    }

    fn diff_entries(&self, base: Oid, target_tree: &Tree<'_>) -> Result<Vec<BundleEntry>, GitError> {
        let base_tree = self.repo.find_commit(base)?.tree()?;
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(target_tree), None)?;

        let mut entries = Vec::new();
        for delta in diff.deltas() {
            let old_path = delta.old_file().path().map(Path::to_path_buf);
            let new_path = delta.new_file().path().map(Path::to_path_buf);
            let deleted_side = match delta.status() {
                Delta::Deleted => old_path,
                Delta::Renamed => old_path.filter(|old| Some(old) != new_path.as_ref()),
                _ => None,
            };
            let written_side = match delta.status() {
                Delta::Deleted => None,
                Delta::Added
                | Delta::Modified
                | Delta::Renamed
                | Delta::Copied
                | Delta::Typechange => new_path,
                _ => None,
            };

            if let Some(path) = deleted_side.filter(|p| self.selection.matches(p)) {
                entries.push(BundleEntry {
                    path: path_string(&path),
                    content: None,
                    is_deleted: true,
                });
            }
            if let Some(path) = written_side.filter(|p| self.selection.matches(p)) {
                let content = self.read_text(target_tree, &path)?.unwrap_or_default();
                entries.push(BundleEntry {
                    path: path_string(&path),
                    content: Some(content),
                    is_deleted: false,
                });
            }
        }
        Ok(entries)
    }

    fn read_text(&self, tree: &Tree<'_>, path: &Path) -> Result<Option<String>, GitError> {
        if path.as_os_str().is_empty() {
            return Ok(None);
        }
        let entry = match tree.get_path(path) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        Ok(Some(self.blob_text(entry.id())?))
    }

    fn blob_text(&self, oid: Oid) -> Result<String, GitError> {
        let blob = self.repo.find_blob(oid)?;
        Ok(String::from_utf8_lossy(blob.content()).into_owned())
    }
}

/// Map each path listed in the manifest to its position. Paths are relative
/// to the manifest's directory; blank lines and `#` comments are skipped.
fn manifest_order(manifest: &Path, content: &str) -> HashMap<String, usize> {
    let base = manifest.parent().unwrap_or(Path::new(""));
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(rank, line)| (path_string(&normalize(&base.join(line).to_string_lossy())), rank))
        .collect()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::UpstreamRepo;
    use rstest::rstest;
    use scopehub_core::CommitId;

    fn oid(id: &CommitId) -> Oid {
        Oid::from_str(id.as_str()).expect("oid")
    }

    fn policies_selection() -> Selection {
        Selection::new(
            &["policies".to_owned()],
            &[".rego".to_owned(), "json".to_owned()],
            ".manifest",
        )
    }

    fn paths(bundle: &PolicyBundle) -> Vec<&str> {
        bundle.entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[rstest]
    #[case("policies/x.rego", true)]
    #[case("policies/nested/data.json", true)]
    #[case("policies/README.md", false)]
    #[case("other/x.rego", false)]
    #[case("policiesx/x.rego", false)]
    #[case(".manifest", false)]
    fn selection_matching(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(policies_selection().matches(Path::new(path)), expected);
    }

    #[test]
    fn root_selection_matches_everything_with_extension() {
        let selection = Selection::new(&[".".to_owned()], &[".rego".to_owned()], ".manifest");
        assert!(selection.matches(Path::new("a/b/c.rego")));
        assert!(selection.matches(Path::new("top.rego")));
        assert!(!selection.matches(Path::new("top.txt")));
    }

    #[test]
    fn full_bundle_contains_selection_only() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(
            &[
                ("policies/x.rego", Some("package x")),
                ("policies/data.json", Some("{\"a\":1}")),
                ("policies/notes.md", Some("# notes")),
                ("elsewhere/y.rego", Some("package y")),
            ],
            "c1",
        );

        let maker = BundleMaker::new(upstream.repo(), policies_selection());
        let bundle = maker.make(None).expect("bundle");
        assert_eq!(bundle.hash, c1.0);
        assert_eq!(bundle.old_hash, None);
        assert_eq!(paths(&bundle), vec!["policies/data.json", "policies/x.rego"]);
        assert_eq!(bundle.entries[1].content.as_deref(), Some("package x"));
        assert!(!bundle.is_diff());
    }

    #[test]
    fn diff_bundle_contains_only_changes() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(
            &[
                ("policies/x.rego", Some("package x")),
                ("policies/gone.rego", Some("package gone")),
                ("policies/same.rego", Some("package same")),
            ],
            "c1",
        );
        let c2 = upstream.commit(
            &[
                ("policies/x.rego", Some("package x\nallow = true")),
                ("policies/gone.rego", None),
                ("policies/new.rego", Some("package new")),
                ("elsewhere/ignored.rego", Some("package ignored")),
            ],
            "c2",
        );

        let maker = BundleMaker::new(upstream.repo(), policies_selection());
        let bundle = maker.make_at(oid(&c2), Some(c1.as_str())).expect("bundle");
        assert_eq!(bundle.old_hash.as_deref(), Some(c1.as_str()));
        assert_eq!(
            paths(&bundle),
            vec!["policies/gone.rego", "policies/new.rego", "policies/x.rego"]
        );
        let gone = &bundle.entries[0];
        assert!(gone.is_deleted);
        assert_eq!(gone.content, None);
        assert_eq!(
            bundle.entries[2].content.as_deref(),
            Some("package x\nallow = true")
        );
    }

    #[test]
    fn diff_against_itself_is_empty() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("policies/x.rego", Some("package x"))], "c1");
        let maker = BundleMaker::new(upstream.repo(), policies_selection());
        let bundle = maker.make(Some(c1.as_str())).expect("bundle");
        assert_eq!(bundle.old_hash.as_deref(), Some(c1.as_str()));
        assert!(bundle.entries.is_empty());
    }

    #[rstest]
    #[case::malformed("not-a-commit")]
    #[case::abbreviated("abc123")]
    #[case::unknown("0123456789012345678901234567890123456789")]
    fn unresolvable_base_yields_full_bundle(#[case] base: &str) {
        let upstream = UpstreamRepo::init();
        upstream.commit(&[("policies/x.rego", Some("package x"))], "c1");
        let maker = BundleMaker::new(upstream.repo(), policies_selection());
        let bundle = maker.make(Some(base)).expect("bundle");
        assert_eq!(bundle.old_hash, None);
        assert_eq!(paths(&bundle), vec!["policies/x.rego"]);
    }

    #[test]
    fn non_ancestor_base_fails() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("policies/x.rego", Some("v1"))], "c1");
        let c2 = upstream.commit(&[("policies/x.rego", Some("v2"))], "c2");
        upstream.reset_hard(&c1);
        let c3 = upstream.commit(&[("policies/x.rego", Some("v3"))], "c3");

        let maker = BundleMaker::new(upstream.repo(), policies_selection());
        let err = maker.make_at(oid(&c3), Some(c2.as_str())).unwrap_err();
        assert!(matches!(err, GitError::BaseNotAncestor { .. }), "got: {err}");
    }

    #[test]
    fn identical_requests_are_byte_identical() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("policies/a.rego", Some("a"))], "c1");
        upstream.commit(
            &[("policies/b.rego", Some("b")), ("policies/a.rego", Some("a2"))],
            "c2",
        );

        let maker = BundleMaker::new(upstream.repo(), policies_selection());
        for base in [None, Some(c1.as_str())] {
            let first = serde_json::to_vec(&maker.make(base).expect("first")).expect("encode");
            let second = serde_json::to_vec(&maker.make(base).expect("second")).expect("encode");
            assert_eq!(first, second);
        }
    }

    #[test]
    fn selection_hash_depends_on_selection() {
        let upstream = UpstreamRepo::init();
        upstream.commit(&[("policies/a.rego", Some("a"))], "c1");
        let narrow = BundleMaker::new(upstream.repo(), policies_selection())
            .make(None)
            .expect("narrow");
        let wide = BundleMaker::new(
            upstream.repo(),
            Selection::new(&[".".to_owned()], &[], ".manifest"),
        )
        .make(None)
        .expect("wide");
        assert_eq!(narrow.hash, wide.hash);
        assert_ne!(narrow.selection_hash, wide.selection_hash);
    }

    #[test]
    fn manifest_orders_entries_and_is_carried() {
        let upstream = UpstreamRepo::init();
        upstream.commit(
            &[
                ("policies/a.rego", Some("package a")),
                ("policies/b.rego", Some("package b")),
                ("policies/c.rego", Some("package c")),
                ("policies/.manifest", Some("# load order\nc.rego\n\na.rego\n")),
            ],
            "c1",
        );

        let selection = Selection::new(
            &["policies".to_owned()],
            &[".rego".to_owned()],
            "policies/.manifest",
        );
        let bundle = BundleMaker::new(upstream.repo(), selection)
            .make(None)
            .expect("bundle");
        assert_eq!(
            paths(&bundle),
            vec!["policies/c.rego", "policies/a.rego", "policies/b.rego"]
        );
        assert!(bundle.manifest.as_deref().unwrap_or_default().contains("c.rego"));
    }
}
