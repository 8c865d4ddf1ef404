//! Changed paths and notified directories between two commits.
//!
//! The diff is taken over the full repository; restricting it to a scope's
//! selection is the caller's business.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use git2::{Repository, Tree};
use scopehub_core::CommitRange;

use crate::error::GitError;
use crate::find_commit_oid;

/// Number of leading directory segments kept when reducing a changed file to
/// the directory that gets notified.
pub const DIRECTORY_DEPTH: usize = 2;

/// Every path touched between `range.old` (or the empty tree) and `range.new`,
/// sorted and deduplicated. Renames contribute both sides.
pub fn changed_paths(repo: &Repository, range: &CommitRange) -> Result<Vec<PathBuf>, GitError> {
    if range.is_empty() {
        return Ok(vec![]);
    }

    let new_tree = commit_tree(repo, &range.new)?;
    let old_tree = match &range.old {
        Some(old) => Some(commit_tree(repo, old)?),
        None => None,
    };

    let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
    let mut paths = BTreeSet::new();
    for delta in diff.deltas() {
        for file in [delta.old_file(), delta.new_file()] {
            if let Some(path) = file.path() {
                paths.insert(path.to_path_buf());
            }
        }
    }
    Ok(paths.into_iter().collect())
}

/// The directory notified for a changed file: its parent directory cut to the
/// first `depth` segments, or `"."` for files at the repository root.
pub fn notified_directory(path: &Path, depth: usize) -> String {
    let segments: Vec<String> = path
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(seg) => Some(seg.to_string_lossy().into_owned()),
                    _ => None,
                })
                .take(depth)
                .collect()
        })
        .unwrap_or_default();

    if segments.is_empty() {
        ".".to_owned()
    } else {
        segments.join("/")
    }
}

/// Distinct notified directories for a commit range, using [`DIRECTORY_DEPTH`].
pub fn changed_directories(
    repo: &Repository,
    range: &CommitRange,
) -> Result<BTreeSet<String>, GitError> {
    Ok(changed_paths(repo, range)?
        .iter()
        .map(|path| notified_directory(path, DIRECTORY_DEPTH))
        .collect())
}

fn commit_tree<'r>(
    repo: &'r Repository,
    commit: &scopehub_core::CommitId,
) -> Result<Tree<'r>, GitError> {
    let oid = find_commit_oid(repo, commit)?;
    Ok(repo.find_commit(oid)?.tree()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::UpstreamRepo;
    use rstest::rstest;
    use scopehub_core::CommitId;

    #[rstest]
    #[case("policies/x.rego", "policies")]
    #[case("policies/a/x.rego", "policies/a")]
    #[case("policies/a/deep/er/x.rego", "policies/a")]
    #[case("README.md", ".")]
    fn directory_reduction(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(notified_directory(Path::new(path), DIRECTORY_DEPTH), expected);
    }

    #[test]
    fn two_directories_changed() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("policies/a/x.rego", Some("package a"))], "c1");
        let c2 = upstream.commit(
            &[
                ("policies/a/x.rego", Some("package a\nallow = true")),
                ("policies/b/y.rego", Some("package b")),
            ],
            "c2",
        );
        let range = CommitRange::new(Some(c1), c2);
        let dirs = changed_directories(upstream.repo(), &range).expect("dirs");
        assert_eq!(
            dirs.into_iter().collect::<Vec<_>>(),
            vec!["policies/a", "policies/b"]
        );
    }

    #[test]
    fn empty_range_has_no_changes() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("policies/x.rego", Some("package x"))], "c1");
        let range = CommitRange::new(Some(c1.clone()), c1);
        assert!(changed_directories(upstream.repo(), &range)
            .expect("dirs")
            .is_empty());
    }

    #[test]
    fn deletions_are_reported() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(
            &[("policies/x.rego", Some("package x")), ("data/d.json", Some("{}"))],
            "c1",
        );
        let c2 = upstream.commit(&[("data/d.json", None)], "c2");
        let paths = changed_paths(upstream.repo(), &CommitRange::new(Some(c1), c2)).expect("paths");
        assert_eq!(paths, vec![PathBuf::from("data/d.json")]);
    }

    #[test]
    fn range_from_empty_tree_lists_everything() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(
            &[("policies/x.rego", Some("package x")), ("top.json", Some("{}"))],
            "c1",
        );
        let dirs = changed_directories(upstream.repo(), &CommitRange::new(None, c1)).expect("dirs");
        assert_eq!(dirs.into_iter().collect::<Vec<_>>(), vec![".", "policies"]);
    }

    #[test]
    fn unknown_commit_is_reported() {
        let upstream = UpstreamRepo::init();
        let c1 = upstream.commit(&[("a.rego", Some("package a"))], "c1");
        let bogus = CommitId::from("1111111111111111111111111111111111111111");
        let err = changed_paths(upstream.repo(), &CommitRange::new(Some(bogus), c1)).unwrap_err();
        assert!(matches!(err, GitError::CommitNotFound { .. }));
    }
}
