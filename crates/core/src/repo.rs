//! Repository discovery and the CLI's auto-ref rules (§6.1): deciding which
//! two tree snapshots to compare when the caller does not fully specify
//! `--from`/`--to`. Shared between the CLI root command and the LSP's
//! per-repo analysis pass, since both need "find the enclosing repo, pick a
//! sensible pair of trees" behavior.

use std::path::{Path, PathBuf};

use git2::Repository;

use crate::error::{Error, Result};
use crate::tree::{CommitTree, Tree, WorkingTree};

/// Sentinel accepted in place of a ref on the CLI (`--to WORKTREE`) and used
/// internally to mean "the filesystem as it stands right now".
pub const WORKTREE_SENTINEL: &str = "WORKTREE";

/// Which side of a comparison a `Tree` should be built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSpec {
    Rev(String),
    Worktree,
}

impl TreeSpec {
    pub fn parse(raw: &str) -> Self {
        if raw == WORKTREE_SENTINEL {
            TreeSpec::Worktree
        } else {
            TreeSpec::Rev(raw.to_string())
        }
    }
}

/// Walks upward from `start` to find the enclosing git repository, the way
/// `git2::Repository::discover` does, surfaced as our own error type.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(start)
        .map_err(|e| Error::GitResolution(format!("no repository found above {}: {e}", start.display())))?;
    let root = repo.workdir().ok_or_else(|| {
        Error::GitResolution(format!("{} is a bare repository", start.display()))
    })?;
    Ok(root.to_path_buf())
}

/// First of `main`, `master`, or the `origin/HEAD` remote symref's target
/// branch name.
pub fn default_branch(repo: &Repository) -> Result<String> {
    for candidate in ["main", "master"] {
        if repo.find_branch(candidate, git2::BranchType::Local).is_ok() {
            return Ok(candidate.to_string());
        }
    }
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = reference.symbolic_target() {
            if let Some(name) = target.rsplit('/').next() {
                return Ok(name.to_string());
            }
        }
    }
    Err(Error::GitResolution("could not determine a default branch (no main, master, or origin/HEAD)".into()))
}

fn is_worktree_dirty(repo: &Repository) -> Result<bool> {
    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

fn current_branch_name(repo: &Repository) -> Option<String> {
    let head = repo.head().ok()?;
    if head.is_branch() {
        head.shorthand().map(str::to_string)
    } else {
        None
    }
}

/// Implements the CLI's auto-ref rules when `from`/`to` are not (fully)
/// given:
/// - only `to` given → `from := to^`;
/// - neither given, worktree dirty → `HEAD → WORKTREE`;
/// - neither given, on default branch → `defaultBranch^ → defaultBranch`;
/// - neither given, otherwise → `defaultBranch → HEAD`;
/// - only `from` given → `to := WORKTREE` (symmetric default; not specified
///   explicitly in the original rules, see DESIGN.md).
pub fn resolve_auto_refs(
    repo_path: &Path,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<(TreeSpec, TreeSpec)> {
    match (from, to) {
        (Some(f), Some(t)) => Ok((TreeSpec::parse(f), TreeSpec::parse(t))),
        (None, Some(t)) => Ok((TreeSpec::Rev(format!("{t}^")), TreeSpec::parse(t))),
        (Some(f), None) => Ok((TreeSpec::parse(f), TreeSpec::Worktree)),
        (None, None) => {
            let repo = Repository::open(repo_path)?;
            if is_worktree_dirty(&repo)? {
                return Ok((TreeSpec::Rev("HEAD".into()), TreeSpec::Worktree));
            }
            let default_branch = default_branch(&repo)?;
            if current_branch_name(&repo).as_deref() == Some(default_branch.as_str()) {
                Ok((TreeSpec::Rev(format!("{default_branch}^")), TreeSpec::Rev(default_branch)))
            } else {
                Ok((TreeSpec::Rev(default_branch), TreeSpec::Rev("HEAD".into())))
            }
        }
    }
}

/// Builds a `Tree` for `spec` against the repository at `repo_path`. Commit
/// revs take the preloaded fast path (the diff driver benefits from both
/// sides being `CommitTree`s sharing one repository); `Worktree` reads the
/// filesystem directly.
pub fn build_tree(repo_path: &Path, spec: &TreeSpec) -> Result<Box<dyn Tree>> {
    match spec {
        TreeSpec::Rev(rev) => {
            let tree = CommitTree::open(repo_path, rev)?.preloaded()?;
            Ok(Box::new(tree))
        }
        TreeSpec::Worktree => Ok(Box::new(WorkingTree::new(repo_path))),
    }
}
