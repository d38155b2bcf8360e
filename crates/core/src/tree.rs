//! Uniform view over commit trees and working trees: list files, read
//! contents, and (for commit trees) back the diff driver's fast path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::{ObjectType, Oid, Repository};

use crate::error::{Error, Result};

/// Capability-based tree abstraction. `CommitTree`, `WorkingTree`, and
/// `WorkingTreeWithOverlay` all implement this; the diff driver only needs
/// `list_files`/`open_reader`, falling back to a content-hash comparison
/// unless both sides happen to be commit trees (see `diff::diff_trees`).
pub trait Tree: Send + Sync {
    /// Relative, forward-slashed paths, in no particular order.
    fn list_files(&self) -> Result<Vec<String>>;

    fn open_reader(&self, path: &str) -> Result<Vec<u8>>;

    /// `Some(commit_oid)` iff this is a `CommitTree` — used by the diff
    /// driver to take the git2 fast path with rename detection.
    fn commit_oid(&self) -> Option<Oid> {
        None
    }

    fn repository(&self) -> Option<&Mutex<Repository>> {
        None
    }

    fn is_binary(&self, path: &str) -> Result<bool> {
        Ok(is_binary_content(&self.open_reader(path)?))
    }
}

/// First 8 KiB NUL-byte heuristic, matching the detection used throughout
/// the pack for "is this a text file".
pub fn is_binary_content(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

/// A read-only view backed by a git commit's tree object.
pub struct CommitTree {
    repo: Mutex<Repository>,
    commit: Oid,
    /// Eagerly populated path → blob contents, used when concurrent reads
    /// against the backing repository are unsafe (the default: git2's
    /// `Repository` is not `Sync`, so every `CommitTree` wraps its handle in
    /// a mutex regardless; preload additionally avoids repeatedly walking
    /// the tree for `list_files`).
    preload: Option<HashMap<String, Vec<u8>>>,
}

impl CommitTree {
    pub fn open(repo_path: &Path, rev: &str) -> Result<Self> {
        let repo = Repository::open(repo_path)?;
        let obj = repo.revparse_single(rev)?;
        let commit = obj.peel_to_commit()?.id();
        Ok(Self { repo: Mutex::new(repo), commit, preload: None })
    }

    pub fn from_oid(repo: Repository, commit: Oid) -> Self {
        Self { repo: Mutex::new(repo), commit, preload: None }
    }

    /// Eagerly walks the tree into an in-memory path→content map.
    pub fn preloaded(mut self) -> Result<Self> {
        let repo = self.repo.lock().expect("repo mutex poisoned");
        let commit = repo.find_commit(self.commit)?;
        let tree = commit.tree()?;
        let mut map = HashMap::new();
        let mut err = None;
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() != Some(ObjectType::Blob) {
                return git2::TreeWalkResult::Ok;
            }
            let path = format!("{root}{}", entry.name().unwrap_or_default());
            match entry.to_object(&repo).and_then(|o| o.peel_to_blob()) {
                Ok(blob) => {
                    map.insert(path, blob.content().to_vec());
                    git2::TreeWalkResult::Ok
                }
                Err(e) => {
                    err = Some(e);
                    git2::TreeWalkResult::Abort
                }
            }
        })?;
        if let Some(e) = err {
            return Err(e.into());
        }
        drop(repo);
        self.preload = Some(map);
        Ok(self)
    }
}

impl Tree for CommitTree {
    fn list_files(&self) -> Result<Vec<String>> {
        if let Some(map) = &self.preload {
            return Ok(map.keys().cloned().collect());
        }
        let repo = self.repo.lock().expect("repo mutex poisoned");
        let commit = repo.find_commit(self.commit)?;
        let tree = commit.tree()?;
        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                files.push(format!("{root}{}", entry.name().unwrap_or_default()));
            }
            git2::TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    fn open_reader(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(map) = &self.preload {
            return map.get(path).cloned().ok_or_else(|| Error::NotFound(path.to_string()));
        }
        let repo = self.repo.lock().expect("repo mutex poisoned");
        let commit = repo.find_commit(self.commit)?;
        let tree = commit.tree()?;
        let entry = tree.get_path(Path::new(path)).map_err(|_| Error::NotFound(path.to_string()))?;
        let blob = entry.to_object(&repo)?.peel_to_blob()?;
        Ok(blob.content().to_vec())
    }

    fn commit_oid(&self) -> Option<Oid> {
        Some(self.commit)
    }

    fn repository(&self) -> Option<&Mutex<Repository>> {
        Some(&self.repo)
    }
}

/// A filesystem-backed view, honoring `.gitignore` plus global excludes.
/// Never hides paths that exist in the base commit being compared against,
/// per the tree-abstraction invariant (avoids spurious deletions).
pub struct WorkingTree {
    root: PathBuf,
    protected_paths: std::collections::HashSet<String>,
}

impl WorkingTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), protected_paths: Default::default() }
    }

    /// Paths that must never be treated as ignored, even if they match a
    /// `.gitignore` rule — typically the file set of the tree this one is
    /// being diffed against.
    pub fn with_protected_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.protected_paths = paths.into_iter().collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Tree for WorkingTree {
    fn list_files(&self) -> Result<Vec<String>> {
        let mut builder = ignore::WalkBuilder::new(&self.root);
        builder.hidden(false).git_ignore(true).git_global(true).git_exclude(true);
        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        for protected in &self.protected_paths {
            if !files.contains(protected) && self.root.join(protected).is_file() {
                files.push(protected.clone());
            }
        }
        Ok(files)
    }

    fn open_reader(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(self.root.join(path)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(path.to_string())
            } else {
                Error::Io(e)
            }
        })
    }
}

/// A `WorkingTree` with an in-memory overlay: unsaved LSP buffers replace
/// on-disk content for the paths they cover, without touching the
/// filesystem.
pub struct WorkingTreeWithOverlay {
    inner: WorkingTree,
    overlay: HashMap<String, Vec<u8>>,
}

impl WorkingTreeWithOverlay {
    pub fn new(inner: WorkingTree, overlay: HashMap<String, Vec<u8>>) -> Self {
        Self { inner, overlay }
    }
}

impl Tree for WorkingTreeWithOverlay {
    fn list_files(&self) -> Result<Vec<String>> {
        let mut files = self.inner.list_files()?;
        for path in self.overlay.keys() {
            if !files.contains(path) {
                files.push(path.clone());
            }
        }
        Ok(files)
    }

    fn open_reader(&self, path: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.overlay.get(path) {
            return Ok(bytes.clone());
        }
        self.inner.open_reader(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn working_tree_lists_and_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        let tree = WorkingTree::new(dir.path());
        let files = tree.list_files().unwrap();
        assert!(files.contains(&"a.txt".to_string()));
        assert_eq!(tree.open_reader("a.txt").unwrap(), b"hello\n");
    }

    #[test]
    fn working_tree_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tree = WorkingTree::new(dir.path());
        assert!(matches!(tree.open_reader("missing.txt"), Err(Error::NotFound(_))));
    }

    #[test]
    fn overlay_shadows_on_disk_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"disk\n").unwrap();
        let mut overlay = HashMap::new();
        overlay.insert("a.txt".to_string(), b"buffer\n".to_vec());
        let tree = WorkingTreeWithOverlay::new(WorkingTree::new(dir.path()), overlay);
        assert_eq!(tree.open_reader("a.txt").unwrap(), b"buffer\n");
    }

    #[test]
    fn overlay_adds_unsaved_new_file_to_listing() {
        let dir = tempfile::tempdir().unwrap();
        let mut overlay = HashMap::new();
        overlay.insert("new.txt".to_string(), b"x".to_vec());
        let tree = WorkingTreeWithOverlay::new(WorkingTree::new(dir.path()), overlay);
        assert!(tree.list_files().unwrap().contains(&"new.txt".to_string()));
    }

    #[test]
    fn is_binary_detects_nul_byte() {
        assert!(is_binary_content(b"abc\0def"));
        assert!(!is_binary_content(b"plain text"));
    }

    #[test]
    fn commit_tree_reads_blob_at_head() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"v1\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        let tree_oid = index.write_tree().unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let commit_oid =
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();

        let commit_tree = CommitTree::from_oid(Repository::open(dir.path()).unwrap(), commit_oid);
        assert_eq!(commit_tree.open_reader("a.txt").unwrap(), b"v1\n");
        assert!(commit_tree.list_files().unwrap().contains(&"a.txt".to_string()));
        let _ = commit_oid;
    }

    #[test]
    fn commit_tree_preload_matches_on_demand_reads() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut f = std::fs::File::create(dir.path().join("a.txt")).unwrap();
        f.write_all(b"hello\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let commit_oid = repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();

        let lazy = CommitTree::from_oid(Repository::open(dir.path()).unwrap(), commit_oid);
        let preloaded =
            CommitTree::from_oid(Repository::open(dir.path()).unwrap(), commit_oid).preloaded().unwrap();
        assert_eq!(lazy.open_reader("a.txt").unwrap(), preloaded.open_reader("a.txt").unwrap());
    }
}
