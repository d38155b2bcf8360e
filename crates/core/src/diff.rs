//! Diff driver (C4): turns two `Tree`s into typed, line-numbered chunks.

use similar::{DiffTag, TextDiff};

use crate::error::Result;
use crate::pool::CancellationToken;
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Equal,
    Add,
    Delete,
    Modify,
}

/// A single typed fragment of a file patch. Lines are 1-based, inclusive on
/// both sides. `add` chunks report a degenerate `before` range anchored one
/// line above the insertion point; `delete` chunks are degenerate on the
/// `after` side symmetrically.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub filename: String,
    pub kind: ChangeKind,
    pub before_start: usize,
    pub before_end: usize,
    pub after_start: usize,
    pub after_end: usize,
}

impl Chunk {
    /// The chunk's range expressed on the target (`after`) tree — the
    /// authoritative source for queries and for changed/missing partition
    /// overlap tests, per the diff driver's open-question resolution: pure
    /// additions degenerate the before-range to `[0, 0]`, so the after-range
    /// is what downstream consumers must use.
    pub fn after_range(&self) -> (usize, usize) {
        (self.after_start, self.after_end)
    }
}

/// A single file's patch: the typed chunks plus whether either side is
/// binary (in which case `chunks` is empty — binary patches are skipped).
#[derive(Debug, Clone)]
pub struct FilePatch {
    pub from_path: Option<String>,
    pub to_path: Option<String>,
    pub chunks: Vec<Chunk>,
    pub is_binary: bool,
}

/// Classifies which paths changed between `from` and `to`. When both trees
/// are commit trees sharing a repository, uses git2's tree-to-tree diff with
/// rename detection (the "fast path"); otherwise falls back to a content-hash
/// comparison over each side's file listing (the "general path").
fn changed_pairs(from: &dyn Tree, to: &dyn Tree) -> Result<Vec<(Option<String>, Option<String>)>> {
    if let (Some(from_oid), Some(to_oid), Some(repo_mutex)) =
        (from.commit_oid(), to.commit_oid(), from.repository())
    {
        let repo = repo_mutex.lock().expect("repo mutex poisoned");
        let from_tree = repo.find_commit(from_oid)?.tree()?;
        let to_tree = repo.find_commit(to_oid)?.tree()?;
        let mut diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
        let mut find_opts = git2::DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))?;

        let mut pairs = Vec::new();
        diff.foreach(
            &mut |delta, _| {
                let from_path = delta.old_file().path().map(|p| p.to_string_lossy().replace('\\', "/"));
                let to_path = delta.new_file().path().map(|p| p.to_string_lossy().replace('\\', "/"));
                pairs.push((from_path, to_path));
                true
            },
            None,
            None,
            None,
        )?;
        return Ok(pairs);
    }

    let from_files = from.list_files()?;
    let to_files = to.list_files()?;
    let to_set: std::collections::HashSet<&str> = to_files.iter().map(String::as_str).collect();
    let from_set: std::collections::HashSet<&str> = from_files.iter().map(String::as_str).collect();

    let mut pairs = Vec::new();
    for path in &to_files {
        if from_set.contains(path.as_str()) {
            let a = from.open_reader(path)?;
            let b = to.open_reader(path)?;
            if a != b {
                pairs.push((Some(path.clone()), Some(path.clone())));
            }
        } else {
            pairs.push((None, Some(path.clone())));
        }
    }
    // Pure deletions are intentionally omitted: they carry no target range
    // to mark and are skipped per the diff driver's spec.
    let _ = from_set.difference(&to_set);
    Ok(pairs)
}

/// Produces the per-file patches between `from` and `to`, fusing adjacent
/// add+delete chunks into `modify` along the way.
pub fn diff_trees(from: &dyn Tree, to: &dyn Tree, cancel: &CancellationToken) -> Result<Vec<FilePatch>> {
    let pairs = changed_pairs(from, to)?;
    let mut patches = Vec::with_capacity(pairs.len());

    for (from_path, to_path) in pairs {
        cancel.check()?;
        let Some(to_path_ref) = to_path.clone() else { continue };

        let to_bytes = to.open_reader(&to_path_ref)?;
        let from_bytes = match &from_path {
            Some(p) => Some(from.open_reader(p)?),
            None => None,
        };

        let is_binary = crate::tree::is_binary_content(&to_bytes)
            || from_bytes.as_deref().is_some_and(crate::tree::is_binary_content);
        if is_binary {
            patches.push(FilePatch { from_path, to_path, chunks: vec![], is_binary: true });
            continue;
        }

        let chunks = match from_bytes {
            None => {
                // Pure addition: one `add` chunk covering the whole file.
                let line_count = to_bytes.iter().filter(|&&b| b == b'\n').count()
                    + usize::from(!to_bytes.is_empty() && *to_bytes.last().unwrap() != b'\n');
                if line_count == 0 {
                    vec![]
                } else {
                    vec![Chunk {
                        filename: to_path_ref.clone(),
                        kind: ChangeKind::Add,
                        before_start: 0,
                        before_end: 0,
                        after_start: 1,
                        after_end: line_count,
                    }]
                }
            }
            Some(from_bytes) => {
                build_chunks(&to_path_ref, &from_bytes, &to_bytes)
            }
        };

        patches.push(FilePatch { from_path, to_path: Some(to_path_ref), chunks, is_binary: false });
    }

    Ok(patches)
}

fn build_chunks(filename: &str, from_bytes: &[u8], to_bytes: &[u8]) -> Vec<Chunk> {
    let old_text = String::from_utf8_lossy(from_bytes);
    let new_text = String::from_utf8_lossy(to_bytes);
    let diff = TextDiff::from_lines(old_text.as_ref(), new_text.as_ref());

    let mut raw = Vec::new();
    let (mut bf, mut af) = (1usize, 1usize);
    for op in diff.ops() {
        match op.tag() {
            DiffTag::Equal => {
                let l = op.old_range().len();
                if l > 0 {
                    raw.push(Chunk {
                        filename: filename.to_string(),
                        kind: ChangeKind::Equal,
                        before_start: bf,
                        before_end: bf + l - 1,
                        after_start: af,
                        after_end: af + l - 1,
                    });
                }
                bf += l;
                af += l;
            }
            DiffTag::Delete => {
                let l = op.old_range().len();
                raw.push(Chunk {
                    filename: filename.to_string(),
                    kind: ChangeKind::Delete,
                    before_start: bf,
                    before_end: bf + l - 1,
                    after_start: af.saturating_sub(1),
                    after_end: af.saturating_sub(1),
                });
                bf += l;
            }
            DiffTag::Insert => {
                let l = op.new_range().len();
                raw.push(Chunk {
                    filename: filename.to_string(),
                    kind: ChangeKind::Add,
                    before_start: bf.saturating_sub(1),
                    before_end: bf.saturating_sub(1),
                    after_start: af,
                    after_end: af + l - 1,
                });
                af += l;
            }
            DiffTag::Replace => {
                // similar already groups an adjacent delete+insert run into
                // one replace op — this is the fused `modify` chunk directly.
                let d = op.old_range().len();
                let a = op.new_range().len();
                raw.push(Chunk {
                    filename: filename.to_string(),
                    kind: ChangeKind::Modify,
                    before_start: bf,
                    before_end: bf + d - 1,
                    after_start: af,
                    after_end: af + a - 1,
                });
                bf += d;
                af += a;
            }
        }
    }

    fuse_adjacent_add_delete(raw)
}

/// Merges an adjacent `add`+`delete` pair (in either order) into a single
/// `modify` chunk, per the diff driver's fusion rule.
fn fuse_adjacent_add_delete(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut iter = chunks.into_iter().peekable();
    while let Some(chunk) = iter.next() {
        if let Some(next) = iter.peek() {
            let fuses = matches!(
                (chunk.kind, next.kind),
                (ChangeKind::Add, ChangeKind::Delete) | (ChangeKind::Delete, ChangeKind::Add)
            );
            if fuses {
                let next = iter.next().unwrap();
                let (delete, add) =
                    if chunk.kind == ChangeKind::Delete { (&chunk, &next) } else { (&next, &chunk) };
                out.push(Chunk {
                    filename: chunk.filename.clone(),
                    kind: ChangeKind::Modify,
                    before_start: delete.before_start,
                    before_end: delete.before_end,
                    after_start: add.after_start,
                    after_end: add.after_end,
                });
                continue;
            }
        }
        out.push(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn pure_addition_is_add_chunk_spanning_whole_file() {
        let from_dir = tempfile::tempdir().unwrap();
        let to_dir = tempfile::tempdir().unwrap();
        std::fs::write(to_dir.path().join("new.txt"), b"a\nb\nc\n").unwrap();
        let from = WorkingTree::new(from_dir.path());
        let to = WorkingTree::new(to_dir.path());
        let patches = diff_trees(&from, &to, &cancel()).unwrap();
        assert_eq!(patches.len(), 1);
        let patch = &patches[0];
        assert!(patch.from_path.is_none());
        assert_eq!(patch.chunks.len(), 1);
        assert_eq!(patch.chunks[0].kind, ChangeKind::Add);
        assert_eq!(patch.chunks[0].after_start, 1);
        assert_eq!(patch.chunks[0].after_end, 3);
    }

    #[test]
    fn modification_fuses_add_delete_into_modify() {
        let from_dir = tempfile::tempdir().unwrap();
        let to_dir = tempfile::tempdir().unwrap();
        std::fs::write(from_dir.path().join("f.txt"), b"one\ntwo\nthree\n").unwrap();
        std::fs::write(to_dir.path().join("f.txt"), b"one\nTWO\nthree\n").unwrap();
        let from = WorkingTree::new(from_dir.path());
        let to = WorkingTree::new(to_dir.path());
        let patches = diff_trees(&from, &to, &cancel()).unwrap();
        assert_eq!(patches.len(), 1);
        let kinds: Vec<_> = patches[0].chunks.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChangeKind::Modify));
        assert!(!kinds.contains(&ChangeKind::Add) || kinds.contains(&ChangeKind::Equal));
    }

    #[test]
    fn identical_content_produces_no_patch() {
        let from_dir = tempfile::tempdir().unwrap();
        let to_dir = tempfile::tempdir().unwrap();
        std::fs::write(from_dir.path().join("f.txt"), b"same\n").unwrap();
        std::fs::write(to_dir.path().join("f.txt"), b"same\n").unwrap();
        let from = WorkingTree::new(from_dir.path());
        let to = WorkingTree::new(to_dir.path());
        let patches = diff_trees(&from, &to, &cancel()).unwrap();
        assert!(patches.is_empty());
    }

    #[test]
    fn binary_file_is_skipped_with_no_chunks() {
        let from_dir = tempfile::tempdir().unwrap();
        let to_dir = tempfile::tempdir().unwrap();
        std::fs::write(from_dir.path().join("bin.dat"), [0u8, 1, 2]).unwrap();
        std::fs::write(to_dir.path().join("bin.dat"), [0u8, 1, 3]).unwrap();
        let from = WorkingTree::new(from_dir.path());
        let to = WorkingTree::new(to_dir.path());
        let patches = diff_trees(&from, &to, &cancel()).unwrap();
        assert_eq!(patches.len(), 1);
        assert!(patches[0].is_binary);
        assert!(patches[0].chunks.is_empty());
    }

    #[test]
    fn reconstructability_line_counts_match_originals() {
        let from_dir = tempfile::tempdir().unwrap();
        let to_dir = tempfile::tempdir().unwrap();
        std::fs::write(from_dir.path().join("f.txt"), b"a\nb\nc\nd\n").unwrap();
        std::fs::write(to_dir.path().join("f.txt"), b"a\nX\nc\ne\nd\n").unwrap();
        let from = WorkingTree::new(from_dir.path());
        let to = WorkingTree::new(to_dir.path());
        let patches = diff_trees(&from, &to, &cancel()).unwrap();
        let chunks = &patches[0].chunks;

        let before_lines: usize = chunks
            .iter()
            .filter(|c| matches!(c.kind, ChangeKind::Equal | ChangeKind::Delete | ChangeKind::Modify))
            .map(|c| c.before_end + 1 - c.before_start)
            .sum();
        let after_lines: usize = chunks
            .iter()
            .filter(|c| matches!(c.kind, ChangeKind::Equal | ChangeKind::Add | ChangeKind::Modify))
            .map(|c| c.after_end + 1 - c.after_start)
            .sum();
        assert_eq!(before_lines, 4);
        assert_eq!(after_lines, 5);
    }
}
