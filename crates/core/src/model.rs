//! The pure-value types shared by the searchers, the clone-set builder, and
//! everything downstream of them.

use serde::{Deserialize, Serialize};

/// A citation into a file: 1-based, inclusive line range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub filename: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl Source {
    pub fn new(filename: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self { filename: filename.into(), start_line, end_line }
    }

    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.filename, self.start_line, self.end_line)
    }

    pub fn overlaps(&self, other: &Source) -> bool {
        self.filename == other.filename
            && self.start_line <= other.end_line
            && other.start_line <= self.end_line
    }
}

/// A detected near-duplicate. `distance` is in `[0, 1]`; 0 means identical.
/// `sources` records which queries produced this hit, supporting
/// multi-source coalescence during dedupe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clone {
    pub filename: String,
    pub start_line: usize,
    pub end_line: usize,
    pub distance: f64,
    pub sources: Vec<Source>,
}

impl Clone {
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.filename, self.start_line, self.end_line)
    }

    pub fn overlaps_source(&self, other: &Source) -> bool {
        self.filename == other.filename
            && self.start_line <= other.end_line
            && other.start_line <= self.end_line
    }
}

/// Equivalence class of mutually similar clones, partitioned into the
/// members touched by the diff under analysis (`changed`) and the siblings
/// that were not (`missing`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneSet {
    pub changed: Vec<Clone>,
    pub missing: Vec<Clone>,
}

impl CloneSet {
    pub fn len(&self) -> usize {
        self.changed.len() + self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn changed_proportion(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.changed.len() as f64 / self.len() as f64
    }

    /// Sorts `missing` by ascending minimum file-tree distance to any
    /// `changed` member's filename, then by ascending `distance`.
    pub fn sort(&mut self) {
        let changed_files: Vec<&str> = self.changed.iter().map(|c| c.filename.as_str()).collect();
        self.missing.sort_by(|a, b| {
            let da = min_tree_distance(&a.filename, &changed_files);
            let db = min_tree_distance(&b.filename, &changed_files);
            da.cmp(&db).then(a.distance.partial_cmp(&b.distance).unwrap())
        });
    }
}

fn min_tree_distance(filename: &str, changed_files: &[&str]) -> usize {
    changed_files
        .iter()
        .map(|f| crate::text::file_tree_distance(filename, f))
        .min()
        .unwrap_or(0)
}

/// Ascending by `|missing|`, so the sets needing the least review surface
/// first.
pub fn sort_clone_sets(sets: &mut [CloneSet]) {
    sets.sort_by_key(|s| s.missing.len());
}
