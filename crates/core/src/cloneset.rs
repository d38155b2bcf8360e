//! Clone-set builder (C7): dedupe/coalesce raw clone hits, group them with
//! their originating queries via union-find, and partition each group into
//! changed/missing members.

use std::collections::HashMap;

use crate::diff::Chunk;
use crate::model::{Clone, CloneSet, Source};

/// Sorts by `(filename, start_line)` and merges contiguous, file-matching,
/// range-overlapping clones into one coalesced clone: the union of the
/// range, the average distance, and the deduplicated union of sources.
pub fn dedupe_coalesce(mut clones: Vec<Clone>) -> Vec<Clone> {
    clones.sort_by(|a, b| a.filename.cmp(&b.filename).then(a.start_line.cmp(&b.start_line)));

    let mut out = Vec::with_capacity(clones.len());
    let mut start_idx = 0;
    let mut i = 0;
    while i < clones.len() {
        let next_coalesces = i + 1 < clones.len()
            && clones[i].filename == clones[i + 1].filename
            && clones[i + 1].start_line <= clones[i].end_line;

        if !next_coalesces {
            let group = &clones[start_idx..=i];
            let distance_sum: f64 = group.iter().map(|c| c.distance).sum();
            let mut sources: Vec<Source> = Vec::new();
            let mut seen_keys = std::collections::HashSet::new();
            for c in group {
                for s in &c.sources {
                    if seen_keys.insert(s.key()) {
                        sources.push(s.clone());
                    }
                }
            }
            out.push(Clone {
                filename: group[0].filename.clone(),
                start_line: group[0].start_line,
                end_line: group.last().unwrap().end_line,
                distance: distance_sum / group.len() as f64,
                sources,
            });
            start_idx = i + 1;
        }
        i += 1;
    }
    out
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn root(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.root(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// For each query, the coalesced clones in the same file whose range
/// overlaps the query's range.
fn matched_clones_by_source<'a>(
    clones: &'a [Clone],
    queries: &[Source],
) -> HashMap<String, Vec<usize>> {
    let mut by_filename: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, c) in clones.iter().enumerate() {
        by_filename.entry(c.filename.as_str()).or_default().push(idx);
    }

    let mut matched: HashMap<String, Vec<usize>> = HashMap::new();
    for query in queries {
        let Some(indices) = by_filename.get(query.filename.as_str()) else { continue };
        for &idx in indices {
            if clones[idx].overlaps_source(query) {
                matched.entry(query.key()).or_default().push(idx);
            }
        }
    }
    matched
}

fn is_changed(clone: &Clone, chunks_by_file: &HashMap<&str, Vec<&Chunk>>) -> bool {
    let Some(chunks) = chunks_by_file.get(clone.filename.as_str()) else { return false };
    chunks.iter().any(|c| {
        let (start, end) = c.after_range();
        clone.start_line <= end && start <= clone.end_line
    })
}

/// Clusters `clones` with the `queries` that produced them via union-find on
/// shared overlaps, partitions each cluster into changed/missing against
/// `chunks`, drops size-`<=1` sets, then sorts.
///
/// All-changed sets (no missing member) are kept here — the LSP needs them
/// to publish the §4.9 Info diagnostic ("this clone set is being edited
/// consistently"). Output formats that should only surface actual findings
/// suppress them at render time instead (§8).
pub fn build_clone_sets(clones: Vec<Clone>, queries: &[Source], chunks: &[Chunk]) -> Vec<CloneSet> {
    let coalesced = dedupe_coalesce(clones);
    if coalesced.is_empty() {
        return Vec::new();
    }

    let matched = matched_clones_by_source(&coalesced, queries);

    let mut uf = UnionFind::new(coalesced.len());
    for (i, c) in coalesced.iter().enumerate() {
        for source in &c.sources {
            if let Some(peers) = matched.get(&source.key()) {
                for &j in peers {
                    uf.union(i, j);
                }
            }
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..coalesced.len() {
        let root = uf.root(i);
        groups.entry(root).or_default().push(i);
    }

    let chunks_by_file: HashMap<&str, Vec<&Chunk>> = {
        let mut m: HashMap<&str, Vec<&Chunk>> = HashMap::new();
        for c in chunks {
            m.entry(c.filename.as_str()).or_default().push(c);
        }
        m
    };

    let mut sets: Vec<CloneSet> = groups
        .into_values()
        .filter_map(|indices| {
            if indices.len() < 2 {
                return None;
            }
            let mut set = CloneSet::default();
            for idx in indices {
                let clone = coalesced[idx].clone();
                if is_changed(&clone, &chunks_by_file) {
                    set.changed.push(clone);
                } else {
                    set.missing.push(clone);
                }
            }
            if set.len() <= 1 {
                return None;
            }
            Some(set)
        })
        .collect();

    crate::model::sort_clone_sets(&mut sets);
    for set in &mut sets {
        set.sort();
    }
    sets
}

/// Sets actually worth surfacing as a finding (§8: "entire clone set whose
/// members are all changed → suppressed from output"). The builder keeps
/// all-changed sets so the LSP can still publish its Info diagnostic for
/// them; CLI-style output formats call this to filter them back out.
pub fn reportable(sets: &[CloneSet]) -> impl Iterator<Item = &CloneSet> {
    sets.iter().filter(|s| !s.missing.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clone(f: &str, s: usize, e: usize, d: f64) -> Clone {
        Clone { filename: f.into(), start_line: s, end_line: e, distance: d, sources: vec![] }
    }

    #[test]
    fn dedupe_scenario_from_spec() {
        let clones = vec![clone("f", 10, 20, 0.1), clone("f", 18, 25, 0.2), clone("f", 30, 35, 0.3)];
        let deduped = dedupe_coalesce(clones);
        assert_eq!(deduped.len(), 2);
        assert_eq!((deduped[0].start_line, deduped[0].end_line), (10, 25));
        assert!((deduped[0].distance - 0.15).abs() < 1e-9);
        assert_eq!((deduped[1].start_line, deduped[1].end_line), (30, 35));
    }

    #[test]
    fn dedupe_idempotent() {
        let clones = vec![clone("f", 10, 20, 0.1), clone("f", 18, 25, 0.2), clone("f", 30, 35, 0.3)];
        let once = dedupe_coalesce(clones);
        let twice = dedupe_coalesce(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!((a.start_line, a.end_line), (b.start_line, b.end_line));
        }
    }

    #[test]
    fn partition_scenario_from_spec() {
        let query_a = Source::new("a.go", 10, 12);
        let query_b = Source::new("a.go", 40, 42);
        let mut clone_a = clone("a.go", 10, 12, 0.0);
        clone_a.sources = vec![query_a.clone()];
        let mut clone_b = clone("b.go", 100, 102, 0.1);
        clone_b.sources = vec![query_a.clone()];
        let mut clone_c = clone("c.go", 200, 202, 0.2);
        clone_c.sources = vec![query_b.clone()];

        let chunk = Chunk {
            filename: "a.go".into(),
            kind: crate::diff::ChangeKind::Modify,
            before_start: 10,
            before_end: 12,
            after_start: 10,
            after_end: 12,
        };

        let sets = build_clone_sets(
            vec![clone_a, clone_b, clone_c],
            &[query_a, query_b],
            &[chunk],
        );
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].changed.len(), 1);
        assert_eq!(sets[0].missing.len(), 2);
    }

    #[test]
    fn all_changed_set_is_kept_for_the_lsp_info_diagnostic() {
        // The builder keeps all-changed sets (no missing member) so the LSP
        // can publish the §4.9 Info diagnostic for them; only CLI output
        // formats suppress them (§8).
        let query = Source::new("a.go", 1, 2);
        let mut c1 = clone("a.go", 1, 2, 0.0);
        c1.sources = vec![query.clone()];
        let mut c2 = clone("b.go", 1, 2, 0.0);
        c2.sources = vec![query.clone()];

        let chunks = vec![
            Chunk {
                filename: "a.go".into(),
                kind: crate::diff::ChangeKind::Modify,
                before_start: 1,
                before_end: 2,
                after_start: 1,
                after_end: 2,
            },
            Chunk {
                filename: "b.go".into(),
                kind: crate::diff::ChangeKind::Modify,
                before_start: 1,
                before_end: 2,
                after_start: 1,
                after_end: 2,
            },
        ];
        let sets = build_clone_sets(vec![c1, c2], &[query], &chunks);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].changed.len(), 2);
        assert!(sets[0].missing.is_empty());
    }

    #[test]
    fn size_one_set_is_dropped() {
        let query = Source::new("a.go", 1, 2);
        let mut c1 = clone("a.go", 1, 2, 0.0);
        c1.sources = vec![query.clone()];
        let sets = build_clone_sets(vec![c1], &[query], &[]);
        assert!(sets.is_empty());
    }
}
