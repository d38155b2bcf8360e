//! NCDSearch searcher (C6): LZ-set Jaccard distance over sliding token
//! windows, pre-filtered by n-gram overlap.
//!
//! A Rust re-implementation of "NCDSearch" (Ishio et al.) in the idiom of
//! `original_source/pkg/ncdsearch`; details may differ. The alternative to
//! FLeCCS (C5) — selected via `--algorithm ncdsearch`.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::error::Result;
use crate::ignore_rules::MatcherRules;
use crate::model::{Clone, Source};
use crate::pool::CancellationToken;
use crate::text::line_start_indices;
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NcdOptions {
    pub overlap_ngram: usize,
    pub filter_threshold: f64,
    pub search_threshold: f64,
    pub window_size_multiplier: f64,
}

impl Default for NcdOptions {
    fn default() -> Self {
        Self {
            overlap_ngram: 5,
            filter_threshold: 0.5,
            search_threshold: 0.5,
            window_size_multiplier: 1.2,
        }
    }
}

/// Byte-granularity tokenizer: the default, and the only pluggable strategy
/// this crate ships (the hook point matches `TokenizeFunc` in the original).
fn tokenize_byte(bytes: &[u8]) -> usize {
    bytes.len()
}

/// Cumulative token boundary offsets; for the byte tokenizer this is simply
/// every offset `0..=len`.
fn token_indices(bytes: &[u8]) -> Vec<usize> {
    (0..=bytes.len()).collect()
}

fn ngram_set(n: usize, bytes: &[u8]) -> HashSet<&[u8]> {
    if bytes.len() < n {
        return HashSet::new();
    }
    bytes.windows(n).collect()
}

/// Fraction of the query's distinct n-grams also present in the file.
fn ngram_overlap(n: usize, query: &[u8], file: &[u8]) -> f64 {
    let q = ngram_set(n, query);
    if q.is_empty() {
        return 1.0;
    }
    let f = ngram_set(n, file);
    let intersection = q.intersection(&f).count();
    intersection as f64 / q.len() as f64
}

/// Greedy Lempel-Ziv dictionary: scans left to right, emitting the shortest
/// substring not yet seen at each step.
fn extract_lz_set(bytes: &[u8]) -> HashSet<Vec<u8>> {
    let mut set = HashSet::new();
    let (mut start, mut end) = (0usize, 1usize);
    while end <= bytes.len() {
        let candidate = &bytes[start..end];
        if !set.contains(candidate) {
            set.insert(candidate.to_vec());
            start = end;
        }
        end += 1;
    }
    set
}

/// Builds the candidate's running LZ set incrementally up to each successive
/// position in `positions`, tracking the minimum LZJD observed — the "k-th
/// best cut" the algorithm hunts for.
fn compare_lzjd(bytes: &[u8], positions: &[usize], query_lz: &HashSet<Vec<u8>>) -> (usize, f64) {
    let mut s: HashSet<Vec<u8>> = HashSet::new();
    let (mut start, mut end) = (0usize, 1usize);
    let mut intersection = 0usize;
    let mut k_best = 0usize;
    let mut distance = f64::MAX;

    for (k, &pos) in positions.iter().enumerate() {
        while end <= pos {
            let candidate = &bytes[start..end];
            if !s.contains(candidate) {
                s.insert(candidate.to_vec());
                start = end;
                if query_lz.contains(candidate) {
                    intersection += 1;
                }
            }
            end += 1;
        }

        let union = query_lz.len() + s.len() - intersection;
        let lzjd = if union == 0 { 0.0 } else { 1.0 - intersection as f64 / union as f64 };
        if lzjd < distance {
            k_best = k;
            distance = lzjd;
        }
    }

    (k_best, distance)
}

fn get_line(line_starts: &[usize], byte_offset: usize) -> usize {
    match line_starts.binary_search(&byte_offset) {
        Ok(i) => i + 1,
        Err(i) => i,
    }
}

struct Query {
    source: Source,
    bytes: Vec<u8>,
    lz_set: HashSet<Vec<u8>>,
    window_size: usize,
}

impl Query {
    fn build(source: &Source, tree: &dyn Tree, options: &NcdOptions) -> Result<Self> {
        let file_bytes = tree.open_reader(&source.filename)?;
        let line_starts = line_start_indices(&file_bytes);
        let start_offset = line_starts.get(source.start_line - 1).copied().unwrap_or(0);
        let end_offset = line_starts.get(source.end_line).copied().unwrap_or(file_bytes.len());
        let bytes = file_bytes[start_offset..end_offset.min(file_bytes.len())].to_vec();

        let lz_set = extract_lz_set(&bytes);
        let token_count = tokenize_byte(&bytes);
        let window_size = (options.window_size_multiplier * token_count as f64).floor() as usize;

        Ok(Self { source: source.clone(), bytes, lz_set, window_size })
    }
}

fn scan_file(
    filename: &str,
    search_tree: &dyn Tree,
    queries: &[Query],
    matcher: &MatcherRules,
    options: &NcdOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Clone>> {
    cancel.check()?;

    let file_bytes = search_tree.open_reader(filename)?;
    if crate::tree::is_binary_content(&file_bytes) {
        return Ok(Vec::new());
    }
    let (skip_entire_file, ignore_rule) = matcher.eval(filename, &file_bytes);
    if skip_entire_file {
        return Ok(Vec::new());
    }

    let line_starts = line_start_indices(&file_bytes);
    let tok_indices = token_indices(&file_bytes);

    let mut out = Vec::new();
    for query in queries {
        cancel.check()?;
        if query.window_size == 0 || query.window_size >= tok_indices.len() {
            continue;
        }

        let overlap = ngram_overlap(options.overlap_ngram, &query.bytes, &file_bytes);
        if overlap < options.filter_threshold {
            continue;
        }

        let mut ignore_rule = ignore_rule.clone();
        let end = tok_indices.len() - query.window_size;
        let mut token_idx = 0usize;
        while token_idx < end {
            let token_start = tok_indices[token_idx];
            let token_end = tok_indices[token_idx + query.window_size];
            let start_line = get_line(&line_starts, token_start);
            let end_line = get_line(&line_starts, token_end);

            if let Some(rule) = ignore_rule.as_mut() {
                let window_lines = end_line.saturating_sub(start_line) + 1;
                let (skip, skip_until) = rule.can_skip(start_line, window_lines);
                if skip {
                    let skip_until = skip_until.unwrap();
                    let next_offset =
                        line_starts.get(skip_until).copied().unwrap_or(file_bytes.len());
                    token_idx = tok_indices.partition_point(|&o| o < next_offset);
                    continue;
                }
            }

            let window_bytes = &file_bytes[token_start..token_end];
            let positions: Vec<usize> =
                (0..query.window_size).map(|i| tok_indices[token_idx + i] - token_start).collect();

            let (k_best, distance) = compare_lzjd(window_bytes, &positions, &query.lz_set);
            if distance < options.search_threshold {
                out.push(Clone {
                    filename: filename.to_string(),
                    start_line,
                    end_line: get_line(&line_starts, tok_indices[token_idx + k_best + 1]),
                    distance,
                    sources: vec![query.source.clone()],
                });
            }
            token_idx += 1;
        }
    }
    Ok(out)
}

/// Runs the NCDSearch alternative: tokenizes and filters each file by n-gram
/// overlap before sliding the windowed LZJD comparison across it.
pub fn search(
    queries_tree: &dyn Tree,
    queries: &[Source],
    search_tree: &dyn Tree,
    matcher: &MatcherRules,
    options: &NcdOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Clone>> {
    let built: Vec<Query> =
        queries.iter().map(|s| Query::build(s, queries_tree, options)).collect::<Result<_>>()?;

    let files = search_tree.list_files()?;
    let results: Result<Vec<Vec<Clone>>> = files
        .par_iter()
        .map(|f| scan_file(f, search_tree, &built, matcher, options, cancel))
        .collect();
    Ok(results?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    fn matcher() -> MatcherRules {
        MatcherRules::default()
    }

    #[test]
    fn identical_block_is_near_zero_distance() {
        let dir = tempfile::tempdir().unwrap();
        let content = "the quick brown fox jumps over the lazy dog\nsome filler text here\n";
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 1);
        let options = NcdOptions { search_threshold: 0.9, ..NcdOptions::default() };
        let cancel = CancellationToken::new();
        let clones = search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        assert!(clones.iter().any(|c| c.distance < 0.5));
    }

    #[test]
    fn low_overlap_file_is_filtered_out() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "aaaaaaaaaaaaaaaaaaaaaa\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "zzzzzzzzzzzzzzzzzzzzzz\n").unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 1);
        let options = NcdOptions::default();
        let cancel = CancellationToken::new();
        let clones = search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        assert!(clones.iter().all(|c| c.filename != "b.txt"));
    }

    #[test]
    fn binary_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world example text\n").unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 3, 4, 5]).unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 1);
        let options = NcdOptions::default();
        let cancel = CancellationToken::new();
        let clones = search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        assert!(clones.iter().all(|c| c.filename != "bin.dat"));
    }

    #[test]
    fn ngram_overlap_identical_bytes_is_one() {
        assert_eq!(ngram_overlap(5, b"hello world", b"hello world"), 1.0);
    }

    #[test]
    fn lz_set_extraction_is_nonempty_for_nonempty_input() {
        assert!(!extract_lz_set(b"abcabcabc").is_empty());
    }
}
