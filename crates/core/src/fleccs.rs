//! FLeCCS searcher (C5): weighted-Dice bigram similarity over sliding line
//! windows with context padding, memoized per `(query, file)`.
//!
//! A Rust re-implementation of the "FLeCCS" algorithm (Mondal et al., ICPC
//! 2021) in the idiom of `original_source/pkg/fleccs`; details may differ.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::error::Result;
use crate::ignore_rules::{IgnoreLineRule, MatcherRules};
use crate::model::{Clone, Source};
use crate::pool::CancellationToken;
use crate::text::{bigram, sorted_intersection_count};
use crate::tree::Tree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleccsOptions {
    pub context_lines: usize,
    pub similarity_threshold: f64,
}

impl Default for FleccsOptions {
    fn default() -> Self {
        Self { context_lines: 4, similarity_threshold: 0.7 }
    }
}

/// Splits file bytes into lines the same way `text::line_start_indices`
/// bounds them, so a trailing newline yields one extra empty trailing line.
fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.split(|&b| b == b'\n').collect()
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn hash_context(lines: &[&[u8]]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for line in lines {
        line.hash(&mut hasher);
    }
    hasher.finish()
}

/// `(queryContextHash, fileHash)` composed into one 64-bit cache key, as the
/// data model specifies.
fn cache_key(query_hash: u64, file_hash: u64) -> u64 {
    (query_hash << 32) | (file_hash & 0xFFFF_FFFF)
}

#[derive(Debug, Clone)]
struct Query {
    source: Source,
    context_start_line: usize,
    context_end_line: usize,
    line_lengths: Vec<usize>,
    line_bigrams: Vec<Vec<u16>>,
    content_hash: u64,
}

impl Query {
    fn build(source: &Source, tree: &dyn Tree, options: &FleccsOptions) -> Result<Self> {
        let bytes = tree.open_reader(&source.filename)?;
        let lines = split_lines(&bytes);
        let file_line_count = lines.len();

        let context_start_line = source.start_line.saturating_sub(options.context_lines).max(1);
        let context_end_line = (source.end_line + options.context_lines).min(file_line_count);

        let context_lines: Vec<&[u8]> = if context_start_line <= context_end_line {
            lines[context_start_line - 1..context_end_line].to_vec()
        } else {
            Vec::new()
        };

        let line_lengths = context_lines.iter().map(|l| l.len()).collect();
        let line_bigrams = context_lines.iter().map(|l| bigram(l)).collect();
        let content_hash = hash_context(&context_lines);

        Ok(Self {
            source: source.clone(),
            context_start_line,
            context_end_line,
            line_lengths,
            line_bigrams,
            content_hash,
        })
    }

    /// Shrinks a window-relative candidate (1-based, inclusive, within the
    /// context-padded window) back to the true clone region by removing the
    /// padding added on both sides.
    fn account_for_context(&self, start: usize, end: usize) -> (usize, usize) {
        let context_start_diff = self.source.start_line - self.context_start_line;
        let context_end_diff = self.context_end_line - self.source.end_line;
        (start + context_start_diff, end.saturating_sub(context_end_diff))
    }
}

/// Per-line Dice-Sørensen coefficient; 0 when both bigram sets are empty.
fn disc(a: &[u16], b: &[u16]) -> f64 {
    let denom = a.len() + b.len();
    if denom == 0 {
        return 0.0;
    }
    2.0 * sorted_intersection_count(a, b) as f64 / denom as f64
}

/// Weighted-Average Dice-Sørensen Coefficient across a window of lines,
/// weighted by each line pair's combined length.
fn wadisc(lengths1: &[usize], lengths2: &[usize], bigrams1: &[Vec<u16>], bigrams2: &[Vec<u16>]) -> f64 {
    let total_length: usize = lengths1.iter().sum::<usize>() + lengths2.iter().sum::<usize>();
    if total_length == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..bigrams1.len() {
        let d = disc(&bigrams1[i], &bigrams2[i]);
        let weight = (lengths1[i] + lengths2[i]) as f64 / total_length as f64;
        sum += d * weight;
    }
    sum
}

struct CacheEntry {
    candidates: Vec<Clone>,
    inserted: Instant,
}

const CACHE_TTL: Duration = Duration::from_secs(60);

fn candidate_cache() -> &'static DashMap<u64, CacheEntry> {
    static CACHE: OnceLock<DashMap<u64, CacheEntry>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

fn cache_get(key: u64) -> Option<Vec<Clone>> {
    let cache = candidate_cache();
    if let Some(entry) = cache.get(&key) {
        if entry.inserted.elapsed() < CACHE_TTL {
            return Some(entry.candidates.clone());
        }
    }
    cache.remove(&key);
    None
}

fn cache_put(key: u64, candidates: Vec<Clone>) {
    candidate_cache().insert(key, CacheEntry { candidates, inserted: Instant::now() });
}

/// Slides a window the size of `query`'s context across `file_bigrams`,
/// honoring `ignore_rule`'s skip windows, and emits every position whose
/// WaDiSC similarity clears `threshold`.
fn find_candidates(
    query: &Query,
    filename: &str,
    file_lengths: &[usize],
    file_bigrams: &[Vec<u16>],
    ignore_rule: &Option<IgnoreLineRule>,
    context_lines: usize,
    threshold: f64,
) -> Vec<Clone> {
    let window = query.line_bigrams.len();
    let mut out = Vec::new();
    if window == 0 || file_bigrams.len() < window {
        return out;
    }
    let mut ignore_rule = ignore_rule.clone();

    let mut i = 0usize;
    while i + window <= file_bigrams.len() {
        if let Some(rule) = ignore_rule.as_mut() {
            let original_window = window.saturating_sub(2 * context_lines);
            let (skip, skip_until) = rule.can_skip(i + context_lines, original_window);
            if skip {
                let skip_until = skip_until.unwrap();
                i = skip_until.saturating_sub(context_lines);
                continue;
            }
        }

        let similarity = wadisc(
            &query.line_lengths,
            &file_lengths[i..i + window],
            &query.line_bigrams,
            &file_bigrams[i..i + window],
        );
        if similarity >= threshold {
            let (start, end) = query.account_for_context(i + 1, i + window);
            out.push(Clone {
                filename: filename.to_string(),
                start_line: start,
                end_line: end,
                distance: 1.0 - similarity,
                sources: vec![query.source.clone()],
            });
            i += window - 1;
        }
        i += 1;
    }
    out
}

fn scan_file(
    filename: &str,
    search_tree: &dyn Tree,
    queries: &[Query],
    matcher: &MatcherRules,
    options: &FleccsOptions,
    cancel: &CancellationToken,
) -> Result<Vec<Clone>> {
    cancel.check()?;

    let bytes = search_tree.open_reader(filename)?;
    if crate::tree::is_binary_content(&bytes) {
        return Ok(Vec::new());
    }

    let (skip_entire_file, ignore_rule) = matcher.eval(filename, &bytes);
    if skip_entire_file {
        return Ok(Vec::new());
    }

    let lines = split_lines(&bytes);
    let file_lengths: Vec<usize> = lines.iter().map(|l| l.len()).collect();
    let file_bigrams: Vec<Vec<u16>> = lines.iter().map(|l| bigram(l)).collect();
    let file_hash = hash_bytes(&bytes);

    let mut out = Vec::new();
    for query in queries {
        cancel.check()?;
        let key = cache_key(query.content_hash, file_hash);
        if let Some(cached) = cache_get(key) {
            out.extend(cached);
            continue;
        }
        let found = find_candidates(
            query,
            filename,
            &file_lengths,
            &file_bigrams,
            &ignore_rule,
            options.context_lines,
            options.similarity_threshold,
        );
        cache_put(key, found.clone());
        out.extend(found);
    }
    Ok(out)
}

/// Runs the FLeCCS search: builds context-padded queries from `queries_tree`,
/// then scans every file in `search_tree` for near-duplicate windows.
pub fn search(
    queries_tree: &dyn Tree,
    queries: &[Source],
    search_tree: &dyn Tree,
    matcher: &MatcherRules,
    options: &FleccsOptions,
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
    fn identical_two_line_block_is_near_identical() {
        let dir = tempfile::tempdir().unwrap();
        let content = "the quick brown fox\njumps over lazy dog\nsome other line\n";
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 2);
        let options = FleccsOptions { context_lines: 0, similarity_threshold: 0.99 };
        let cancel = CancellationToken::new();
        let clones =
            search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();

        assert_eq!(clones.len(), 1);
        assert_eq!(clones[0].start_line, 1);
        assert_eq!(clones[0].end_line, 2);
        assert!(clones[0].distance < 0.02);
    }

    #[test]
    fn no_match_below_threshold_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc\ndef\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "xyz\nqrs\n").unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 2);
        let options = FleccsOptions::default();
        let cancel = CancellationToken::new();
        let clones =
            search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        // the only clone found should be the query matching itself; b.txt should not match
        assert!(clones.iter().all(|c| c.filename == "a.txt"));
    }

    #[test]
    fn binary_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "abc\ndef\n").unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 3]).unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 2);
        let options = FleccsOptions { context_lines: 0, similarity_threshold: 0.5 };
        let cancel = CancellationToken::new();
        let clones =
            search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        assert!(clones.iter().all(|c| c.filename != "bin.dat"));
    }

    #[test]
    fn context_window_shrinks_back_to_true_region() {
        let dir = tempfile::tempdir().unwrap();
        let content = "pad1\npad2\nthe quick brown fox\njumps over lazy dog\npad3\npad4\n";
        std::fs::write(dir.path().join("a.txt"), content).unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 3, 4);
        let options = FleccsOptions { context_lines: 2, similarity_threshold: 0.99 };
        let cancel = CancellationToken::new();
        let clones =
            search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        assert_eq!(clones.len(), 1);
        assert_eq!((clones[0].start_line, clones[0].end_line), (3, 4));
    }

    #[test]
    fn cache_replays_identical_candidates_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one two\nthree four\n").unwrap();
        let tree = WorkingTree::new(dir.path());

        let query = Source::new("a.txt", 1, 2);
        let options = FleccsOptions { context_lines: 0, similarity_threshold: 0.99 };
        let cancel = CancellationToken::new();
        let first = search(&tree, &[query.clone()], &tree, &matcher(), &options, &cancel).unwrap();
        let second = search(&tree, &[query], &tree, &matcher(), &options, &cancel).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.start_line, b.start_line);
            assert_eq!(a.end_line, b.end_line);
            assert_eq!(a.distance, b.distance);
        }
    }
}
