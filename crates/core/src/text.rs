//! Line indexing, bigram extraction, and path-distance primitives shared by
//! both searchers.

use crate::model::Source;

/// Byte offset of the first byte of each line in `bytes`, plus one trailing
/// entry at `bytes.len()` so that `indices[i]..indices[i+1]` always bounds
/// line `i`, including a final empty line when the content ends in `\n`.
pub fn line_start_indices(bytes: &[u8]) -> Vec<usize> {
    let mut indices = Vec::with_capacity(bytes.len() / 32 + 2);
    indices.push(0);
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            indices.push(i + 1);
        }
    }
    if *indices.last().unwrap() != bytes.len() {
        indices.push(bytes.len());
    }
    indices
}

/// Maps a byte offset to a 0-based line number via binary search over
/// `line_start_indices` output.
pub fn line_for_offset(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    }
}

/// Packs every consecutive byte pair in `line` into a `u16` (`low |
/// high << 8`), then sorts and dedups. Empty for lines shorter than 2 bytes.
pub fn bigram(line: &[u8]) -> Vec<u16> {
    if line.len() < 2 {
        return Vec::new();
    }
    let mut grams: Vec<u16> = line
        .windows(2)
        .map(|w| w[0] as u16 | ((w[1] as u16) << 8))
        .collect();
    grams.sort_unstable();
    grams.dedup();
    grams
}

/// Linear merge over two sorted, deduped `u16` sequences.
pub fn sorted_intersection_count(a: &[u16], b: &[u16]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

/// Splits two forward-slash paths on their separator, counts shared leading
/// components, and returns the sum of each path's remaining component count.
/// Zero iff the paths are identical.
pub fn file_tree_distance(p1: &str, p2: &str) -> usize {
    let a: Vec<&str> = p1.split('/').collect();
    let b: Vec<&str> = p2.split('/').collect();
    let common = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    (a.len() - common) + (b.len() - common)
}

/// Cuts `source` into overlapping sub-windows of `window` lines each, sliding
/// by one line per step. A micro-clone aid carried over from the original
/// implementation; unused by the core pipeline but exposed for callers that
/// want finer-grained candidate slicing than a single source range.
pub fn slide_cut(source: &Source, window: usize) -> Vec<Source> {
    if window == 0 {
        return Vec::new();
    }
    let total = source.end_line.saturating_sub(source.start_line) + 1;
    if total <= window {
        return vec![source.clone()];
    }
    (source.start_line..=source.end_line - window + 1)
        .map(|start| Source {
            filename: source.filename.clone(),
            start_line: start,
            end_line: start + window - 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_start_indices_tracks_trailing_newline() {
        let indices = line_start_indices(b"ab\ncd\n");
        assert_eq!(indices, vec![0, 3, 6]);
    }

    #[test]
    fn line_start_indices_no_trailing_newline() {
        let indices = line_start_indices(b"ab\ncd");
        assert_eq!(indices, vec![0, 3, 5]);
    }

    #[test]
    fn line_start_indices_empty() {
        assert_eq!(line_start_indices(b""), vec![0]);
    }

    #[test]
    fn bigram_short_line_is_empty() {
        assert!(bigram(b"a").is_empty());
        assert!(bigram(b"").is_empty());
    }

    #[test]
    fn bigram_sorted_and_deduped() {
        let g = bigram(b"aaa");
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn intersection_count_linear_merge() {
        let a = bigram(b"abcabc");
        let b = bigram(b"bcdbcd");
        let n = sorted_intersection_count(&a, &b);
        assert!(n >= 1);
    }

    #[test]
    fn file_tree_distance_identical_path_is_zero() {
        assert_eq!(file_tree_distance("a/b/c.rs", "a/b/c.rs"), 0);
    }

    #[test]
    fn file_tree_distance_counts_divergent_components() {
        // common prefix "a/b", then "c.rs" vs "d/e.rs" (1 + 2 remaining)
        assert_eq!(file_tree_distance("a/b/c.rs", "a/b/d/e.rs"), 3);
    }

    #[test]
    fn slide_cut_shorter_than_window_returns_one_span() {
        let s = Source { filename: "f".into(), start_line: 1, end_line: 2 };
        let cuts = slide_cut(&s, 5);
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0].start_line, 1);
        assert_eq!(cuts[0].end_line, 2);
    }

    #[test]
    fn slide_cut_slides_by_one() {
        let s = Source { filename: "f".into(), start_line: 1, end_line: 5 };
        let cuts = slide_cut(&s, 3);
        assert_eq!(cuts.len(), 3);
        assert_eq!((cuts[0].start_line, cuts[0].end_line), (1, 3));
        assert_eq!((cuts[1].start_line, cuts[1].end_line), (2, 4));
        assert_eq!((cuts[2].start_line, cuts[2].end_line), (3, 5));
    }
}
