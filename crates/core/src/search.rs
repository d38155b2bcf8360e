//! Search orchestrator (C8): diffs two trees, builds queries from the
//! changed ranges, dispatches to whichever searcher is selected, and folds
//! the raw hits into clone sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cloneset::build_clone_sets;
use crate::diff::{diff_trees, ChangeKind};
use crate::error::{Error, Result};
use crate::fleccs::{self, FleccsOptions};
use crate::ignore_rules::MatcherRules;
use crate::model::{CloneSet, Source};
use crate::ncdsearch::{self, NcdOptions};
use crate::pool::CancellationToken;
use crate::tree::Tree;

/// Which clone searcher to run. FLeCCS is the default; NCDSearch trades
/// line-bigram similarity for LZ-set Jaccard distance over token windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Fleccs,
    Ncdsearch,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Fleccs => write!(f, "fleccs"),
            Algorithm::Ncdsearch => write!(f, "ncdsearch"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fleccs" => Ok(Algorithm::Fleccs),
            "ncdsearch" => Ok(Algorithm::Ncdsearch),
            other => Err(Error::InvalidConfig(format!("unknown algorithm: {other}"))),
        }
    }
}

/// The two searchers' tunables, bundled together so callers pass one value
/// regardless of which `Algorithm` is selected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub fleccs: FleccsOptions,
    pub ncdsearch: NcdOptions,
}

/// Diffs `from_tree` against `to_tree`, builds one query per non-equal
/// chunk's after-range, runs the selected searcher over `to_tree`, and
/// partitions the results into clone sets.
pub fn search(
    cancel: &CancellationToken,
    algorithm: Algorithm,
    from_tree: &dyn Tree,
    to_tree: &dyn Tree,
    matcher: &MatcherRules,
    options: &SearchOptions,
) -> Result<Vec<CloneSet>> {
    let patches = diff_trees(from_tree, to_tree, cancel)?;

    let mut queries: Vec<Source> = Vec::new();
    let mut chunks = Vec::new();
    for patch in &patches {
        if patch.is_binary {
            continue;
        }
        for chunk in &patch.chunks {
            if chunk.kind == ChangeKind::Equal {
                continue;
            }
            let (start, end) = chunk.after_range();
            queries.push(Source::new(chunk.filename.clone(), start, end));
            chunks.push(chunk.clone());
        }
    }

    if queries.is_empty() {
        return Ok(Vec::new());
    }

    let raw = match algorithm {
        Algorithm::Fleccs => {
            fleccs::search(to_tree, &queries, to_tree, matcher, &options.fleccs, cancel)?
        }
        Algorithm::Ncdsearch => {
            ncdsearch::search(to_tree, &queries, to_tree, matcher, &options.ncdsearch, cancel)?
        }
    };

    Ok(build_clone_sets(raw, &queries, &chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::WorkingTree;

    #[test]
    fn algorithm_round_trips_through_str() {
        assert_eq!("fleccs".parse::<Algorithm>().unwrap(), Algorithm::Fleccs);
        assert_eq!("ncdsearch".parse::<Algorithm>().unwrap(), Algorithm::Ncdsearch);
        assert!("bogus".parse::<Algorithm>().is_err());
    }

    #[test]
    fn no_changes_yields_no_clone_sets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"same\n").unwrap();
        let tree = WorkingTree::new(dir.path());
        let cancel = CancellationToken::new();
        let sets = search(
            &cancel,
            Algorithm::Fleccs,
            &tree,
            &tree,
            &MatcherRules::default(),
            &SearchOptions::default(),
        )
        .unwrap();
        assert!(sets.is_empty());
    }

    #[test]
    fn changed_block_with_sibling_clone_is_reported() {
        let from_dir = tempfile::tempdir().unwrap();
        let to_dir = tempfile::tempdir().unwrap();

        let original = "fn helper() {\n    do_thing();\n    do_other();\n}\n";
        let modified = "fn helper() {\n    do_thing();\n    do_changed();\n}\n";
        std::fs::write(from_dir.path().join("a.rs"), original).unwrap();
        std::fs::write(from_dir.path().join("b.rs"), original).unwrap();
        std::fs::write(to_dir.path().join("a.rs"), modified).unwrap();
        std::fs::write(to_dir.path().join("b.rs"), original).unwrap();

        let from = WorkingTree::new(from_dir.path());
        let to = WorkingTree::new(to_dir.path());
        let cancel = CancellationToken::new();
        let mut options = SearchOptions::default();
        options.fleccs.similarity_threshold = 0.5;
        options.fleccs.context_lines = 0;

        let sets =
            search(&cancel, Algorithm::Fleccs, &from, &to, &MatcherRules::default(), &options)
                .unwrap();
        assert!(sets.iter().any(|s| !s.missing.is_empty()));
    }
}
