//! Project-level configuration: `.iccheck.toml`, loaded once per repository
//! and layered under CLI flags (flags always win).
//!
//! This table is ambient scaffolding absent from the distilled data model —
//! real usage needs a place to pin a default algorithm and thresholds per
//! project, the way the teacher's `.codescope.toml` carries a `[search]`
//! table read by `parse_repos_toml`.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::fleccs::FleccsOptions;
use crate::ncdsearch::NcdOptions;
use crate::search::Algorithm;

const CONFIG_FILE_NAME: &str = ".iccheck.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IccheckConfig {
    #[serde(default)]
    pub search: SearchTable,
    /// Reserved for future incremental-reindex tuning; read but otherwise
    /// unused by this pipeline.
    #[serde(default)]
    pub watch: WatchTable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchTable {
    #[serde(default)]
    pub algorithm: Option<Algorithm>,
    #[serde(default)]
    pub context_lines: Option<usize>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub overlap_ngram: Option<usize>,
    #[serde(default)]
    pub filter_threshold: Option<f64>,
    #[serde(default)]
    pub search_threshold: Option<f64>,
    #[serde(default)]
    pub window_size_multiplier: Option<f64>,
}

impl Default for SearchTable {
    fn default() -> Self {
        Self {
            algorithm: None,
            context_lines: None,
            similarity_threshold: None,
            overlap_ngram: None,
            filter_threshold: None,
            search_threshold: None,
            window_size_multiplier: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchTable {
    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

impl IccheckConfig {
    /// Reads `.iccheck.toml` from `repo_dir` if present; a missing file is
    /// not an error, it just yields defaults.
    pub fn load(repo_dir: &Path) -> Result<Self> {
        let path = repo_dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| crate::error::Error::InvalidConfig(e.to_string()))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.search.algorithm.unwrap_or_default()
    }

    pub fn fleccs_options(&self) -> FleccsOptions {
        let mut options = FleccsOptions::default();
        if let Some(v) = self.search.context_lines {
            options.context_lines = v;
        }
        if let Some(v) = self.search.similarity_threshold {
            options.similarity_threshold = v;
        }
        options
    }

    pub fn ncdsearch_options(&self) -> NcdOptions {
        let mut options = NcdOptions::default();
        if let Some(v) = self.search.overlap_ngram {
            options.overlap_ngram = v;
        }
        if let Some(v) = self.search.filter_threshold {
            options.filter_threshold = v;
        }
        if let Some(v) = self.search.search_threshold {
            options.search_threshold = v;
        }
        if let Some(v) = self.search.window_size_multiplier {
            options.window_size_multiplier = v;
        }
        options
    }
}
