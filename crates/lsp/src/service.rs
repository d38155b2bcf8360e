//! `LspService` (§4.9): session state, method dispatch, and the debounced
//! analysis pass. Operates purely on parsed `serde_json::Value` JSON-RPC
//! messages — [`crate::transport`] is what actually talks to an editor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{json, Value};

use iccheck_core::config::IccheckConfig;
use iccheck_core::ignore_rules::read_matcher_rules;
use iccheck_core::pool::CancellationToken;
use iccheck_core::repo;
use iccheck_core::search::{self, SearchOptions};
use iccheck_core::tree::{CommitTree, Tree, WorkingTree, WorkingTreeWithOverlay};
use iccheck_core::{Clone as IccheckClone, CloneSet};

use crate::analyze::AnalyzeCache;
use crate::debounce::Debouncer;
use crate::diagnostics::{self, Diagnostic};
use crate::ratelimit::RateLimiter;

const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Outbound notifications the service needs to push (`publishDiagnostics`):
/// an abstraction over whatever JSON-RPC transport framed the inbound
/// message, so this crate stays transport-agnostic.
pub trait OutboundConn: Send + Sync {
    fn notify(&self, method: &str, params: Value);
}

pub struct LspService {
    conn: Arc<dyn OutboundConn>,
    root_path: Mutex<Option<PathBuf>>,
    /// Absolute path (string form) → unsaved buffer content.
    open_files: DashMap<String, String>,
    /// `searchConfCache` (§4.9): loaded config and ignore rules, keyed on repo
    /// directory so every debounced analysis pass doesn't re-read
    /// `.iccheck.toml`/`.iccheckignore.yaml` from disk.
    config_cache: DashMap<String, Arc<(IccheckConfig, iccheck_core::ignore_rules::MatcherRules)>>,
    analyze_cache: AnalyzeCache,
    rate_limiter: RateLimiter,
    debouncer: Debouncer,
    previous_analysis: DashMap<String, Arc<Vec<CloneSet>>>,
    previous_diagnostics: DashMap<String, HashMap<String, Vec<Diagnostic>>>,
    deadline: Duration,
}

impl LspService {
    pub fn new(conn: Arc<dyn OutboundConn>, deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            conn,
            root_path: Mutex::new(None),
            open_files: DashMap::new(),
            config_cache: DashMap::new(),
            analyze_cache: AnalyzeCache::new(),
            rate_limiter: RateLimiter::default_for_lsp(),
            debouncer: Debouncer::new(DEBOUNCE_DELAY),
            previous_analysis: DashMap::new(),
            previous_diagnostics: DashMap::new(),
            deadline,
        })
    }

    /// Processes one parsed JSON-RPC message. Returns `None` for
    /// notifications (no `id`); the caller must not write anything back for
    /// those.
    pub fn handle_message(self: &Arc<Self>, msg: Value) -> Option<Value> {
        let id = msg.get("id").cloned();
        let method = msg.get("method").and_then(Value::as_str).unwrap_or("").to_string();

        match method.as_str() {
            "initialize" => {
                let root = msg["params"]["rootUri"].as_str().map(uri_to_path);
                *self.root_path.lock().expect("root_path mutex poisoned") = root;
                Some(ok_response(
                    id,
                    json!({
                        "capabilities": {
                            "textDocumentSync": {"openClose": true, "change": 1},
                            "referencesProvider": true
                        }
                    }),
                ))
            }
            "initialized" => None,
            "textDocument/didOpen" => {
                self.on_open_or_change(&msg["params"]["textDocument"]["uri"], text_of_did_open(&msg));
                None
            }
            "textDocument/didChange" => {
                self.on_open_or_change(&msg["params"]["textDocument"]["uri"], text_of_did_change(&msg));
                None
            }
            "textDocument/didClose" => {
                self.on_close(&msg["params"]["textDocument"]["uri"]);
                None
            }
            "textDocument/diagnostic" => Some(ok_response(id, json!({"kind": "full", "items": []}))),
            "textDocument/references" => Some(ok_response(id, self.references(&msg))),
            "textDocument/codeAction" => Some(ok_response(id, Value::Null)),
            "" => Some(error_response(id, -32600, "Invalid Request")),
            _ if id.is_some() => Some(error_response(id, -32601, "Method not found")),
            _ => None,
        }
    }

    fn on_open_or_change(self: &Arc<Self>, uri: &Value, text: Option<String>) {
        let Some(uri) = uri.as_str() else { return };
        let Some(text) = text else { return };
        let path = uri_to_path(uri);
        let key = path.to_string_lossy().into_owned();
        self.open_files.insert(key, text);

        let Some(repo_dir) = containing_repo_dir(&path) else { return };
        self.analyze_cache.invalidate(&repo_dir);

        let service = self.clone();
        self.debouncer.schedule(repo_dir.clone(), move || {
            service.analyze_and_publish(repo_dir);
        });
    }

    fn on_close(&self, uri: &Value) {
        let Some(uri) = uri.as_str() else { return };
        let path = uri_to_path(uri);
        self.open_files.remove(&path.to_string_lossy().into_owned());
    }

    fn analyze_and_publish(self: Arc<Self>, repo_dir: String) {
        let start = Instant::now();
        let result = self.run_analysis(&repo_dir);
        self.rate_limiter.record(start.elapsed());
        match result {
            Ok(sets) => self.publish(&repo_dir, &sets),
            Err(e) => {
                tracing::warn!(repo = %repo_dir, error = %e, "analysis pass failed; discarding");
            }
        }
    }

    fn run_analysis(&self, repo_dir: &str) -> iccheck_core::Result<Arc<Vec<CloneSet>>> {
        let repo_path = Path::new(repo_dir);
        let config_and_matcher = self.load_config_cached(repo_path)?;
        self.analyze_cache.get_or_compute(repo_dir, || {
            let (config, matcher) = &*config_and_matcher;
            let head = CommitTree::open(repo_path, "HEAD")?.preloaded()?;
            let working =
                WorkingTree::new(repo_path).with_protected_paths(head.list_files()?);
            let overlay = self.overlay_for(repo_path);
            let to_tree = WorkingTreeWithOverlay::new(working, overlay);

            let cancel = CancellationToken::with_timeout(self.deadline);
            let options =
                SearchOptions { fleccs: config.fleccs_options(), ncdsearch: config.ncdsearch_options() };

            search::search(&cancel, config.algorithm(), &head, &to_tree, matcher, &options)
        })
    }

    fn load_config_cached(
        &self,
        repo_path: &Path,
    ) -> iccheck_core::Result<Arc<(IccheckConfig, iccheck_core::ignore_rules::MatcherRules)>> {
        let key = repo_path.to_string_lossy().into_owned();
        if let Some(cached) = self.config_cache.get(&key) {
            return Ok(cached.clone());
        }
        let config = IccheckConfig::load(repo_path)?;
        let matcher = read_matcher_rules(repo_path, false, &[], &[])?;
        let loaded = Arc::new((config, matcher));
        self.config_cache.insert(key, loaded.clone());
        Ok(loaded)
    }

    /// Unsaved buffers under `repo_path`, relativized and keyed the way
    /// `Tree::open_reader` expects.
    fn overlay_for(&self, repo_path: &Path) -> HashMap<String, Vec<u8>> {
        self.open_files
            .iter()
            .filter_map(|entry| {
                let abs = Path::new(entry.key());
                let rel = abs.strip_prefix(repo_path).ok()?;
                Some((rel.to_string_lossy().replace('\\', "/"), entry.value().as_bytes().to_vec()))
            })
            .collect()
    }

    fn publish(&self, repo_dir: &str, sets: &[CloneSet]) {
        let diagnostics = diagnostics::build_diagnostics(sets);
        let previous =
            self.previous_diagnostics.get(repo_dir).map(|d| d.clone()).unwrap_or_default();

        for (path, diags) in &diagnostics {
            self.publish_one(repo_dir, path, diags);
        }
        for stale in diagnostics::paths_to_clear(&previous, &diagnostics) {
            self.publish_one(repo_dir, stale, &[]);
        }

        self.previous_analysis.insert(repo_dir.to_string(), Arc::new(sets.to_vec()));
        self.previous_diagnostics.insert(repo_dir.to_string(), diagnostics);
    }

    fn publish_one(&self, repo_dir: &str, rel_path: &str, diags: &[Diagnostic]) {
        let uri = path_to_uri(repo_dir, rel_path);
        self.conn.notify("textDocument/publishDiagnostics", json!({"uri": uri, "diagnostics": diags}));
    }

    /// References provider (§4.9): if the position lies inside a clone from
    /// the most recent analysis, returns every clone location in that set;
    /// otherwise an empty array.
    fn references(&self, msg: &Value) -> Value {
        let Some(uri) = msg["params"]["textDocument"]["uri"].as_str() else { return json!([]) };
        let Some(line0) = msg["params"]["position"]["line"].as_u64() else { return json!([]) };
        let line = line0 as usize + 1;

        let path = uri_to_path(uri);
        let Some(repo_dir) = containing_repo_dir(&path) else { return json!([]) };
        let Ok(rel) = path.strip_prefix(&repo_dir).map(|p| p.to_string_lossy().replace('\\', "/")) else {
            return json!([]);
        };

        let Some(sets) = self.previous_analysis.get(&repo_dir) else { return json!([]) };
        for set in sets.iter() {
            let all: Vec<&IccheckClone> = set.changed.iter().chain(set.missing.iter()).collect();
            let hit = all.iter().any(|c| c.filename == rel && c.start_line <= line && line <= c.end_line);
            if hit {
                return Value::Array(all.iter().map(|c| location_json(&repo_dir, c)).collect());
            }
        }
        json!([])
    }
}

fn text_of_did_open(msg: &Value) -> Option<String> {
    msg["params"]["textDocument"]["text"].as_str().map(str::to_string)
}

fn text_of_did_change(msg: &Value) -> Option<String> {
    msg["params"]["contentChanges"].as_array()?.last()?["text"].as_str().map(str::to_string)
}

fn containing_repo_dir(path: &Path) -> Option<String> {
    let start = path.parent().unwrap_or(path);
    repo::discover_repo_root(start).ok().map(|p| p.to_string_lossy().into_owned())
}

fn location_json(repo_dir: &str, clone: &IccheckClone) -> Value {
    json!({
        "uri": path_to_uri(repo_dir, &clone.filename),
        "range": {
            "start": {"line": clone.start_line.saturating_sub(1), "character": 0},
            "end": {"line": clone.end_line, "character": 0},
        }
    })
}

fn ok_response(id: Option<Value>, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn uri_to_path(uri: &str) -> PathBuf {
    let stripped = uri.strip_prefix("file://").unwrap_or(uri);
    PathBuf::from(percent_decode(stripped))
}

fn path_to_uri(repo_dir: &str, rel_path: &str) -> String {
    let abs = Path::new(repo_dir).join(rel_path);
    format!("file://{}", abs.to_string_lossy())
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
