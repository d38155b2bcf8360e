//! Diagnostic construction (§4.9 analysis pass, step "Build new
//! diagnostics..."): turns clone sets into per-path LSP diagnostics and
//! tracks which paths need an empty array published to clear stale ones.

use std::collections::HashMap;

use serde::Serialize;

use iccheck_core::CloneSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Severity {
    Warning = 2,
    Information = 3,
}

#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub range: Range,
    pub severity: Severity,
    pub message: String,
    pub source: &'static str,
    pub code: &'static str,
}

/// Whole-line range: LSP positions are 0-based, so a 1-based inclusive
/// `[start_line, end_line]` citation becomes `[start_line-1, end_line)`.
fn line_range(start_line: usize, end_line: usize) -> Range {
    Range {
        start: Position { line: (start_line.saturating_sub(1)) as u32, character: 0 },
        end: Position { line: end_line as u32, character: 0 },
    }
}

fn changed_refs(set: &CloneSet) -> String {
    set.changed
        .iter()
        .map(|c| format!("{}:{}-{}", c.filename, c.start_line, c.end_line))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the diagnostics for every path touched by `sets`, per path.
pub fn build_diagnostics(sets: &[CloneSet]) -> HashMap<String, Vec<Diagnostic>> {
    let mut by_path: HashMap<String, Vec<Diagnostic>> = HashMap::new();

    for set in sets {
        let refs = changed_refs(set);
        let missing_message = format!(
            "Missing a change here? ({} out of {} clones changed: {})",
            set.changed.len(),
            set.len(),
            refs,
        );

        for clone in &set.missing {
            by_path.entry(clone.filename.clone()).or_default().push(Diagnostic {
                range: line_range(clone.start_line, clone.end_line),
                severity: Severity::Warning,
                message: missing_message.clone(),
                source: "ICCheck",
                code: "Consistency check",
            });
        }

        for clone in &set.changed {
            let (severity, message) = if !set.missing.is_empty() {
                (Severity::Warning, missing_message.clone())
            } else {
                (
                    Severity::Information,
                    format!("This clone set is being edited consistently ({} clones).", set.len()),
                )
            };
            by_path.entry(clone.filename.clone()).or_default().push(Diagnostic {
                range: line_range(clone.start_line, clone.end_line),
                severity,
                message,
                source: "ICCheck",
                code: "Consistency check",
            });
        }
    }

    by_path
}

/// Paths that had diagnostics before but have none now — these must be
/// published with an empty array to clear the editor's view.
pub fn paths_to_clear<'a>(
    previous: &'a HashMap<String, Vec<Diagnostic>>,
    current: &HashMap<String, Vec<Diagnostic>>,
) -> Vec<&'a str> {
    previous.keys().filter(|p| !current.contains_key(p.as_str())).map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use iccheck_core::{Clone, Source};

    fn clone(f: &str, s: usize, e: usize) -> Clone {
        Clone { filename: f.into(), start_line: s, end_line: e, distance: 0.1, sources: vec![] }
    }

    #[test]
    fn missing_clone_gets_a_warning() {
        let set = CloneSet {
            changed: vec![clone("a.rs", 1, 2)],
            missing: vec![clone("b.rs", 10, 11)],
        };
        let by_path = build_diagnostics(&[set]);
        let diags = &by_path["b.rs"];
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert!(diags[0].message.contains("a.rs:1-2"));
    }

    #[test]
    fn changed_clone_with_missing_sibling_is_also_warning() {
        let set = CloneSet {
            changed: vec![clone("a.rs", 1, 2)],
            missing: vec![clone("b.rs", 10, 11)],
        };
        let by_path = build_diagnostics(&[set]);
        assert_eq!(by_path["a.rs"][0].severity, Severity::Warning);
    }

    #[test]
    fn line_range_converts_1_based_inclusive_to_lsp_0_based() {
        let range = line_range(5, 7);
        assert_eq!(range.start.line, 4);
        assert_eq!(range.end.line, 7);
    }

    #[test]
    fn paths_to_clear_finds_dropped_paths() {
        let mut previous = HashMap::new();
        previous.insert("stale.rs".to_string(), vec![]);
        previous.insert("kept.rs".to_string(), vec![]);
        let mut current = HashMap::new();
        current.insert("kept.rs".to_string(), vec![]);
        let cleared = paths_to_clear(&previous, &current);
        assert_eq!(cleared, vec!["stale.rs"]);
    }

    #[test]
    fn source_and_code_use_spec_literals() {
        let _ = Source::new("x", 1, 1);
        let set = CloneSet { changed: vec![clone("a", 1, 1)], missing: vec![clone("b", 1, 1)] };
        let by_path = build_diagnostics(&[set]);
        assert_eq!(by_path["a"][0].source, "ICCheck");
        assert_eq!(by_path["a"][0].code, "Consistency check");
    }
}
