//! Output formatters (§6.3): plain functions over `&[CloneSet]`, one per
//! `--format` value. None of these touch the analysis pipeline; they only
//! shape what the root command already computed.

use std::path::Path;

use iccheck_core::cloneset::reportable;
use iccheck_core::Clone;
use iccheck_core::CloneSet;

/// `console`: grouped per clone set, a header naming how many siblings were
/// missed, then one bullet line per clone with its absolute path. All-changed
/// sets (no missing member) carry no actionable finding and are suppressed
/// here (§8), though the builder keeps them for the LSP's Info diagnostic.
pub fn render_console(sets: &[CloneSet], repo_root: &Path) -> String {
    let mut out = String::new();
    for (i, set) in reportable(sets).enumerate() {
        out.push_str(&format!(
            "Clone set #{} — {} out of {} missing:\n",
            i + 1,
            set.missing.len(),
            set.len(),
        ));
        for clone in &set.changed {
            out.push_str(&format!("  [changed] {}\n", bullet(clone, repo_root)));
        }
        for clone in &set.missing {
            out.push_str(&format!("  [missing] {}\n", bullet(clone, repo_root)));
        }
        out.push('\n');
    }
    out
}

fn bullet(clone: &Clone, repo_root: &Path) -> String {
    let abs = repo_root.join(&clone.filename);
    format!("{} L{}-{}", abs.display(), clone.start_line, clone.end_line)
}

/// `json`: newline-delimited JSON objects, one per clone set. All-changed
/// sets are suppressed per §8, same as `render_console`.
pub fn render_json(sets: &[CloneSet]) -> String {
    let mut out = String::new();
    for set in reportable(sets) {
        let value = serde_json::json!({
            "missing": set.missing.iter().map(clone_json).collect::<Vec<_>>(),
            "changed": set.changed.iter().map(clone_json).collect::<Vec<_>>(),
        });
        out.push_str(&serde_json::to_string(&value).expect("CloneSet always serializes"));
        out.push('\n');
    }
    out
}

fn clone_json(clone: &Clone) -> serde_json::Value {
    serde_json::json!({
        "filename": clone.filename,
        "start_l": clone.start_line,
        "end_l": clone.end_line,
        "distance": clone.distance,
        "sources": clone.sources.iter().map(|s| serde_json::json!({
            "filename": s.filename,
            "start_l": s.start_line,
            "end_l": s.end_line,
        })).collect::<Vec<_>>(),
    })
}

const GITHUB_ANNOTATION_CAP: usize = 3;

/// `github`: one `::notice` workflow-command line per missing clone, capped
/// at 3 total with a warning preamble if there would have been more.
pub fn render_github(sets: &[CloneSet]) -> String {
    let missing: Vec<&Clone> = sets.iter().flat_map(|s| s.missing.iter()).collect();
    let mut out = String::new();
    if missing.len() > GITHUB_ANNOTATION_CAP {
        out.push_str(&format!(
            "::warning::{} missing co-changes found; showing the first {GITHUB_ANNOTATION_CAP}\n",
            missing.len(),
        ));
    }
    for clone in missing.into_iter().take(GITHUB_ANNOTATION_CAP) {
        out.push_str(&format!(
            "::notice file={},line={},endLine={},title=Inconsistent co-change::Missing a change here? ({} L{}-{})\n",
            clone.filename, clone.start_line, clone.end_line, clone.filename, clone.start_line, clone.end_line,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use iccheck_core::Source;

    fn clone_set(missing_n: usize, changed_n: usize) -> CloneSet {
        let mut set = CloneSet::default();
        for i in 0..changed_n {
            set.changed.push(Clone {
                filename: "a.rs".into(),
                start_line: i + 1,
                end_line: i + 2,
                distance: 0.0,
                sources: vec![],
            });
        }
        for i in 0..missing_n {
            set.missing.push(Clone {
                filename: format!("b{i}.rs"),
                start_line: 1,
                end_line: 2,
                distance: 0.1,
                sources: vec![Source::new("a.rs", 1, 2)],
            });
        }
        set
    }

    #[test]
    fn console_includes_set_header_and_bullets() {
        let sets = vec![clone_set(1, 1)];
        let rendered = render_console(&sets, Path::new("/repo"));
        assert!(rendered.contains("Clone set #1 — 1 out of 2 missing"));
        assert!(rendered.contains("/repo/a.rs"));
    }

    #[test]
    fn json_emits_one_line_per_set() {
        let sets = vec![clone_set(1, 1), clone_set(2, 0)];
        let rendered = render_json(&sets);
        assert_eq!(rendered.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(rendered.lines().next().unwrap()).unwrap();
        assert_eq!(first["missing"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn github_caps_at_three_with_preamble() {
        let sets = vec![clone_set(4, 0)];
        let rendered = render_github(&sets);
        assert_eq!(rendered.matches("::notice").count(), 3);
        assert!(rendered.contains("::warning::4 missing"));
    }

    #[test]
    fn github_without_overflow_has_no_preamble() {
        let sets = vec![clone_set(2, 0)];
        let rendered = render_github(&sets);
        assert_eq!(rendered.matches("::notice").count(), 2);
        assert!(!rendered.contains("::warning"));
    }

    #[test]
    fn all_changed_set_is_suppressed_from_console_and_json() {
        let sets = vec![clone_set(0, 2), clone_set(1, 1)];
        let console = render_console(&sets, Path::new("/repo"));
        assert!(!console.contains("0 out of 2 missing"));
        assert!(console.contains("Clone set #1 — 1 out of 2 missing"));

        let json = render_json(&sets);
        assert_eq!(json.lines().count(), 1);
    }
}
