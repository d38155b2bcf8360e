//! ICCheck CLI — compare two repository snapshots and report inconsistent
//! co-changes, run a single-fragment clone search, or start the LSP server.

mod format;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use iccheck_core::cloneset::{dedupe_coalesce, reportable};
use iccheck_core::config::IccheckConfig;
use iccheck_core::fleccs;
use iccheck_core::ignore_rules::read_matcher_rules;
use iccheck_core::model::Source;
use iccheck_core::ncdsearch;
use iccheck_core::pool::CancellationToken;
use iccheck_core::repo::{self, TreeSpec};
use iccheck_core::search::{self, Algorithm, SearchOptions};
use iccheck_core::tree::{Tree, WorkingTree};
use iccheck_core::Error;

/// ICCheck — find inconsistent co-changes across near-duplicate code.
#[derive(Parser)]
#[command(name = "iccheck", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Base ref to compare from (default: auto-detected, see `--to`)
    #[arg(long, short = 'f', global = true)]
    from: Option<String>,

    /// Target ref to compare to; the special value `WORKTREE` means the
    /// filesystem as it stands right now
    #[arg(long, short = 't', global = true)]
    to: Option<String>,

    /// Repository directory (default: current directory)
    #[arg(long, short = 'r', global = true, default_value = ".")]
    repo: PathBuf,

    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Console)]
    format: OutputFormat,

    /// Process exit code to use when inconsistent co-changes are found
    #[arg(long, global = true, default_value_t = 0)]
    fail_code: i32,

    /// Deadline for the whole analysis pass
    #[arg(long, global = true, default_value_t = 60)]
    timeout_seconds: u64,

    /// Clone-search algorithm: `fleccs` or `ncdsearch` (default: from
    /// `.iccheck.toml`, else `fleccs`)
    #[arg(long, global = true)]
    algorithm: Option<String>,

    /// Extra ignore rule, `filePathRegex` or `filePathRegex:contentRegex`
    /// (repeatable)
    #[arg(long = "ignore", global = true)]
    ignore: Vec<String>,

    /// Disable the built-in per-language default ignore rules
    #[arg(long, global = true)]
    disable_default_ignore: bool,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Console,
    Json,
    Github,
}

#[derive(Subcommand)]
enum Commands {
    /// Low-level: find clones of a single source fragment
    Search {
        /// Revision to read the fragment and search target from
        #[arg(long, default_value = "HEAD")]
        r#ref: String,
        /// File containing the fragment
        #[arg(long)]
        file: String,
        /// 1-based, inclusive start line
        #[arg(long)]
        start_line: usize,
        /// 1-based, inclusive end line
        #[arg(long)]
        end_line: usize,
    },
    /// Start the language server over standard I/O
    Lsp {
        /// Deadline for each analysis pass
        #[arg(long, default_value_t = 15)]
        timeout_seconds: u64,
    },
}

fn init_logging(log_level: &str) {
    let directive = format!("iccheck={log_level}");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap_or_else(|_| "iccheck=info".parse().unwrap())),
        )
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let command = cli.command.as_ref();
    let result = match command {
        Some(Commands::Search { r#ref, file, start_line, end_line }) => {
            run_search(&cli, r#ref, file, *start_line, *end_line)
        }
        Some(Commands::Lsp { timeout_seconds }) => {
            iccheck_lsp::transport::run_stdio(Duration::from_secs(*timeout_seconds))
                .map(|()| 0)
                .map_err(Error::Io)
        }
        None => run_root(&cli),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "iccheck failed");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn load_algorithm(cli: &Cli, config: &IccheckConfig) -> Result<Algorithm, Error> {
    match &cli.algorithm {
        Some(raw) => raw.parse(),
        None => Ok(config.algorithm()),
    }
}

/// Root command (§6.1): resolve the two trees to compare per the auto-ref
/// rules, run the full pipeline, format, and pick an exit code.
fn run_root(cli: &Cli) -> Result<i32, Error> {
    let repo_root = repo::discover_repo_root(&cli.repo)?;
    let config = IccheckConfig::load(&repo_root)?;

    let (from_spec, to_spec) =
        repo::resolve_auto_refs(&repo_root, cli.from.as_deref(), cli.to.as_deref())?;
    tracing::info!(from = ?from_spec, to = ?to_spec, "resolved comparison");

    let from_tree = repo::build_tree(&repo_root, &from_spec)?;
    let to_tree = build_to_tree(&repo_root, &to_spec, from_tree.as_ref())?;

    let matcher = read_matcher_rules(&repo_root, cli.disable_default_ignore, &cli.ignore, &[])?;
    let algorithm = load_algorithm(cli, &config)?;
    let options = SearchOptions { fleccs: config.fleccs_options(), ncdsearch: config.ncdsearch_options() };
    let cancel = CancellationToken::with_timeout(Duration::from_secs(cli.timeout_seconds));

    let sets = search::search(&cancel, algorithm, from_tree.as_ref(), to_tree.as_ref(), &matcher, &options)?;
    let finding_count = reportable(&sets).count();
    tracing::info!(clone_sets = sets.len(), findings = finding_count, "analysis complete");

    print!("{}", render(cli.format, &sets, &repo_root));

    if finding_count > 0 && cli.fail_code != 0 {
        Ok(cli.fail_code)
    } else {
        Ok(0)
    }
}

/// Builds the `to` tree, carrying over the `from` tree's file listing as
/// protected paths when `to` is the working tree — per the tree abstraction
/// invariant, a file present in the base commit must never look deleted
/// just because it is gitignored in the worktree.
fn build_to_tree(
    repo_root: &PathBuf,
    to_spec: &TreeSpec,
    from_tree: &dyn Tree,
) -> Result<Box<dyn Tree>, Error> {
    match to_spec {
        TreeSpec::Worktree => {
            let protected = from_tree.list_files()?;
            Ok(Box::new(WorkingTree::new(repo_root).with_protected_paths(protected)))
        }
        TreeSpec::Rev(_) => repo::build_tree(repo_root, to_spec),
    }
}

fn render(format: OutputFormat, sets: &[iccheck_core::CloneSet], repo_root: &std::path::Path) -> String {
    match format {
        OutputFormat::Console => format::render_console(sets, repo_root),
        OutputFormat::Json => format::render_json(sets),
        OutputFormat::Github => format::render_github(sets),
    }
}

/// `search` subcommand (§6.1): a single fragment, no diff, no changed/missing
/// partition — just the deduped clones found throughout the ref's tree.
fn run_search(
    cli: &Cli,
    r#ref: &str,
    file: &str,
    start_line: usize,
    end_line: usize,
) -> Result<i32, Error> {
    let repo_root = repo::discover_repo_root(&cli.repo)?;
    let config = IccheckConfig::load(&repo_root)?;
    let tree_spec = TreeSpec::parse(r#ref);
    let tree = repo::build_tree(&repo_root, &tree_spec)?;

    let matcher = read_matcher_rules(&repo_root, cli.disable_default_ignore, &cli.ignore, &[])?;
    let algorithm = load_algorithm(cli, &config)?;
    let cancel = CancellationToken::with_timeout(Duration::from_secs(cli.timeout_seconds));
    let query = Source::new(file.to_string(), start_line, end_line);

    let raw = match algorithm {
        Algorithm::Fleccs => fleccs::search(
            tree.as_ref(),
            &[query],
            tree.as_ref(),
            &matcher,
            &config.fleccs_options(),
            &cancel,
        )?,
        Algorithm::Ncdsearch => ncdsearch::search(
            tree.as_ref(),
            &[query],
            tree.as_ref(),
            &matcher,
            &config.ncdsearch_options(),
            &cancel,
        )?,
    };
    let clones = dedupe_coalesce(raw);

    match cli.format {
        OutputFormat::Json => {
            for clone in &clones {
                println!(
                    "{}",
                    serde_json::json!({
                        "filename": clone.filename,
                        "start_l": clone.start_line,
                        "end_l": clone.end_line,
                        "distance": clone.distance,
                    })
                );
            }
        }
        _ => {
            for clone in &clones {
                println!(
                    "{} L{}-{} distance={:.3}",
                    clone.filename, clone.start_line, clone.end_line, clone.distance
                );
            }
        }
    }
    Ok(0)
}
