//! Core CLI commands for relink: scan, search, fix.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config;
use crate::error;
use crate::patch::{self, SaveOutcome};
use crate::scanner;
use crate::search::{self, CancelToken, FsWalker, SearchEvent};
use crate::session::{Session, StatusCounts};
use crate::types::{ExecutionResult, Reference, ReferenceStatus, ScanSummary};

/// Minimum gap between progress lines on stderr.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// How command output is rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Machine-readable JSON.
    Json,
    /// Human-readable lines.
    Text,
}

/// Options shared by `search` and `fix`.
pub struct SearchOptions {
    /// Also search references that failed earlier.
    pub retry_failed: bool,
    /// Roots from the command line, searched after the configured ones.
    pub roots: Vec<String>,
}

/// JSON body for `scan`.
#[derive(Serialize)]
struct ScanReport<'a> {
    document: &'a Path,
    references: &'a [Reference],
    summary: &'a ScanSummary,
}

/// JSON body for `search` and `fix`.
#[derive(Serialize)]
struct ResolutionReport<'a> {
    counts: StatusCounts,
    document: &'a Path,
    references: &'a [Reference],
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<&'a SaveOutcome>,
    search: Option<SearchTotals>,
}

/// Aggregate search counts without the per-reference updates, which the
/// references already reflect.
#[derive(Serialize)]
struct SearchTotals {
    ambiguous: usize,
    failed: usize,
    missing_at_entry: usize,
    not_found: usize,
    scanned: usize,
    skipped_existing: usize,
    updated: usize,
    walk_failures: usize,
}

impl From<&ExecutionResult> for SearchTotals {
    fn from(result: &ExecutionResult) -> Self {
        return Self {
            ambiguous: result.ambiguous,
            failed: result.failed,
            missing_at_entry: result.missing_at_entry,
            not_found: result.not_found,
            scanned: result.scanned,
            skipped_existing: result.skipped_existing,
            updated: result.updated,
            walk_failures: result.walk_failures,
        };
    }
}

/// Exit 1 while anything still needs attention, 0 otherwise.
fn exit_code_for(references: &[Reference]) -> ExitCode {
    if references.iter().any(|r| return r.status.is_unresolved()) {
        return ExitCode::from(1);
    }
    return ExitCode::SUCCESS;
}

/// Scan, search, apply picks, and save the document.
/// With `dry_run`, prints what would change and writes nothing.
///
/// # Errors
///
/// Returns errors from scanning, applying picks, or saving.
pub fn fix(
    document: &str,
    options: SearchOptions,
    picks: &[(usize, PathBuf)],
    dry_run: bool,
    format: OutputFormat,
) -> Result<ExitCode, error::Error> {
    let (mut session, roots) = open_session(document, options.roots)?;
    let result = run_search(&mut session, roots, options.retry_failed, &CancelToken::default())?;

    for (index, path) in picks {
        session.select(*index, path)?;
    }

    let exit = exit_code_for(session.references());
    let document_path = session.context().source_path.clone();

    if dry_run {
        print_resolution(&session, result.as_ref(), format)?;
        if format == OutputFormat::Text {
            print_pending_changes(&session);
        }
        return Ok(exit);
    }

    let counts = session.counts();
    let references = session.references().to_vec();
    let saved = patch::save(session.into_context(), &CancelToken::default())?;

    match format {
        OutputFormat::Json => {
            let report = ResolutionReport {
                counts,
                document: &document_path,
                references: &references,
                saved: Some(&saved),
                search: result.as_ref().map(SearchTotals::from),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        OutputFormat::Text => {
            for reference in &references {
                print_reference_line(reference);
            }
            println!();
            print_counts(&counts);
            match &saved.backup_path {
                None => println!("Nothing to save."),
                Some(backup) => {
                    println!("Updated {} references in {}", saved.replaced, document_path.display());
                    println!("Backup written to {}", backup.display());
                },
            }
        },
    }

    return Ok(exit);
}

/// Load config, scan the document, and merge configured and command-line roots.
///
/// # Errors
///
/// Returns errors from config loading or scanning.
fn open_session(document: &str, cli_roots: Vec<String>) -> Result<(Session, Vec<String>), error::Error> {
    let config = config::Config::load(Path::new("."))?;
    let (context, _) = scanner::scan(Path::new(document), &config)?;

    let mut roots = config.roots;
    roots.extend(cli_roots);
    return Ok((Session::new(context), roots));
}

/// Print each reference with its candidates, then counts.
///
/// # Errors
///
/// Returns `Error::Json` if JSON serialization fails.
fn print_resolution(
    session: &Session,
    result: Option<&ExecutionResult>,
    format: OutputFormat,
) -> Result<(), error::Error> {
    match format {
        OutputFormat::Json => {
            let report = ResolutionReport {
                counts: session.counts(),
                document: &session.context().source_path,
                references: session.references(),
                saved: None,
                search: result.map(SearchTotals::from),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        OutputFormat::Text => {
            for reference in session.references() {
                print_reference_line(reference);
            }
            println!();
            print_counts(&session.counts());
            let walk_failures = result.map_or(0, |r| return r.walk_failures);
            if walk_failures > 0 {
                println!("{walk_failures} directories could not be read and were skipped");
            }
        },
    }
    return Ok(());
}

/// One-line totals per status.
fn print_counts(counts: &StatusCounts) {
    println!(
        "{} existing, {} updated, {} ambiguous, {} not found, {} missing, {} failed",
        counts.existing, counts.updated, counts.ambiguous, counts.not_found, counts.missing, counts.failed
    );
}

/// Show the token substitutions a save would make.
fn print_pending_changes(session: &Session) {
    let pending: Vec<&Reference> = session.accepted().collect();
    if pending.is_empty() {
        println!("Nothing to save.");
        return;
    }
    println!("Would update {} references:", pending.len());
    for reference in pending {
        if let Some(selected) = &reference.selected_candidate {
            println!("  #{}  {} -> {}", reference.index, reference.original_path, selected.display());
        }
    }
    return;
}

/// Print a reference as `STATUS  #index  path  (type)` plus any candidates.
fn print_reference_line(reference: &Reference) {
    let label = match reference.status {
        ReferenceStatus::Ambiguous => "AMBIGUOUS",
        ReferenceStatus::Existing => "EXISTING ",
        ReferenceStatus::Failed => "FAILED   ",
        ReferenceStatus::Missing => "MISSING  ",
        ReferenceStatus::NotFound => "NOTFOUND ",
        ReferenceStatus::Updated => "UPDATED  ",
    };
    let hint = if reference.type_hint.is_empty() {
        String::new()
    } else {
        format!("  ({})", reference.type_hint)
    };
    println!("{label}  #{}  {}{hint}", reference.index, reference.original_path);

    match reference.status {
        ReferenceStatus::Ambiguous => {
            for candidate in &reference.candidates {
                println!("             candidate: {}", candidate.display());
            }
        },
        ReferenceStatus::Failed => println!("             {}", reference.message),
        ReferenceStatus::Updated => {
            if let Some(selected) = &reference.selected_candidate {
                println!("             -> {}", selected.display());
            }
        },
        ReferenceStatus::Existing | ReferenceStatus::Missing | ReferenceStatus::NotFound => {},
    }
    return;
}

/// Run the candidate search on a worker thread and apply its updates here,
/// on the coordinating thread, as they arrive. Returns `None` when there was
/// nothing to search for or no roots to search in.
///
/// # Errors
///
/// Returns `Error::Cancelled` if cancelled (updates received before that are
/// kept), or errors applying updates to the session.
fn run_search(
    session: &mut Session,
    roots: Vec<String>,
    retry_failed: bool,
    cancel: &CancelToken,
) -> Result<Option<ExecutionResult>, error::Error> {
    let requests = session.searchable(retry_failed);
    if requests.is_empty() {
        return Ok(None);
    }
    if search::normalize_roots(&roots).is_empty() {
        eprintln!("warning: no search roots given; pass --root or run `relink roots add <dir>`");
        return Ok(None);
    }

    let handle = search::spawn(requests, roots, Arc::new(FsWalker), cancel.clone());
    let mut last_report: Option<Instant> = None;
    let mut finished = None;
    let mut rejected = None;

    for event in &handle.events {
        match event {
            SearchEvent::Finished(result) => {
                finished = Some(result);
                break;
            },
            SearchEvent::Processed { progress, update } => {
                if let Some(update) = &update
                    && let Err(e) = session.apply(update)
                {
                    cancel.cancel();
                    rejected = Some(e);
                    break;
                }
                let due = last_report.is_none_or(|at| return at.elapsed() >= PROGRESS_INTERVAL);
                if due || progress.done == progress.total {
                    eprintln!("search: {}/{} {}", progress.done, progress.total, progress.current);
                    last_report = Some(Instant::now());
                }
            },
        }
    }
    handle.join()?;
    if let Some(e) = rejected {
        return Err(e);
    }

    let Some(result) = finished else {
        return Err(error::Error::Io(std::io::Error::other("search ended without a result")));
    };
    return result.map(Some);
}

/// Scan a document and report every reference with its status.
///
/// # Errors
///
/// Returns errors from config loading or scanning.
pub fn scan(document: &str, format: OutputFormat) -> Result<ExitCode, error::Error> {
    let config = config::Config::load(Path::new("."))?;
    let (context, summary) = scanner::scan(Path::new(document), &config)?;

    match format {
        OutputFormat::Json => {
            let report = ScanReport {
                document: &context.source_path,
                references: &context.references,
                summary: &summary,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
        OutputFormat::Text => {
            for reference in &context.references {
                print_reference_line(reference);
            }
            println!();
            println!(
                "{} references: {} existing, {} missing, {} failed",
                summary.total, summary.existing, summary.missing, summary.failed
            );
        },
    }

    return Ok(exit_code_for(&context.references));
}

/// Scan and search without writing anything.
///
/// # Errors
///
/// Returns errors from scanning or searching.
pub fn search(document: &str, options: SearchOptions, format: OutputFormat) -> Result<ExitCode, error::Error> {
    let (mut session, roots) = open_session(document, options.roots)?;
    let result = run_search(&mut session, roots, options.retry_failed, &CancelToken::default())?;

    print_resolution(&session, result.as_ref(), format)?;
    return Ok(exit_code_for(session.references()));
}
