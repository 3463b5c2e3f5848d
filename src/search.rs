//! Candidate search: walk root directories for files whose name matches a
//! missing reference, with a per-session cache and cooperative cancellation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use walkdir::WalkDir;

use crate::error::Error;
use crate::types::{ExecutionResult, Progress, ReferenceStatus, ReferenceUpdate, SearchOutcome, SearchRequest};

/// Cooperative cancellation flag shared by a caller and one search invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Fail with `Error::Cancelled` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` once `cancel` has been called.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        return Ok(());
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        return self.0.load(Ordering::SeqCst);
    }
}

/// Counts from walking one root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Directories (or entries) that could not be enumerated and were skipped.
    pub failures: usize,
}

/// Recursive file enumeration over one root.
pub trait Walker {
    /// Call `visit` with the path of every regular file under `root`.
    /// Enumeration failures are skipped and counted, never propagated.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if `cancel` fires mid-walk. Other errors
    /// fail the reference being searched, not the whole search.
    fn walk(&self, root: &Path, cancel: &CancelToken, visit: &mut dyn FnMut(&Path)) -> Result<WalkStats, Error>;
}

/// Filesystem walker backed by `walkdir`. Entries are visited in file-name
/// order so candidate lists are stable between runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWalker;

impl Walker for FsWalker {
    fn walk(&self, root: &Path, cancel: &CancelToken, visit: &mut dyn FnMut(&Path)) -> Result<WalkStats, Error> {
        let mut stats = WalkStats::default();

        for entry in WalkDir::new(root).sort_by_file_name() {
            cancel.check()?;
            let entry = match entry {
                Err(e) => {
                    stats.failures = stats.failures.saturating_add(1);
                    let at = e.path().unwrap_or(root).display().to_string();
                    tracing::warn!(root = %root.display(), path = %at, error = %e, "skipping unreadable directory");
                    continue;
                },
                Ok(entry) => entry,
            };

            let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file());
            if is_file {
                visit(entry.path());
            }
        }

        return Ok(stats);
    }
}

/// File-name to candidate-path map for one search session. Keys are lowercased;
/// values keep the order in which the first walk discovered them.
#[derive(Debug, Default)]
pub struct SearchCache {
    /// Candidates by lowercased file name.
    entries: HashMap<String, Vec<PathBuf>>,
}

impl SearchCache {
    /// Cached candidates for a file name, if it was walked for already.
    pub fn get(&self, file_name: &str) -> Option<&Vec<PathBuf>> {
        return self.entries.get(&file_name.to_lowercase());
    }

    /// Remember the candidates found for a file name.
    pub fn insert(&mut self, file_name: &str, candidates: Vec<PathBuf>) {
        self.entries.insert(file_name.to_lowercase(), candidates);
    }
}

/// Make roots absolute against the working directory, then drop blank roots
/// and case-insensitive duplicates, keeping first-seen order. Candidates are
/// written into documents that live elsewhere, so they must not be relative.
pub fn normalize_roots(roots: &[String]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for root in roots {
        let trimmed = root.trim();
        if trimmed.is_empty() {
            continue;
        }
        let absolute = std::path::absolute(trimmed).unwrap_or_else(|e| {
            tracing::warn!(root = trimmed, error = %e, "could not make search root absolute");
            return PathBuf::from(trimmed);
        });
        if seen.insert(absolute.to_string_lossy().to_lowercase()) {
            out.push(absolute);
        }
    }
    return out;
}

/// Map a candidate count onto an outcome: none is not-found, one resolves
/// automatically, several need a human.
pub fn classify(mut candidates: Vec<PathBuf>) -> SearchOutcome {
    return match candidates.len() {
        0 => SearchOutcome::NotFound,
        1 => candidates.pop().map_or(SearchOutcome::NotFound, SearchOutcome::Resolved),
        _ => SearchOutcome::Ambiguous(candidates),
    };
}

/// Whether the engine should look for this reference at all.
const fn is_searchable(status: ReferenceStatus) -> bool {
    return matches!(
        status,
        ReferenceStatus::Missing | ReferenceStatus::Ambiguous | ReferenceStatus::NotFound | ReferenceStatus::Failed
    );
}

/// One search invocation: roots, walker and the cache they fill.
struct SearchSession<'a> {
    /// Candidate lists already walked for in this invocation.
    cache: SearchCache,
    /// Cancellation flag checked before each reference and each walked entry.
    cancel: &'a CancelToken,
    /// Normalized search roots.
    roots: Vec<PathBuf>,
    /// Directory failures tallied across all walks.
    walk_failures: usize,
    /// The enumeration strategy.
    walker: &'a dyn Walker,
    /// Root walks performed.
    walks: usize,
}

impl SearchSession<'_> {
    /// Candidates for one file name, from cache or by walking every root.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` on cancellation, or any other walker error
    /// for the caller to record against the reference.
    fn candidates_for(&mut self, file_name: &str) -> Result<Vec<PathBuf>, Error> {
        if let Some(hit) = self.cache.get(file_name) {
            tracing::debug!(file_name, count = hit.len(), "candidate cache hit");
            return Ok(hit.clone());
        }

        let wanted = file_name.to_lowercase();
        let mut found: Vec<PathBuf> = Vec::new();

        for root in &self.roots {
            self.cancel.check()?;
            self.walks = self.walks.saturating_add(1);
            let stats = self.walker.walk(root, self.cancel, &mut |path: &Path| {
                let matches = path
                    .file_name()
                    .is_some_and(|name| return name.to_string_lossy().to_lowercase() == wanted);
                if matches && !found.iter().any(|f| return f == path) {
                    found.push(path.to_path_buf());
                }
            })?;
            self.walk_failures = self.walk_failures.saturating_add(stats.failures);
        }

        self.cache.insert(file_name, found.clone());
        return Ok(found);
    }

    /// Resolve one request into an outcome. Only cancellation escapes;
    /// every other failure becomes a `Failed` outcome.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` on cancellation.
    fn resolve(&mut self, request: &SearchRequest) -> Result<SearchOutcome, Error> {
        if request.file_name.trim().is_empty() {
            return Ok(SearchOutcome::Failed("reference has no file name".to_string()));
        }
        return match self.candidates_for(&request.file_name) {
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => Ok(SearchOutcome::Failed(e.to_string())),
            Ok(candidates) => Ok(classify(candidates)),
        };
    }
}

/// Search `roots` for every searchable request and classify the results.
///
/// `on_progress` is called once per processed reference, in order, with the
/// update that was just computed; the last call has `done == total`. With
/// nothing to search, it is called once with `0 / 0` and no update.
/// Requests whose status is `Existing` or `Updated` are skipped and counted.
///
/// # Errors
///
/// Returns `Error::Cancelled` if `cancel` fires. Updates already reported
/// through `on_progress` stand; no further ones follow.
pub fn search(
    requests: &[SearchRequest],
    roots: &[String],
    walker: &dyn Walker,
    cancel: &CancelToken,
    on_progress: &mut dyn FnMut(&Progress, Option<&ReferenceUpdate>),
) -> Result<ExecutionResult, Error> {
    let mut session = SearchSession {
        cache: SearchCache::default(),
        cancel,
        roots: normalize_roots(roots),
        walk_failures: 0,
        walker,
        walks: 0,
    };
    let mut result = ExecutionResult {
        scanned: requests.len(),
        ..ExecutionResult::default()
    };

    let pending: Vec<&SearchRequest> = requests.iter().filter(|r| return is_searchable(r.status)).collect();
    result.skipped_existing = requests.len().saturating_sub(pending.len());
    result.missing_at_entry = pending.iter().filter(|r| return r.status == ReferenceStatus::Missing).count();
    let total = pending.len();

    tracing::info!(references = total, roots = session.roots.len(), "search started");

    for (position, request) in pending.into_iter().enumerate() {
        cancel.check()?;
        let outcome = session.resolve(request)?;
        tally_outcome(&mut result, &outcome);
        if let SearchOutcome::Failed(reason) = &outcome {
            tracing::warn!(index = request.index, file_name = %request.file_name, reason = %reason, "search failed for reference");
        }

        let update = ReferenceUpdate {
            index: request.index,
            outcome,
        };
        let progress = Progress {
            current: request.file_name.clone(),
            done: position.saturating_add(1),
            total,
        };
        on_progress(&progress, Some(&update));
        result.updates.push(update);
    }
    if total == 0 {
        on_progress(&Progress::default(), None);
    }

    result.walk_failures = session.walk_failures;
    result.walks = session.walks;
    tracing::info!(
        updated = result.updated,
        ambiguous = result.ambiguous,
        not_found = result.not_found,
        failed = result.failed,
        walk_failures = result.walk_failures,
        "search complete"
    );
    return Ok(result);
}

/// Count one outcome in the aggregate result.
fn tally_outcome(result: &mut ExecutionResult, outcome: &SearchOutcome) {
    let counter = match outcome {
        SearchOutcome::Ambiguous(_) => &mut result.ambiguous,
        SearchOutcome::Failed(_) => &mut result.failed,
        SearchOutcome::NotFound => &mut result.not_found,
        SearchOutcome::Resolved(_) => &mut result.updated,
    };
    *counter = counter.saturating_add(1);
}

/// Message from a background search to the coordinating thread.
#[derive(Debug)]
pub enum SearchEvent {
    /// The search ended, successfully or not. Always the last event.
    Finished(Result<ExecutionResult, Error>),
    /// One reference was processed.
    Processed {
        /// Position in the run.
        progress: Progress,
        /// The computed update, to be applied by the coordinator. `None` only
        /// for the terminal event of a run with nothing to search.
        update: Option<ReferenceUpdate>,
    },
}

/// A search running on a worker thread.
pub struct SearchHandle {
    /// Events in emission order, ending with `SearchEvent::Finished`.
    pub events: Receiver<SearchEvent>,
    /// The worker thread.
    worker: JoinHandle<()>,
}

impl SearchHandle {
    /// Wait for the worker thread to exit.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the worker panicked.
    pub fn join(self) -> Result<(), Error> {
        return self
            .worker
            .join()
            .map_err(|_panic| return Error::Io(std::io::Error::other("search worker panicked")));
    }
}

/// Run `search` on a worker thread, streaming events back over a channel.
/// The worker owns its inputs and its cache; it never sees session state.
pub fn spawn(
    requests: Vec<SearchRequest>,
    roots: Vec<String>,
    walker: Arc<dyn Walker + Send + Sync>,
    cancel: CancelToken,
) -> SearchHandle {
    let (tx, rx): (Sender<SearchEvent>, Receiver<SearchEvent>) = crossbeam_channel::unbounded();

    let worker = std::thread::spawn(move || {
        let result = search(&requests, &roots, walker.as_ref(), &cancel, &mut |progress, update| {
            let _ = tx.send(SearchEvent::Processed {
                progress: progress.clone(),
                update: update.cloned(),
            });
        });
        let _ = tx.send(SearchEvent::Finished(result));
    });

    return SearchHandle { events: rx, worker };
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, reason = "tests assert on known shapes")]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Wraps the real walker and records every root it was asked to walk.
    #[derive(Default)]
    struct CountingWalker {
        walked: Mutex<Vec<PathBuf>>,
    }

    impl Walker for CountingWalker {
        fn walk(&self, root: &Path, cancel: &CancelToken, visit: &mut dyn FnMut(&Path)) -> Result<WalkStats, Error> {
            self.walked.lock().unwrap().push(root.to_path_buf());
            return FsWalker.walk(root, cancel, visit);
        }
    }

    /// Fails every walk with a non-cancellation error.
    struct BrokenWalker;

    impl Walker for BrokenWalker {
        fn walk(&self, _root: &Path, _cancel: &CancelToken, _visit: &mut dyn FnMut(&Path)) -> Result<WalkStats, Error> {
            return Err(Error::Io(std::io::Error::other("device unplugged")));
        }
    }

    fn request(index: usize, file_name: &str) -> SearchRequest {
        return SearchRequest {
            file_name: file_name.to_string(),
            index,
            status: ReferenceStatus::Missing,
        };
    }

    fn root_str(path: &Path) -> String {
        return path.display().to_string();
    }

    fn run(requests: &[SearchRequest], roots: &[String], walker: &dyn Walker) -> Result<ExecutionResult, Error> {
        return search(requests, roots, walker, &CancelToken::default(), &mut |_, _| {});
    }

    #[test]
    fn single_match_resolves_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("deep/er")).unwrap();
        let file = dir.path().join("deep/er/A.PNG");
        std::fs::write(&file, b"x").unwrap();

        let result = run(&[request(0, "a.png")], &[root_str(dir.path())], &FsWalker).unwrap();
        assert_eq!(result.updates[0].outcome, SearchOutcome::Resolved(file));
        assert_eq!(result.updated, 1);
    }

    #[test]
    fn two_matches_are_ambiguous() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.png"), b"x").unwrap();
        std::fs::write(second.path().join("a.png"), b"y").unwrap();

        let roots = vec![root_str(first.path()), root_str(second.path())];
        let result = run(&[request(0, "a.png")], &roots, &FsWalker).unwrap();
        let SearchOutcome::Ambiguous(candidates) = &result.updates[0].outcome else {
            panic!("expected ambiguous, got {:?}", result.updates[0].outcome);
        };
        assert_eq!(candidates.len(), 2);
        assert_eq!(result.ambiguous, 1);
    }

    #[test]
    fn no_match_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"x").unwrap();

        let result = run(&[request(0, "a.png")], &[root_str(dir.path())], &FsWalker).unwrap();
        assert_eq!(result.updates[0].outcome, SearchOutcome::NotFound);
        assert_eq!(result.not_found, 1);
    }

    #[test]
    fn unreadable_root_is_skipped_and_counted() {
        let good = tempfile::tempdir().unwrap();
        let file = good.path().join("a.png");
        std::fs::write(&file, b"x").unwrap();
        let missing_root = good.path().join("does-not-exist");

        let roots = vec![root_str(&missing_root), root_str(good.path())];
        let result = run(&[request(0, "a.png")], &roots, &FsWalker).unwrap();
        assert_eq!(result.updates[0].outcome, SearchOutcome::Resolved(file));
        assert_eq!(result.walk_failures, 1);
    }

    #[test]
    fn shared_file_name_walks_each_root_once() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.png"), b"x").unwrap();

        let walker = CountingWalker::default();
        let roots = vec![root_str(first.path()), root_str(second.path())];
        let result = run(&[request(0, "a.png"), request(1, "A.png")], &roots, &walker).unwrap();

        assert_eq!(walker.walked.lock().unwrap().len(), 2);
        assert_eq!(result.walks, 2);
        assert_eq!(result.updates[0].outcome, result.updates[1].outcome);
    }

    #[test]
    fn walker_error_fails_only_that_reference() {
        let result = run(&[request(0, "a.png"), request(1, "b.png")], &["/somewhere".to_string()], &BrokenWalker).unwrap();
        assert_eq!(result.failed, 2);
        assert!(matches!(&result.updates[1].outcome, SearchOutcome::Failed(msg) if msg.contains("device unplugged")));
    }

    #[test]
    fn existing_references_are_skipped() {
        let mut existing = request(0, "a.png");
        existing.status = ReferenceStatus::Existing;
        let result = run(&[existing, request(1, "b.png")], &[], &FsWalker).unwrap();
        assert_eq!(result.skipped_existing, 1);
        assert_eq!(result.missing_at_entry, 1);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0].index, 1);
    }

    #[test]
    fn progress_is_ordered_and_ends_at_total() {
        let mut seen = Vec::new();
        let requests = [request(0, "a.png"), request(1, "b.png"), request(2, "c.png")];
        search(&requests, &[], &FsWalker, &CancelToken::default(), &mut |p, _| seen.push(p.clone())).unwrap();
        let done: Vec<usize> = seen.iter().map(|p| p.done).collect();
        assert_eq!(done, vec![1, 2, 3]);
        assert!(seen.iter().all(|p| p.total == 3));
        assert_eq!(seen[2].current, "c.png");
    }

    #[test]
    fn cancellation_stops_before_the_next_reference() {
        let cancel = CancelToken::default();
        let events = AtomicUsize::new(0);
        let requests = [request(0, "a.png"), request(1, "b.png"), request(2, "c.png")];
        let result = search(&requests, &[], &FsWalker, &cancel, &mut |_, _| {
            events.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_interrupts_a_walk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.png"), b"x").unwrap();
        let cancel = CancelToken::default();
        cancel.cancel();
        let outcome = FsWalker.walk(dir.path(), &cancel, &mut |_| {});
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }

    #[test]
    fn roots_are_trimmed_and_deduplicated() {
        let roots = vec![" /Media ".to_string(), String::new(), "/media".to_string(), "/other".to_string()];
        assert_eq!(normalize_roots(&roots), vec![PathBuf::from("/Media"), PathBuf::from("/other")]);
    }

    #[test]
    fn relative_roots_become_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let roots = vec!["lib".to_string(), cwd.join("lib").display().to_string(), ".".to_string()];
        assert_eq!(normalize_roots(&roots), vec![cwd.join("lib"), cwd]);
    }

    #[cfg(unix)]
    #[test]
    fn locked_subdirectory_does_not_stop_the_walk() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("a_locked");
        let open = dir.path().join("b_open");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::create_dir_all(&open).unwrap();
        std::fs::write(locked.join("x.png"), b"x").unwrap();
        let file = open.join("x.png");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through mode 000; nothing to assert then.
        let still_readable = std::fs::read_dir(&locked).is_ok();
        let result = run(&[request(0, "x.png")], &[root_str(dir.path())], &FsWalker);
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        if still_readable {
            return;
        }

        let result = result.unwrap();
        assert_eq!(result.updates[0].outcome, SearchOutcome::Resolved(file));
        assert_eq!(result.walk_failures, 1);
    }

    #[test]
    fn empty_run_still_reports_completion() {
        let mut existing = request(0, "a.png");
        existing.status = ReferenceStatus::Existing;
        let mut seen = Vec::new();
        search(&[existing], &[], &FsWalker, &CancelToken::default(), &mut |p, update| {
            seen.push((p.clone(), update.is_some()));
        })
        .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!((seen[0].0.done, seen[0].0.total, seen[0].1), (0, 0, false));
    }

    #[test]
    fn spawned_search_streams_events_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();

        let handle = spawn(
            vec![request(0, "a.png"), request(1, "b.png")],
            vec![root_str(dir.path())],
            Arc::new(FsWalker),
            CancelToken::default(),
        );
        let events: Vec<SearchEvent> = handle.events.iter().collect();
        handle.join().unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], SearchEvent::Finished(Ok(r)) if r.updates.len() == 2));
    }
}
