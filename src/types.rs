/// Core domain types for relink references, scan results, and search results.
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// One file-path occurrence found in a document by the scanner.
/// `index`, `original_path` and `span` are fixed at scan time; only the
/// resolution fields change afterwards, and only through a `Session`.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    /// Full paths discovered by the search engine, in discovery order.
    pub candidates: Vec<PathBuf>,
    /// Extension of `file_name` without the leading dot, possibly empty.
    pub extension: String,
    /// Base name of `original_path`.
    pub file_name: String,
    /// Ordinal in discovery order. Join key between scan, search and save.
    pub index: usize,
    /// Human-readable explanation of the current status.
    pub message: String,
    /// The path string exactly as it appears in the document (decoded).
    pub original_path: String,
    /// Path chosen to replace `original_path`.
    pub selected_candidate: Option<PathBuf>,
    /// Byte range of the serialized string token (quotes included) in the raw text.
    #[serde(skip)]
    pub span: Range<usize>,
    /// Current resolution state.
    pub status: ReferenceStatus,
    /// Nearest enclosing type label, empty when none was found.
    pub type_hint: String,
}

impl Reference {
    /// Build a freshly discovered reference. Derives `file_name` and `extension`
    /// from the original path, accepting both `/` and `\` as separators.
    pub fn discovered(index: usize, original_path: String, type_hint: String, span: Range<usize>) -> Self {
        let file_name = file_name_of(&original_path).to_string();
        let extension = Path::new(&file_name)
            .extension()
            .map(|e| return e.to_string_lossy().into_owned())
            .unwrap_or_default();

        return Self {
            candidates: Vec::new(),
            extension,
            file_name,
            index,
            message: String::new(),
            original_path,
            selected_candidate: None,
            span,
            status: ReferenceStatus::Missing,
            type_hint,
        };
    }
}

/// Last path segment of a document path. Documents written on one platform
/// are relinked on another, so both separators count.
pub fn file_name_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    return trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
}

/// Resolution state of a single reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReferenceStatus {
    /// More than one candidate was found; the user must pick one.
    Ambiguous,
    /// The referenced file exists. Terminal.
    Existing,
    /// Scan or search failed for this reference; `message` holds the cause.
    Failed,
    /// The referenced file is absent and has not been searched for yet.
    Missing,
    /// A search ran and found nothing.
    NotFound,
    /// A replacement has been chosen and is waiting to be saved.
    Updated,
}

impl ReferenceStatus {
    /// Whether the reference still needs attention before the document is healthy.
    pub const fn is_unresolved(self) -> bool {
        return !matches!(self, Self::Existing | Self::Updated);
    }
}

impl fmt::Display for ReferenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ambiguous => "Ambiguous",
            Self::Existing => "Existing",
            Self::Failed => "Failed",
            Self::Missing => "Missing",
            Self::NotFound => "NotFound",
            Self::Updated => "Updated",
        };
        return f.write_str(label);
    }
}

/// Immutable snapshot of one scan: where the document lives, its exact bytes,
/// and the references found in it.
#[derive(Debug)]
pub struct DocumentContext {
    /// Raw document text, byte-for-byte as read (BOM included).
    pub raw: String,
    /// References in discovery order; `references[i].index == i`.
    pub references: Vec<Reference>,
    /// Path the document was read from.
    pub source_path: PathBuf,
}

/// Tallies produced by a scan, one count per initial status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// References whose file exists.
    pub existing: usize,
    /// References whose existence probe raised an I/O error.
    pub failed: usize,
    /// References whose file is absent.
    pub missing: usize,
    /// All references scanned.
    pub total: usize,
}

/// Owned snapshot of a reference handed to the search engine, so the engine
/// never touches session state from its worker thread.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Base name to match, compared case-insensitively.
    pub file_name: String,
    /// Index of the reference this request was made for.
    pub index: usize,
    /// Status of the reference when the search was started.
    pub status: ReferenceStatus,
}

impl From<&Reference> for SearchRequest {
    fn from(reference: &Reference) -> Self {
        return Self {
            file_name: reference.file_name.clone(),
            index: reference.index,
            status: reference.status,
        };
    }
}

/// What the search engine concluded for one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SearchOutcome {
    /// Two or more candidates; the user must choose.
    Ambiguous(Vec<PathBuf>),
    /// The search for this reference raised an error.
    Failed(String),
    /// No candidates under any root.
    NotFound,
    /// Exactly one candidate, selected automatically.
    Resolved(PathBuf),
}

impl SearchOutcome {
    /// The status a reference takes when this outcome is applied.
    pub const fn status(&self) -> ReferenceStatus {
        return match self {
            Self::Ambiguous(_) => ReferenceStatus::Ambiguous,
            Self::Failed(_) => ReferenceStatus::Failed,
            Self::NotFound => ReferenceStatus::NotFound,
            Self::Resolved(_) => ReferenceStatus::Updated,
        };
    }
}

/// A pending change for one reference, produced by the search engine and
/// applied by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceUpdate {
    /// Index of the reference to update.
    pub index: usize,
    /// The engine's conclusion.
    pub outcome: SearchOutcome,
}

/// Aggregate counts and per-reference updates from one search invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    /// References left with several candidates.
    pub ambiguous: usize,
    /// References whose search raised an error.
    pub failed: usize,
    /// References that were `Missing` when the search started.
    pub missing_at_entry: usize,
    /// References with no candidates.
    pub not_found: usize,
    /// References handed to the engine.
    pub scanned: usize,
    /// References skipped because they already exist or are already updated.
    pub skipped_existing: usize,
    /// References resolved to a single candidate.
    pub updated: usize,
    /// Per-reference updates in processing order.
    pub updates: Vec<ReferenceUpdate>,
    /// Directories that could not be enumerated during the walk.
    pub walk_failures: usize,
    /// Root walks performed (one per root per distinct file name).
    pub walks: usize,
}

/// Progress after one processed reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// File name of the reference just processed.
    pub current: String,
    /// References processed so far.
    pub done: usize,
    /// References to process in this invocation.
    pub total: usize,
}
