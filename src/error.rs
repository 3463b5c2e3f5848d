/// Crate-level error types for relink diagnostics.
use std::path::PathBuf;

use crate::types::ReferenceStatus;

/// All errors in relink carry enough context to produce a useful diagnostic
/// without a debugger. Each variant names the file, reference, or reason for failure.
///
/// Per-reference failures during scan and search never surface here: they are
/// recorded on the reference as `Failed`. Only document-level failures do.
#[allow(clippy::error_impl_error, reason = "crate-internal error type in binary")]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Copying the original document to its backup failed; the original is untouched.
    #[error("backup failed: {}: {source}", path.display())]
    BackupFailed {
        /// Backup path that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The caller cancelled the operation. Not a failure.
    #[error("cancelled")]
    Cancelled,

    /// The document to scan or save does not exist on disk.
    #[error("document not found: {}", path.display())]
    DocumentNotFound {
        /// Path to the missing document.
        path: PathBuf,
    },

    /// A state change that the resolution state machine does not allow.
    #[error("reference #{index}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Status the reference currently holds.
        from: ReferenceStatus,
        /// Index of the reference.
        index: usize,
        /// Status that was requested.
        to: ReferenceStatus,
    },

    /// Underlying I/O error from the filesystem.
    #[error("io: {0}")]
    Io(
        /// The wrapped I/O error.
        #[from]
        std::io::Error,
    ),

    /// JSON report serialization failed.
    #[error("json: {0}")]
    Json(
        /// The wrapped serde_json error.
        #[from]
        serde_json::Error,
    ),

    /// The chosen path is not one of the reference's candidates.
    #[error("reference #{index}: `{}` is not a candidate", path.display())]
    NotACandidate {
        /// Index of the reference.
        index: usize,
        /// Path the user tried to select.
        path: PathBuf,
    },

    /// The document is not a valid tree document.
    #[error("parse failed: {}: {reason}", file.display())]
    ParseFailed {
        /// File that failed to parse.
        file: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// A path substitution could not be applied to the original text.
    #[error("patch failed for reference #{index}: {reason}")]
    PatchFailed {
        /// Index of the reference whose token could not be replaced.
        index: usize,
        /// Description of the mismatch.
        reason: String,
    },

    /// TOML deserialization failed.
    #[error("toml deserialize: {0}")]
    TomlDe(
        /// The wrapped TOML deserialization error.
        #[from]
        toml::de::Error,
    ),

    /// No reference with this index exists in the document.
    #[error("unknown reference #{index}")]
    UnknownReference {
        /// Index that was looked up.
        index: usize,
    },

    /// The root to remove is not configured.
    #[error("unknown root: `{root}`")]
    UnknownRoot {
        /// Root directory as given by the user.
        root: String,
    },

    /// Writing the patched document failed; the backup is still on disk.
    #[error("write failed: {}: {source}", path.display())]
    WriteFailed {
        /// Document path that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
