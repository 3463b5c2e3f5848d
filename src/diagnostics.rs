use crate::error::Error;
use crate::types::ReferenceStatus;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Render an error as valid markdown with bold headings and print to stderr.
pub fn print_error(e: &Error) {
    let md = render_error(e);
    for line in md.lines() {
        if line.starts_with('#') {
            eprintln!("{BOLD}{line}{RESET}");
        } else {
            eprintln!("{line}");
        }
    }
}

/// Render an error as a structured markdown diagnostic.
///
/// Each variant produces a block with what happened and, where there is
/// something the user can do, how to fix it.
pub fn render_error(e: &Error) -> String {
    return match e {
        Error::BackupFailed { path, source } => render_backup_failed(path, source),
        Error::DocumentNotFound { path } => render_document_not_found(path),
        Error::InvalidTransition { index, from, to } => render_invalid_transition(*index, *from, *to),
        Error::NotACandidate { index, path } => render_not_a_candidate(*index, path),
        Error::PatchFailed { index, reason } => render_patch_failed(*index, reason),
        Error::UnknownRoot { root } => render_unknown_root(root),
        Error::WriteFailed { path, source } => render_write_failed(path, source),
        _ => render_generic(e),
    };
}

fn render_generic(e: &Error) -> String {
    return match e {
        Error::Cancelled => "\
# Cancelled

The operation was cancelled. The document on disk was not modified.
"
        .to_string(),

        Error::Io(err) => format!("\
# Error: I/O

{err}
"),

        Error::Json(err) => format!("\
# Error: JSON Output

{err}
"),

        Error::ParseFailed { file, reason } => format!("\
# Error: Parse Failed

Could not parse `{}`: {reason}

## Fix

The document must be valid UTF-8 JSON. Check that it was saved completely.
", file.display()),

        Error::TomlDe(err) => format!("\
# Error: Invalid TOML

{err}

## Fix

Correct the syntax in `.relink.toml`, or delete it to use the defaults.
"),

        Error::UnknownReference { index } => format!("\
# Error: Unknown Reference

The document has no reference #{index}.

## Fix

List the references and their indices:

    relink scan <document>
"),

        // Already handled in render_error, but need exhaustive match.
        _ => format!("\
# Error

{e}
"),
    };
}

fn render_backup_failed(path: &std::path::Path, source: &std::io::Error) -> String {
    return format!("\
# Error: Backup Failed

Could not write `{}`: {source}

The original document was not modified.

## Fix

Check free disk space and that the document's directory is writable.
", path.display());
}

fn render_document_not_found(path: &std::path::Path) -> String {
    return format!("\
# Error: Document Not Found

`{}` does not exist.
", path.display());
}

fn render_invalid_transition(index: usize, from: ReferenceStatus, to: ReferenceStatus) -> String {
    let hint = match from {
        ReferenceStatus::Existing => "The file it points to exists; there is nothing to relink.",
        ReferenceStatus::Updated => "A replacement was already chosen for it.",
        _ => "Only ambiguous references take a `--pick`.",
    };
    return format!("\
# Error: Invalid Status Change

Reference #{index} is `{from}` and cannot become `{to}`.

{hint}
");
}

fn render_not_a_candidate(index: usize, path: &std::path::Path) -> String {
    return format!("\
# Error: Not A Candidate

`{}` was not found by the search for reference #{index}.

## Fix

Pick one of the listed candidates:

    relink search <document> --root <dir>
", path.display());
}

fn render_patch_failed(index: usize, reason: &str) -> String {
    return format!("\
# Error: Patch Failed

Reference #{index}: {reason}

The document was not rewritten. If a backup was made it is still next to the document.

## Fix

The document may have changed since it was scanned. Run the fix again.
");
}

fn render_unknown_root(root: &str) -> String {
    return format!("\
# Error: Unknown Root

`{root}` is not in `.relink.toml`.

## Fix

List the configured roots:

    relink roots list
");
}

fn render_write_failed(path: &std::path::Path, source: &std::io::Error) -> String {
    return format!("\
# Error: Write Failed

Could not write `{}`: {source}

## Fix

The original content is in `{}.bak`.
", path.display(), path.display());
}
