//! Patch writer: persist accepted replacements by splicing new path tokens
//! into the original text at their scanned byte spans.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::search::CancelToken;
use crate::types::{DocumentContext, Reference, ReferenceStatus};

/// What a save did on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SaveOutcome {
    /// Where the original was copied to, if anything was written.
    pub backup_path: Option<PathBuf>,
    /// Number of path tokens replaced.
    pub replaced: usize,
}

/// `<document>.bak`, next to the document.
pub fn backup_path_for(document: &Path) -> PathBuf {
    let mut name: OsString = document.as_os_str().to_owned();
    name.push(".bak");
    return PathBuf::from(name);
}

/// Persist every accepted replacement in `context` back to its document.
///
/// Consumes the context: a scanned document is saved at most once, and a new
/// scan starts the next session. With nothing accepted this is a no-op that
/// touches no files. Otherwise the original is copied to `<document>.bak`
/// first and only overwritten once every substitution has succeeded.
///
/// # Errors
///
/// Returns `Error::BackupFailed` if the backup copy fails (original untouched),
/// `Error::PatchFailed` if a token no longer matches its reference,
/// `Error::Cancelled` if cancelled before the final write,
/// or `Error::WriteFailed` if the new text cannot be written.
/// The backup is left in place in every failure after it was made.
pub fn save(context: DocumentContext, cancel: &CancelToken) -> Result<SaveOutcome, Error> {
    let accepted: Vec<&Reference> = context
        .references
        .iter()
        .filter(|r| return r.status == ReferenceStatus::Updated && r.selected_candidate.is_some())
        .collect();

    if accepted.is_empty() {
        tracing::info!(document = %context.source_path.display(), "nothing to save");
        return Ok(SaveOutcome::default());
    }
    cancel.check()?;

    let document = context.source_path.as_path();
    let backup_path = backup_path_for(document);
    std::fs::copy(document, &backup_path).map_err(|source| {
        return Error::BackupFailed {
            path: backup_path.clone(),
            source,
        };
    })?;
    tracing::info!(backup = %backup_path.display(), "original backed up");

    let patched = patch_text(&context.raw, &accepted)?;
    cancel.check()?;

    write_via_temp(document, &patched).map_err(|source| {
        return Error::WriteFailed {
            path: document.to_path_buf(),
            source,
        };
    })?;
    tracing::info!(document = %document.display(), replaced = accepted.len(), "document rewritten");

    return Ok(SaveOutcome {
        backup_path: Some(backup_path),
        replaced: accepted.len(),
    });
}

/// Splice the serialized form of each reference's selected candidate over its
/// original token. Bytes outside the replaced tokens are copied unchanged.
///
/// # Errors
///
/// Returns `Error::PatchFailed` if a span is out of range, overlaps another,
/// no longer decodes to the reference's original path, or the new path is
/// not valid UTF-8.
pub fn patch_text(raw: &str, accepted: &[&Reference]) -> Result<String, Error> {
    let mut ordered: Vec<&Reference> = accepted.to_vec();
    ordered.sort_by_key(|r| return r.span.start);

    let escape_case = unicode_escape_case(raw);
    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0_usize;

    for reference in ordered {
        let span = reference.span.clone();
        let fail = |reason: &str| {
            return Error::PatchFailed {
                index: reference.index,
                reason: reason.to_string(),
            };
        };

        if span.start < cursor {
            return Err(fail("token overlaps an earlier replacement"));
        }
        let Some(token) = raw.get(span.clone()) else {
            return Err(fail("token span is outside the document"));
        };
        let decoded: String = serde_json::from_str(token).map_err(|e| return fail(&e.to_string()))?;
        if decoded != reference.original_path {
            return Err(fail("token no longer matches the scanned path"));
        }
        let Some(selected) = reference.selected_candidate.as_deref().and_then(Path::to_str) else {
            return Err(fail("selected path is not valid UTF-8"));
        };
        let mut replacement = serde_json::to_string(selected).map_err(|e| return fail(&e.to_string()))?;
        if let Some(uppercase) = escape_case {
            replacement = escape_non_ascii(&replacement, uppercase);
        }

        let Some(before) = raw.get(cursor..span.start) else {
            return Err(fail("token span is not on a character boundary"));
        };
        out.push_str(before);
        out.push_str(&replacement);
        cursor = span.end;
    }

    out.push_str(raw.get(cursor..).unwrap_or_default());
    return Ok(out);
}

/// Whether the document writes non-ASCII text as `\uXXXX` escapes, and if so
/// whether it uses uppercase hex digits. Only an all-ASCII document that
/// contains at least one such escape counts.
fn unicode_escape_case(raw: &str) -> Option<bool> {
    if !raw.is_ascii() {
        return None;
    }
    let bytes = raw.as_bytes();
    let mut at = 0_usize;
    while let Some(&byte) = bytes.get(at) {
        if byte != b'\\' {
            at = at.saturating_add(1);
            continue;
        }
        if bytes.get(at.saturating_add(1)) == Some(&b'u') {
            let digits = bytes.get(at.saturating_add(2)..at.saturating_add(6)).unwrap_or_default();
            return Some(digits.iter().any(u8::is_ascii_uppercase));
        }
        // Skip the escaped character so `\\u` is not read as an escape.
        at = at.saturating_add(2);
    }
    return None;
}

/// Rewrite every non-ASCII character of a JSON string literal as `\uXXXX`,
/// using surrogate pairs above the basic plane.
fn escape_non_ascii(literal: &str, uppercase: bool) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        let mut units = [0_u16; 2];
        for unit in ch.encode_utf16(&mut units).iter() {
            let _ = if uppercase {
                write!(out, "\\u{unit:04X}")
            } else {
                write!(out, "\\u{unit:04x}")
            };
        }
    }
    return out;
}

/// Write `text` to a temp file beside `path`, then rename it over `path`,
/// so readers never observe a half-written document.
///
/// # Errors
///
/// Returns the underlying I/O error from creating, writing, or persisting the temp file.
fn write_via_temp(path: &Path, text: &str) -> Result<(), std::io::Error> {
    let dir = path.parent().filter(|p| return !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(text.as_bytes())?;
    temp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        temp.as_file().set_permissions(meta.permissions())?;
    }
    temp.persist(path).map_err(|e| return e.error)?;
    return Ok(());
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, reason = "tests assert on known shapes")]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scanner;
    use crate::session::Session;
    use crate::types::{ReferenceUpdate, SearchOutcome};

    const DOC: &str = "{\r\n  \"Items\": [\r\n    {\"FilePath\": \"C:\\\\old\\\\a.png\", \"Layer\": 1},\r\n    {\"FilePath\": \"C:\\\\old\\\\a.png\", \"Layer\": 2}\r\n  ],\r\n  \"Extra\":   [1,2,  3]\r\n}\r\n";

    fn scanned(dir: &Path, raw: &str) -> Session {
        let doc = dir.join("project.json");
        std::fs::write(&doc, raw).unwrap();
        let (context, _) = scanner::scan(&doc, &Config::default()).unwrap();
        return Session::new(context);
    }

    fn resolve(session: &mut Session, index: usize, path: &str) {
        let update = ReferenceUpdate {
            index,
            outcome: SearchOutcome::Resolved(PathBuf::from(path)),
        };
        session.apply(&update).unwrap();
    }

    #[test]
    fn nothing_accepted_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let session = scanned(dir.path(), DOC);
        let doc = session.context().source_path.clone();

        let outcome = save(session.into_context(), &CancelToken::default()).unwrap();
        assert_eq!(outcome, SaveOutcome::default());
        assert!(!backup_path_for(&doc).exists());
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), DOC);
    }

    #[test]
    fn only_the_accepted_occurrence_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = scanned(dir.path(), DOC);
        assert_eq!(session.references().len(), 2);
        resolve(&mut session, 1, r"D:\new\a.png");
        let doc = session.context().source_path.clone();

        let outcome = save(session.into_context(), &CancelToken::default()).unwrap();
        assert_eq!(outcome.replaced, 1);

        let written = std::fs::read_to_string(&doc).unwrap();
        let expected = DOC.replacen(
            "\"C:\\\\old\\\\a.png\", \"Layer\": 2",
            "\"D:\\\\new\\\\a.png\", \"Layer\": 2",
            1,
        );
        assert_eq!(written, expected);
        assert!(written.contains("\"C:\\\\old\\\\a.png\", \"Layer\": 1"));
    }

    #[test]
    fn backup_holds_the_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = scanned(dir.path(), DOC);
        resolve(&mut session, 0, "/srv/a.png");
        let doc = session.context().source_path.clone();
        std::fs::write(backup_path_for(&doc), "stale backup").unwrap();

        let outcome = save(session.into_context(), &CancelToken::default()).unwrap();
        let backup = outcome.backup_path.unwrap();
        assert_eq!(backup, dir.path().join("project.json.bak"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), DOC);
    }

    #[test]
    fn drifted_token_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = scanned(dir.path(), DOC);
        resolve(&mut session, 0, "/srv/a.png");
        let mut context = session.into_context();
        context.raw = context.raw.replace("old", "olx");
        let doc = context.source_path.clone();

        let err = save(context, &CancelToken::default()).unwrap_err();
        assert!(matches!(err, Error::PatchFailed { index: 0, .. }));
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), DOC);
        assert!(backup_path_for(&doc).exists());
    }

    #[test]
    fn cancelled_save_leaves_document_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = scanned(dir.path(), DOC);
        resolve(&mut session, 0, "/srv/a.png");
        let doc = session.context().source_path.clone();
        let cancel = CancelToken::default();
        cancel.cancel();

        let err = save(session.into_context(), &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), DOC);
    }

    #[test]
    fn non_ascii_follows_the_document_escape_style() {
        let escaped = r#"{"Items":[{"FilePath":"C:\\Users\\m\u00FCller\\old.wav"}]}"#;
        let dir = tempfile::tempdir().unwrap();
        let mut session = scanned(dir.path(), escaped);
        resolve(&mut session, 0, "/média/♫.wav");
        let accepted: Vec<&Reference> = session.accepted().collect();
        let patched = patch_text(escaped, &accepted).unwrap();
        assert_eq!(patched, r#"{"Items":[{"FilePath":"/m\u00E9dia/\u266B.wav"}]}"#);

        let plain = "{\"Items\":[{\"FilePath\":\"müller/old.wav\"}]}";
        let mut session = scanned(dir.path(), plain);
        resolve(&mut session, 0, "/média/🎵.wav");
        let accepted: Vec<&Reference> = session.accepted().collect();
        let patched = patch_text(plain, &accepted).unwrap();
        assert_eq!(patched, "{\"Items\":[{\"FilePath\":\"/média/🎵.wav\"}]}");
    }

    #[test]
    fn escaped_backslash_before_u_is_not_an_escape() {
        assert_eq!(unicode_escape_case(r#"{"a":"C:\\users"}"#), None);
        assert_eq!(unicode_escape_case(r#"{"a":"\ud83c\udfb5"}"#), Some(false));
        assert_eq!(escape_non_ascii("\"🎵\"", false), r#""\ud83c\udfb5""#);
    }

    #[test]
    fn replacement_is_escaped_like_the_original() {
        let raw = r#"{"Items":[{"FilePath":"a \"quoted\" name.png"}]}"#;
        let dir = tempfile::tempdir().unwrap();
        let mut session = scanned(dir.path(), raw);
        resolve(&mut session, 0, r#"C:\x\"b".png"#);
        let accepted: Vec<&Reference> = session.accepted().collect();
        let patched = patch_text(raw, &accepted).unwrap();
        assert_eq!(patched, r#"{"Items":[{"FilePath":"C:\\x\\\"b\".png"}]}"#);
    }
}
