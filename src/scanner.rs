//! Document scanner: parse a JSON project document, extract file references
//! with their byte spans, and probe each one against the filesystem.

use std::path::{Path, PathBuf};

use tree_sitter::{Language, Node, Parser, Tree};

use crate::config::Config;
use crate::error::Error;
use crate::types::{DocumentContext, Reference, ReferenceStatus, ScanSummary};

/// Byte-order mark some editors prepend to UTF-8 documents.
const BOM: char = '\u{feff}';

/// Traversal state threaded through the recursive walk. Each call gets its
/// own copy; nothing is shared between siblings.
#[derive(Clone, Copy)]
struct WalkContext<'a> {
    /// Whether an ancestor pair used a collection key.
    in_collection: bool,
    /// Nearest type label seen on the way down.
    type_hint: &'a str,
}

/// Read a document, extract its references, and classify each against the filesystem.
///
/// # Errors
///
/// Returns `Error::DocumentNotFound` if the path doesn't exist,
/// `Error::ParseFailed` if the text is not valid UTF-8 JSON,
/// or `Error::Io` for other read failures.
pub fn scan(document: &Path, config: &Config) -> Result<(DocumentContext, ScanSummary), Error> {
    let bytes = match std::fs::read(document) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::DocumentNotFound { path: document.to_path_buf() });
        },
        Err(e) => return Err(Error::Io(e)),
        Ok(b) => b,
    };
    let raw = String::from_utf8(bytes).map_err(|e| {
        return Error::ParseFailed {
            file: document.to_path_buf(),
            reason: format!("not valid UTF-8: {e}"),
        };
    })?;

    let mut references = extract_references(&raw, document, config)?;
    let base_dir = document.parent().unwrap_or(Path::new(""));
    let mut summary = ScanSummary::default();

    for reference in &mut references {
        let (status, message) = probe_existence(base_dir, &reference.original_path);
        reference.status = status;
        reference.message = message;
        tally_scanned_status(&mut summary, status);
        if status == ReferenceStatus::Failed {
            tracing::warn!(index = reference.index, path = %reference.original_path, reason = %reference.message, "existence probe failed");
        }
    }

    tracing::info!(
        document = %document.display(),
        total = summary.total,
        existing = summary.existing,
        missing = summary.missing,
        failed = summary.failed,
        "scan complete"
    );

    let context = DocumentContext {
        raw,
        references,
        source_path: document.to_path_buf(),
    };
    return Ok((context, summary));
}

/// Parse raw document text and collect every reference leaf in discovery order.
/// All references start out `Missing`; the filesystem is not touched.
///
/// # Errors
///
/// Returns `Error::ParseFailed` if the text is not a valid JSON document.
pub fn extract_references(raw: &str, file: &Path, config: &Config) -> Result<Vec<Reference>, Error> {
    let body = raw.strip_prefix(BOM).unwrap_or(raw);
    let offset = raw.len().saturating_sub(body.len());

    serde_json::from_str::<serde_json::Value>(body).map_err(|e| {
        return Error::ParseFailed {
            file: file.to_path_buf(),
            reason: e.to_string(),
        };
    })?;

    let tree = parse_json(file, body)?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(Error::ParseFailed {
            file: file.to_path_buf(),
            reason: "syntax tree contains errors".to_string(),
        });
    }

    let walker = ReferenceWalker {
        body,
        config,
        file,
        offset,
    };
    let mut references = Vec::new();
    let start = WalkContext {
        in_collection: false,
        type_hint: "",
    };
    walker.visit(root, start, &mut references)?;
    return Ok(references);
}

/// Parse JSON text into a tree-sitter tree.
///
/// # Errors
///
/// Returns `Error::ParseFailed` if the language cannot be set or parsing fails.
fn parse_json(file: &Path, body: &str) -> Result<Tree, Error> {
    let language: Language = tree_sitter_json::LANGUAGE.into();
    let mut parser = Parser::new();
    parser.set_language(&language).map_err(|e| {
        return Error::ParseFailed {
            file: file.to_path_buf(),
            reason: e.to_string(),
        };
    })?;

    return parser.parse(body, None).ok_or_else(|| {
        return Error::ParseFailed {
            file: file.to_path_buf(),
            reason: "tree-sitter returned None".to_string(),
        };
    });
}

/// Immutable inputs shared by every step of one extraction walk.
struct ReferenceWalker<'a> {
    /// Document text without the BOM; tree-sitter offsets index into this.
    body: &'a str,
    /// Key names driving extraction.
    config: &'a Config,
    /// Document path, for error messages.
    file: &'a Path,
    /// Length of the stripped BOM, added to every span.
    offset: usize,
}

impl ReferenceWalker<'_> {
    /// Decode a JSON string token into its value.
    ///
    /// # Errors
    ///
    /// Returns `Error::ParseFailed` if the token is not a valid JSON string.
    fn decode_string(&self, node: Node<'_>) -> Result<String, Error> {
        let text = node.utf8_text(self.body.as_bytes()).map_err(|e| {
            return Error::ParseFailed {
                file: self.file.to_path_buf(),
                reason: e.to_string(),
            };
        })?;
        return serde_json::from_str::<String>(text).map_err(|e| {
            return Error::ParseFailed {
                file: self.file.to_path_buf(),
                reason: format!("bad string literal at byte {}: {e}", node.start_byte()),
            };
        });
    }

    /// Find the type label carried directly by an object, trying hint keys in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::ParseFailed` if a key or value token cannot be decoded.
    fn own_type_hint(&self, object: Node<'_>) -> Result<Option<String>, Error> {
        let mut found: Vec<(usize, String)> = Vec::new();
        for pair in object_pairs(object) {
            let (Some(key), Some(value)) = (pair.child_by_field_name("key"), pair.child_by_field_name("value")) else {
                continue;
            };
            if value.kind() != "string" {
                continue;
            }
            let key = self.decode_string(key)?;
            if let Some(rank) = self.config.hint_keys.iter().position(|k| return *k == key) {
                found.push((rank, self.decode_string(value)?));
            }
        }
        found.sort_by_key(|(rank, _)| return *rank);
        return Ok(found.into_iter().map(|(_, hint)| return hint).find(|h| return !h.is_empty()));
    }

    /// Recursively walk a value node, pushing references found beneath it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ParseFailed` if a string token cannot be decoded.
    fn visit(&self, node: Node<'_>, context: WalkContext<'_>, out: &mut Vec<Reference>) -> Result<(), Error> {
        match node.kind() {
            "object" => return self.visit_object(node, context, out),
            "array" | "document" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.visit(child, context, out)?;
                }
                return Ok(());
            },
            _ => return Ok(()),
        }
    }

    /// Walk one object: resolve its type label, collect reference leaves, and
    /// descend into nested values with an updated context.
    ///
    /// # Errors
    ///
    /// Returns `Error::ParseFailed` if a string token cannot be decoded.
    fn visit_object(&self, object: Node<'_>, context: WalkContext<'_>, out: &mut Vec<Reference>) -> Result<(), Error> {
        let own_hint = self.own_type_hint(object)?;
        let type_hint = own_hint.as_deref().unwrap_or(context.type_hint);

        for pair in object_pairs(object) {
            let (Some(key_node), Some(value)) = (pair.child_by_field_name("key"), pair.child_by_field_name("value")) else {
                continue;
            };
            let key = self.decode_string(key_node)?;

            if value.kind() == "string" {
                if context.in_collection && self.config.reference_keys.contains(&key) {
                    self.push_reference(value, type_hint, out)?;
                }
                continue;
            }

            let child_context = WalkContext {
                in_collection: context.in_collection || self.config.collection_keys.contains(&key),
                type_hint,
            };
            self.visit(value, child_context, out)?;
        }
        return Ok(());
    }

    /// Record a reference leaf. Blank strings are placeholders, not references.
    ///
    /// # Errors
    ///
    /// Returns `Error::ParseFailed` if the token cannot be decoded.
    fn push_reference(&self, value: Node<'_>, type_hint: &str, out: &mut Vec<Reference>) -> Result<(), Error> {
        let original_path = self.decode_string(value)?;
        if original_path.trim().is_empty() {
            return Ok(());
        }
        let range = value.byte_range();
        let span = range.start.saturating_add(self.offset)..range.end.saturating_add(self.offset);
        out.push(Reference::discovered(out.len(), original_path, type_hint.to_string(), span));
        return Ok(());
    }
}

/// The `pair` children of an object node, skipping punctuation and comments.
fn object_pairs(object: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = object.walk();
    return object
        .named_children(&mut cursor)
        .filter(|n| return n.kind() == "pair")
        .collect();
}

/// Classify one reference path against the filesystem. Relative paths are
/// resolved against the document's directory. Only a file that opens for
/// reading counts as existing.
fn probe_existence(base_dir: &Path, original_path: &str) -> (ReferenceStatus, String) {
    let candidate = Path::new(original_path);
    let path: PathBuf = if candidate.is_relative() {
        base_dir.join(candidate)
    } else {
        candidate.to_path_buf()
    };

    return match std::fs::metadata(&path) {
        Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory) => {
            (ReferenceStatus::Missing, "file not found".to_string())
        },
        Err(e) => (ReferenceStatus::Failed, e.to_string()),
        Ok(meta) if meta.is_file() => match std::fs::File::open(&path) {
            Err(e) => (ReferenceStatus::Failed, e.to_string()),
            Ok(_) => (ReferenceStatus::Existing, String::new()),
        },
        Ok(_) => (ReferenceStatus::Missing, "path is not a file".to_string()),
    };
}

/// Count one scanned reference in the summary.
fn tally_scanned_status(summary: &mut ScanSummary, status: ReferenceStatus) {
    summary.total = summary.total.saturating_add(1);
    match status {
        ReferenceStatus::Existing => summary.existing = summary.existing.saturating_add(1),
        ReferenceStatus::Failed => summary.failed = summary.failed.saturating_add(1),
        _ => summary.missing = summary.missing.saturating_add(1),
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, reason = "tests assert on known shapes")]
mod tests {
    use super::*;

    const PROJECT: &str = r#"{
  "Name": "demo",
  "FilePath": "C:\\outside\\ignored.png",
  "Timelines": [
    {
      "$type": "Timeline",
      "Items": [
        { "$type": "ImageItem", "FilePath": "C:\\media\\a.png" },
        { "Type": "Audio", "Layer": 2, "FilePath": "voice.wav" },
        { "Group": { "FilePath": "nested/b.png" } },
        { "FilePath": "" }
      ]
    }
  ]
}"#;

    fn extract(raw: &str) -> Vec<Reference> {
        return extract_references(raw, Path::new("project.json"), &Config::default()).unwrap();
    }

    #[test]
    fn only_references_inside_collections_are_extracted() {
        let refs = extract(PROJECT);
        let paths: Vec<&str> = refs.iter().map(|r| r.original_path.as_str()).collect();
        assert_eq!(paths, vec![r"C:\media\a.png", "voice.wav", "nested/b.png"]);
        let indices: Vec<usize> = refs.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn type_hint_comes_from_enclosing_object_then_ancestors() {
        let refs = extract(PROJECT);
        assert_eq!(refs[0].type_hint, "ImageItem");
        assert_eq!(refs[1].type_hint, "Audio");
        assert_eq!(refs[2].type_hint, "Timeline");
    }

    #[test]
    fn hint_is_empty_without_any_labelled_ancestor() {
        let refs = extract(r#"{"Items": [{"FilePath": "x.png"}]}"#);
        assert_eq!(refs[0].type_hint, "");
    }

    #[test]
    fn spans_cover_the_serialized_token() {
        let refs = extract(PROJECT);
        assert_eq!(&PROJECT[refs[0].span.clone()], r#""C:\\media\\a.png""#);
        assert_eq!(&PROJECT[refs[1].span.clone()], r#""voice.wav""#);
    }

    #[test]
    fn spans_account_for_a_leading_bom() {
        let raw = format!("{BOM}{{\"Items\":[{{\"FilePath\":\"a.png\"}}]}}");
        let refs = extract(&raw);
        assert_eq!(&raw[refs[0].span.clone()], "\"a.png\"");
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let result = extract_references("{\"Items\": [", Path::new("bad.json"), &Config::default());
        assert!(matches!(result, Err(Error::ParseFailed { .. })));
    }

    #[test]
    fn scan_classifies_existing_missing_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("here.png"), b"png").unwrap();
        let doc = dir.path().join("project.json");
        let raw = r#"{"Items": [
            {"FilePath": "here.png"},
            {"FilePath": "gone.png"},
            {"FilePath": "bad\u0000name.png"}
        ]}"#;
        std::fs::write(&doc, raw).unwrap();

        let (context, summary) = scan(&doc, &Config::default()).unwrap();
        let statuses: Vec<ReferenceStatus> = context.references.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ReferenceStatus::Existing, ReferenceStatus::Missing, ReferenceStatus::Failed]);
        assert!(!context.references[2].message.is_empty());
        assert_eq!(summary, ScanSummary { existing: 1, failed: 1, missing: 1, total: 3 });
        assert_eq!(context.raw, raw);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_not_existing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked.png");
        std::fs::write(&locked, b"png").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::File::open(&locked).is_ok() {
            // Privileged users read through mode 000.
            return;
        }

        let (status, message) = probe_existence(dir.path(), "locked.png");
        assert_eq!(status, ReferenceStatus::Failed);
        assert!(!message.is_empty());
    }

    #[test]
    fn scan_of_missing_document_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan(&dir.path().join("nope.json"), &Config::default());
        assert!(matches!(result, Err(Error::DocumentNotFound { .. })));
    }
}
