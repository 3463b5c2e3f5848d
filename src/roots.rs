use std::path::{Path, PathBuf};

use crate::config::{self, CONFIG_FILE};
use crate::error;

// ── CLI commands ──────────────────────────────────────────────────────

/// Add a default search root to the config file.
///
/// # Errors
///
/// Returns errors from config reading or writing.
pub fn cmd_add(root_dir: &str) -> Result<(), error::Error> {
    let dir = PathBuf::from(".");
    if add_to_config(&dir, root_dir)? {
        println!("Added root: {root_dir}");
    } else {
        println!("Root already configured: {root_dir}");
    }
    return Ok(());
}

/// List configured search roots in config order.
///
/// # Errors
///
/// Returns errors from config loading.
pub fn cmd_list() -> Result<(), error::Error> {
    let dir = PathBuf::from(".");
    let config = config::Config::load(&dir)?;

    if config.roots.is_empty() {
        println!("No roots configured.");
        return Ok(());
    }

    for root in &config.roots {
        let marker = if Path::new(root).is_dir() { "" } else { "  (missing)" };
        println!("{root}{marker}");
    }
    return Ok(());
}

/// Remove a default search root from the config file.
///
/// # Errors
///
/// Returns `Error::UnknownRoot` if the root isn't configured,
/// or errors from config reading or writing.
pub fn cmd_remove(root_dir: &str) -> Result<(), error::Error> {
    let dir = PathBuf::from(".");
    remove_from_config(&dir, root_dir)?;
    println!("Removed root: {root_dir}");
    return Ok(());
}

// ── Config file editing ───────────────────────────────────────────────

/// Parse `.relink.toml` into a format-preserving document.
/// Returns an empty document if the file doesn't exist.
///
/// # Errors
///
/// Returns `Error::Io` on read failure or `Error::ParseFailed` on parse failure.
fn read_config_doc(dir: &Path) -> Result<(PathBuf, toml_edit::DocumentMut), error::Error> {
    let config_path = dir.join(CONFIG_FILE);
    let content = match std::fs::read_to_string(&config_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(error::Error::Io(e)),
        Ok(c) => c,
    };

    let doc: toml_edit::DocumentMut = content.parse().map_err(|e: toml_edit::TomlError| {
        return error::Error::ParseFailed {
            file: config_path.clone(),
            reason: e.to_string(),
        };
    })?;

    return Ok((config_path, doc));
}

/// The `roots` array of a config document, created empty if absent.
///
/// # Errors
///
/// Returns `Error::ParseFailed` if `roots` exists but is not an array.
fn roots_array<'a>(config_path: &Path, doc: &'a mut toml_edit::DocumentMut) -> Result<&'a mut toml_edit::Array, error::Error> {
    if !doc.contains_key("roots") {
        doc["roots"] = toml_edit::value(toml_edit::Array::new());
    }
    return doc
        .get_mut("roots")
        .and_then(toml_edit::Item::as_array_mut)
        .ok_or_else(|| {
            return error::Error::ParseFailed {
                file: config_path.to_path_buf(),
                reason: "`roots` must be an array of strings".to_string(),
            };
        });
}

/// Position of a root in the array, compared case-insensitively like search roots are.
fn position_of(array: &toml_edit::Array, root_dir: &str) -> Option<usize> {
    let wanted = root_dir.trim().to_lowercase();
    return array
        .iter()
        .position(|v| return v.as_str().is_some_and(|s| return s.trim().to_lowercase() == wanted));
}

/// Append a root to `.relink.toml`. Returns false if it was already present.
///
/// # Errors
///
/// Returns `Error::ParseFailed` if the config can't be parsed,
/// or `Error::Io` if writing fails.
fn add_to_config(dir: &Path, root_dir: &str) -> Result<bool, error::Error> {
    let (config_path, mut doc) = read_config_doc(dir)?;
    let roots = roots_array(&config_path, &mut doc)?;

    if position_of(roots, root_dir).is_some() {
        return Ok(false);
    }
    roots.push(root_dir);

    std::fs::write(&config_path, doc.to_string())?;
    return Ok(true);
}

/// Remove a root from `.relink.toml`.
///
/// # Errors
///
/// Returns `Error::UnknownRoot` if the root isn't configured.
fn remove_from_config(dir: &Path, root_dir: &str) -> Result<(), error::Error> {
    let (config_path, mut doc) = read_config_doc(dir)?;
    let unknown = || {
        return error::Error::UnknownRoot {
            root: root_dir.to_string(),
        };
    };

    let roots = doc
        .get_mut("roots")
        .and_then(toml_edit::Item::as_array_mut)
        .ok_or_else(unknown)?;
    let index = position_of(roots, root_dir).ok_or_else(unknown)?;
    roots.remove(index);

    std::fs::write(&config_path, doc.to_string())?;
    return Ok(());
}
