use std::path::Path;

use crate::error::Error;

/// Name of the optional config file, looked up in the working directory.
pub const CONFIG_FILE: &str = ".relink.toml";

/// Project configuration loaded from `.relink.toml`.
/// Controls which document keys the scanner treats as references and which
/// directories are searched by default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Keys whose presence on an object makes its descendants reference-bearing.
    pub collection_keys: Vec<String>,
    /// Keys carrying a type label, tried in order on each enclosing object.
    pub hint_keys: Vec<String>,
    /// Keys whose string values are file references.
    pub reference_keys: Vec<String>,
    /// Directories searched for candidates in addition to `--root` flags.
    pub roots: Vec<String>,
}

/// Raw TOML structure for `.relink.toml`.
#[derive(serde::Deserialize)]
struct RelinkTomlConfig {
    #[serde(default)]
    collection_keys: Vec<String>,
    #[serde(default)]
    hint_keys: Vec<String>,
    #[serde(default)]
    reference_keys: Vec<String>,
    #[serde(default)]
    roots: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        return Self {
            collection_keys: vec!["Items".to_string()],
            hint_keys: vec!["$type".to_string(), "Type".to_string(), "ItemType".to_string()],
            reference_keys: vec!["FilePath".to_string()],
            roots: Vec::new(),
        };
    }
}

impl Config {
    /// Load config from `.relink.toml` in the given directory.
    /// Returns the defaults if the file doesn't exist. Returns an error if the
    /// file exists but is malformed; never silently falls back to defaults
    /// when the user wrote a config file. Empty key lists keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// or `Error::TomlDe` if the TOML is malformed.
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Io(e)),
            Ok(c) => c,
        };

        return Self::parse(&content);
    }

    /// Parse config from TOML content, filling empty key lists with defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the TOML is malformed.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let raw: RelinkTomlConfig = toml::from_str(content)?;
        let defaults = Self::default();

        return Ok(Self {
            collection_keys: non_empty_or(raw.collection_keys, defaults.collection_keys),
            hint_keys: non_empty_or(raw.hint_keys, defaults.hint_keys),
            reference_keys: non_empty_or(raw.reference_keys, defaults.reference_keys),
            roots: raw.roots,
        });
    }
}

/// Keep the user's list unless they left it empty.
fn non_empty_or(value: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    if value.is_empty() {
        return fallback;
    }
    return value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.reference_keys, vec!["FilePath".to_string()]);
        assert_eq!(config.collection_keys, vec!["Items".to_string()]);
        assert!(config.roots.is_empty());
    }

    #[test]
    fn partial_file_keeps_unset_defaults() {
        let config = Config::parse("roots = [\"/media\"]\nreference_keys = [\"Path\"]\n").unwrap();
        assert_eq!(config.roots, vec!["/media".to_string()]);
        assert_eq!(config.reference_keys, vec!["Path".to_string()]);
        assert_eq!(config.hint_keys.len(), 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "roots = [").unwrap();
        assert!(matches!(Config::load(dir.path()), Err(Error::TomlDe(_))));
    }
}
