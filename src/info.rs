use std::path::PathBuf;

use serde::Serialize;

use crate::config::{self, CONFIG_FILE};

/// Status names and what they mean, shared by both output formats.
const STATUSES: [(&str, &str); 6] = [
    ("Existing", "file is present; nothing to do"),
    ("Missing", "file is absent; not searched yet"),
    ("Updated", "replacement chosen; written on save"),
    ("Ambiguous", "several candidates; pick one with --pick"),
    ("NotFound", "no candidates; add roots and search again"),
    ("Failed", "probe or search error; see message"),
];

/// Exit codes and their meanings.
const EXIT_CODES: [(u8, &str); 3] = [
    (0, "Success / no unresolved references"),
    (1, "Unresolved references remain"),
    (2, "Runtime error"),
];

/// Output the comprehensive relink reference document.
pub fn run(json: bool) {
    let dir = PathBuf::from(".");
    let state = gather_state(&dir);

    if json {
        print_json(&state);
    } else {
        print_markdown(&state);
    }
}

// ── State gathering ───────────────────────────────────────────────────

/// What the working directory's config says right now.
struct CurrentState {
    /// Keys marking reference-bearing collections.
    collection_keys: Vec<String>,
    /// Whether `.relink.toml` exists.
    config_found: bool,
    /// Keys carrying type labels.
    hint_keys: Vec<String>,
    /// Keys holding file references.
    reference_keys: Vec<String>,
    /// Configured default roots.
    roots: Vec<String>,
}

fn gather_state(dir: &std::path::Path) -> CurrentState {
    let config_found = dir.join(CONFIG_FILE).exists();
    let config = config::Config::load(dir).unwrap_or_default();

    return CurrentState {
        collection_keys: config.collection_keys,
        config_found,
        hint_keys: config.hint_keys,
        reference_keys: config.reference_keys,
        roots: config.roots,
    };
}

// ── Markdown output ───────────────────────────────────────────────────

fn print_markdown(state: &CurrentState) {
    let version = env!("CARGO_PKG_VERSION");
    print_markdown_header(version);
    print_markdown_state(state);
    println!();
    print_markdown_statuses();
    println!();
    print_markdown_exit_codes();
}

fn print_markdown_header(version: &str) {
    print!(
        "\
# relink {version}

Find file references in a JSON project document whose files have moved,
search a set of directories for them by file name, and write the new paths
back without disturbing the rest of the document.

## Workflow

    relink scan <doc>                           List references and whether their files exist
    relink search <doc> --root <dir>...         Propose replacements (read-only)
    relink fix <doc> --root <dir>...            Apply single matches, write <doc>.bak, save
    relink fix <doc> --pick <index>=<path>      Resolve an ambiguous reference
    relink roots add|remove|list                Manage default search roots

## What Counts As A Reference

A string value under a reference key, somewhere inside the value of a
collection key. The type label is taken from the nearest object that has a
hint key.

## Configuration (.relink.toml)

    roots = [\"/media/library\"]          # searched in addition to --root
    reference_keys = [\"FilePath\"]
    collection_keys = [\"Items\"]
    hint_keys = [\"$type\", \"Type\", \"ItemType\"]

Set `RELINK_LOG=debug` for detailed logs on stderr.

## Current State

"
    );
}

fn print_markdown_state(state: &CurrentState) {
    if state.config_found {
        println!("Config:          {CONFIG_FILE} (found)");
    } else {
        println!("Config:          {CONFIG_FILE} (not found, using defaults)");
    }
    println!("Reference keys:  {}", state.reference_keys.join(", "));
    println!("Collection keys: {}", state.collection_keys.join(", "));
    println!("Hint keys:       {}", state.hint_keys.join(", "));

    if state.roots.is_empty() {
        println!("Roots:           (none)");
    } else {
        println!("Roots:           {}", state.roots.join(", "));
    }
}

fn print_markdown_statuses() {
    println!("## Statuses\n");
    println!("| Status    | Meaning |");
    println!("|-----------|---------|");
    for (name, meaning) in STATUSES {
        println!("| {name:<9} | {meaning} |");
    }
}

fn print_markdown_exit_codes() {
    println!("## Exit Codes\n");
    println!("| Code | Meaning |");
    println!("|------|---------|");
    for (code, meaning) in EXIT_CODES {
        println!("| {code:<4} | {meaning} |");
    }
}

// ── JSON output ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct InfoJson {
    current_state: StateJson,
    exit_codes: Vec<ExitCodeInfo>,
    statuses: Vec<StatusInfo>,
    version: String,
}

#[derive(Serialize)]
struct StatusInfo {
    meaning: String,
    name: String,
}

#[derive(Serialize)]
struct ExitCodeInfo {
    code: u8,
    meaning: String,
}

#[derive(Serialize)]
struct StateJson {
    collection_keys: Vec<String>,
    config_found: bool,
    hint_keys: Vec<String>,
    reference_keys: Vec<String>,
    roots: Vec<String>,
}

fn print_json(state: &CurrentState) {
    let info = InfoJson {
        current_state: StateJson {
            collection_keys: state.collection_keys.clone(),
            config_found: state.config_found,
            hint_keys: state.hint_keys.clone(),
            reference_keys: state.reference_keys.clone(),
            roots: state.roots.clone(),
        },
        exit_codes: EXIT_CODES
            .iter()
            .map(|(code, meaning)| {
                return ExitCodeInfo {
                    code: *code,
                    meaning: (*meaning).to_string(),
                };
            })
            .collect(),
        statuses: STATUSES
            .iter()
            .map(|(name, meaning)| {
                return StatusInfo {
                    meaning: (*meaning).to_string(),
                    name: (*name).to_string(),
                };
            })
            .collect(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    // serde_json::to_string_pretty won't fail on this structure.
    let json = serde_json::to_string_pretty(&info).unwrap_or_default();
    println!("{json}");
}
