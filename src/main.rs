mod commands;
mod config;
mod diagnostics;
mod error;
mod info;
mod patch;
mod roots;
mod scanner;
mod search;
mod session;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{OutputFormat, SearchOptions};

/// Exit code for runtime errors.
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "relink", about = "Find and repair broken file references in JSON project documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for missing files, apply picks, back up and rewrite the document
    Fix {
        /// Print the changes that would be made without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Project document to repair
        document: String,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Resolve an ambiguous reference: `<index>=<path>` (repeatable)
        #[arg(long = "pick", value_name = "INDEX=PATH", value_parser = parse_pick)]
        picks: Vec<(usize, PathBuf)>,
        /// Also retry references whose probe or search failed
        #[arg(long)]
        retry_failed: bool,
        /// Directory to search (repeatable)
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<String>,
    },
    /// Output comprehensive reference documentation
    Info {
        /// Output as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },
    /// Manage default search roots in .relink.toml
    Roots {
        #[command(subcommand)]
        action: RootsAction,
    },
    /// List references in a document and whether their files exist
    Scan {
        /// Project document to scan
        document: String,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Propose replacements for missing files without writing anything
    Search {
        /// Project document to scan
        document: String,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Also retry references whose probe failed
        #[arg(long)]
        retry_failed: bool,
        /// Directory to search (repeatable)
        #[arg(long = "root", value_name = "DIR")]
        roots: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RootsAction {
    /// Add a directory to the default search roots
    Add {
        /// Directory to add
        dir: String,
    },
    /// List the default search roots
    List,
    /// Remove a directory from the default search roots
    Remove {
        /// Directory to remove
        dir: String,
    },
}

/// Parse a `--pick` value of the form `<index>=<path>`.
fn parse_pick(raw: &str) -> Result<(usize, PathBuf), String> {
    let Some((index, path)) = raw.split_once('=') else {
        return Err(format!("expected <index>=<path>, got `{raw}`"));
    };
    let index = index
        .trim()
        .trim_start_matches('#')
        .parse::<usize>()
        .map_err(|e| return format!("bad index `{index}`: {e}"))?;
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    return Ok((index, PathBuf::from(path)));
}

/// Route `tracing` output to stderr, filtered by `RELINK_LOG` (default `warn`).
fn init_logging() {
    let filter = EnvFilter::try_from_env("RELINK_LOG").unwrap_or_else(|_| return EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Print the diagnostic for a failed command and map it to an exit code.
fn report(result: Result<ExitCode, error::Error>) -> ExitCode {
    return match result {
        Err(e) => {
            diagnostics::print_error(&e);
            ExitCode::from(EXIT_ERROR)
        },
        Ok(code) => code,
    };
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    return match cli.command {
        Commands::Fix {
            document,
            dry_run,
            format,
            picks,
            retry_failed,
            roots,
        } => report(commands::fix(&document, SearchOptions { retry_failed, roots }, &picks, dry_run, format)),
        Commands::Info { json } => {
            info::run(json);
            ExitCode::SUCCESS
        },
        Commands::Roots { action } => {
            let result = match action {
                RootsAction::Add { dir } => roots::cmd_add(&dir),
                RootsAction::List => roots::cmd_list(),
                RootsAction::Remove { dir } => roots::cmd_remove(&dir),
            };
            report(result.map(|()| return ExitCode::SUCCESS))
        },
        Commands::Scan { document, format } => report(commands::scan(&document, format)),
        Commands::Search {
            document,
            format,
            retry_failed,
            roots,
        } => report(commands::search(&document, SearchOptions { retry_failed, roots }, format)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_parses_index_and_path() {
        assert_eq!(parse_pick("3=/media/a.png").unwrap(), (3, PathBuf::from("/media/a.png")));
        assert_eq!(parse_pick("#0=C:\\x=y.png").unwrap(), (0, PathBuf::from("C:\\x=y.png")));
    }

    #[test]
    fn pick_rejects_malformed_values() {
        assert!(parse_pick("/media/a.png").is_err());
        assert!(parse_pick("x=/a.png").is_err());
        assert!(parse_pick("1=").is_err());
    }

    #[test]
    fn cli_accepts_repeated_roots_and_picks() {
        let cli = Cli::try_parse_from([
            "relink", "fix", "p.json", "--root", "/a", "--root", "/b", "--pick", "1=/a/x.png",
        ])
        .unwrap();
        let Commands::Fix { roots, picks, .. } = cli.command else {
            panic!("expected fix");
        };
        assert_eq!(roots, vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(picks.len(), 1);
    }
}
