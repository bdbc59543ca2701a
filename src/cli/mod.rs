//! CLI layer: argument parsing, logging setup, and subcommand implementations.

pub mod args;

pub use args::*;

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use vcs_history::guru::BatchReport;
use vcs_history::{CacheBackend, HistoryConfig, HistoryError, HistoryGuru};

// ─── CLI ─────────────────────────────────────────────────────────────

/// Version-control history, annotation and history cache management
#[derive(Parser, Debug)]
#[command(name = "vcs-history", version, about, after_help = "\
Run 'vcs-history <COMMAND> --help' for detailed options.\n\
Common options: -s <DIR> (source root), --cache file|database|none")]
pub(crate) struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Detect repositories under the source root and print them as JSON
    Scan,

    /// Print the history of a file or directory as JSON
    History(HistoryArgs),

    /// Print per-line revision and author of a file
    Annotate(AnnotateArgs),

    /// Print a file as it was at some revision
    Cat(CatArgs),

    /// Manage the history cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Pull upstream changes into the working copies
    Update(UpdateArgs),
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();
    init_logging(&cli.global.log_level, cli.global.log_json);

    match dispatch(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the selected command. `Ok(false)` means some repositories failed.
fn dispatch(cli: Cli) -> Result<bool, HistoryError> {
    let mut config = build_config(&cli.global)?;
    if let Commands::Cache(CacheCommand::Create(args)) = &cli.command {
        if args.sequential {
            config.parallel_cache_creation = false;
        }
    }
    let guru = open_guru(config)?;

    match cli.command {
        Commands::Scan => print_json(&guru.repositories()?).map(|_| true),
        Commands::History(args) => cmd_history(&guru, args).map(|_| true),
        Commands::Annotate(args) => cmd_annotate(&guru, args).map(|_| true),
        Commands::Cat(args) => cmd_cat(&guru, args).map(|_| true),
        Commands::Cache(CacheCommand::Create(args)) => {
            let repos = resolve_all(&guru, &args.repos);
            report_batch(&guru.create_cache_for(repos.as_deref())?)
        }
        Commands::Cache(CacheCommand::Clear(args)) => {
            let repos = resolve_all(&guru, &args.repos).unwrap_or_default();
            let cleared = guru.remove_cache(&repos)?;
            print_json(&cleared).map(|_| true)
        }
        Commands::Cache(CacheCommand::Latest(args)) => {
            let repo = resolve(&guru, &args.repo);
            match guru.latest_cached_revision(&repo)? {
                Some(rev) => println!("{}", rev),
                None => eprintln!("No cached revision for {}", repo.display()),
            }
            Ok(true)
        }
        Commands::Update(args) => {
            let repos = resolve_all(&guru, &args.repos);
            report_batch(&guru.update_repositories_for(repos.as_deref())?)
        }
    }
}

// ─── Setup ──────────────────────────────────────────────────────────

/// Configuration file (or defaults) overlaid with the command-line flags.
pub(crate) fn build_config(global: &GlobalArgs) -> Result<HistoryConfig, HistoryError> {
    let mut config = match &global.config {
        Some(path) => HistoryConfig::load(path)?,
        None => HistoryConfig::default(),
    };
    if let Some(root) = &global.source_root {
        config.source_root = root.clone();
    }
    if let Some(root) = &global.data_root {
        config.data_root = root.clone();
    }
    match global.cache {
        Some(CacheKind::None | CacheKind::File) if global.db_path.is_some() => {
            return Err(HistoryError::InvalidArgs("--db-path needs the database cache".into()));
        }
        Some(CacheKind::None) => config.cache = CacheBackend::None,
        Some(CacheKind::File) => config.cache = CacheBackend::File,
        Some(CacheKind::Database) => config.cache = database_backend(&config, global),
        None if global.db_path.is_some() => config.cache = database_backend(&config, global),
        None => {}
    }
    Ok(config)
}

/// `--db-path` wins over a path from the configuration file.
fn database_backend(config: &HistoryConfig, global: &GlobalArgs) -> CacheBackend {
    let path = global.db_path.clone().or_else(|| match &config.cache {
        CacheBackend::Database { path } => path.clone(),
        _ => None,
    });
    CacheBackend::Database { path }
}

/// Context with every repository under the source root registered.
fn open_guru(config: HistoryConfig) -> Result<HistoryGuru, HistoryError> {
    let source_root = config.source_root.clone();
    let guru = HistoryGuru::new(config)?;
    guru.add_repositories(&[source_root])?;
    Ok(guru)
}

/// Relative paths are taken from the source root.
fn resolve(guru: &HistoryGuru, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        guru.config().source_root.join(path)
    }
}

/// `None` for an empty list, meaning "every repository".
fn resolve_all(guru: &HistoryGuru, paths: &[PathBuf]) -> Option<Vec<PathBuf>> {
    if paths.is_empty() {
        None
    } else {
        Some(paths.iter().map(|p| resolve(guru, p)).collect())
    }
}

// ─── Output ─────────────────────────────────────────────────────────

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), HistoryError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| HistoryError::InvalidArgs(format!("cannot encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

fn report_batch(report: &BatchReport) -> Result<bool, HistoryError> {
    print_json(report)?;
    for (dir, message) in &report.failed {
        eprintln!("{}: {}", dir.display(), message);
    }
    Ok(report.is_success())
}

#[derive(Serialize)]
struct HistoryPage<'a> {
    path: &'a Path,
    total: usize,
    start: usize,
    entries: &'a [vcs_history::HistoryEntry],
}

// ─── Commands ───────────────────────────────────────────────────────

fn cmd_history(guru: &HistoryGuru, args: HistoryArgs) -> Result<(), HistoryError> {
    let path = resolve(guru, &args.path);
    let Some(history) = guru.history_with_files(&path, args.files)? else {
        return Err(HistoryError::NoRepository(path));
    };
    let limit = if args.max == 0 { history.len() } else { args.max };
    print_json(&HistoryPage {
        path: &path,
        total: history.len(),
        start: args.start,
        entries: history.page(limit, args.start),
    })
}

fn cmd_annotate(guru: &HistoryGuru, args: AnnotateArgs) -> Result<(), HistoryError> {
    let path = resolve(guru, &args.file);
    let Some(annotation) = guru.annotate(&path, args.revision.as_deref())? else {
        return Err(HistoryError::NoRepository(path));
    };
    let rev_width = annotation.widest_revision();
    let author_width = annotation.widest_author();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in annotation.lines() {
        let version = annotation
            .file_version_label(&line.revision)
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:>7} {:<rw$} {:<aw$}",
            version,
            line.revision,
            line.author,
            rw = rev_width,
            aw = author_width
        )?;
    }
    Ok(())
}

fn cmd_cat(guru: &HistoryGuru, args: CatArgs) -> Result<(), HistoryError> {
    let path = resolve(guru, &args.file);
    let Some(content) = guru.content_at(&path, &args.revision)? else {
        return Err(HistoryError::InvalidArgs(format!(
            "no content for {} at revision {}",
            path.display(),
            args.revision
        )));
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    out.write_all(&content)?;
    out.flush()?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
