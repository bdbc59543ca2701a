//! CLI argument structs for all subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CacheKind {
    File,
    Database,
    None,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// JSON configuration file (missing keys take their defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root of the source tree holding the repositories
    #[arg(short, long, global = true)]
    pub source_root: Option<PathBuf>,

    /// Directory for the history cache and database
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// History cache backend
    #[arg(long, global = true, value_enum)]
    pub cache: Option<CacheKind>,

    /// SQLite file for the database backend (implies --cache database)
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Log level for stderr output (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// File or directory; relative paths are taken from the source root
    pub path: PathBuf,

    /// Include the files touched by each changeset
    #[arg(long)]
    pub files: bool,

    /// Maximum number of entries to print (0 = all)
    #[arg(long, default_value = "0")]
    pub max: usize,

    /// Number of entries to skip from the head
    #[arg(long, default_value = "0")]
    pub start: usize,
}

#[derive(Parser, Debug)]
pub struct AnnotateArgs {
    /// File to annotate
    pub file: PathBuf,

    /// Annotate this revision instead of the working copy
    #[arg(short, long)]
    pub revision: Option<String>,
}

#[derive(Parser, Debug)]
pub struct CatArgs {
    /// File whose historical content to print
    pub file: PathBuf,

    /// Revision to retrieve
    #[arg(short, long)]
    pub revision: String,
}

#[derive(Parser, Debug)]
pub struct CacheCreateArgs {
    /// Repository roots to cache (default: all)
    pub repos: Vec<PathBuf>,

    /// Process repositories one at a time
    #[arg(long)]
    pub sequential: bool,
}

#[derive(Parser, Debug)]
pub struct CacheClearArgs {
    /// Repository roots whose cache to drop
    #[arg(required = true)]
    pub repos: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct CacheLatestArgs {
    /// Repository root
    pub repo: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Populate the history cache, continuing from the newest cached revision
    Create(CacheCreateArgs),

    /// Remove cached history for repositories
    Clear(CacheClearArgs),

    /// Print the newest cached revision of a repository
    Latest(CacheLatestArgs),
}

#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Repository roots to update (default: all)
    pub repos: Vec<PathBuf>,
}
