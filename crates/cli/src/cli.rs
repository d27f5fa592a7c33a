use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stagecache")]
#[command(about = "Inspect and verify a stagecache cache directory")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        env = "STAGECACHE_CACHE_DIR",
        help = "Cache root (defaults to the settings file, then the platform cache dir)"
    )]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Settings file (defaults to ./stagecache.toml when present)"
    )]
    pub settings: Option<PathBuf>,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    #[command(about = "List stages with their entry count and version")]
    Stages,
    #[command(about = "List cache entries")]
    List {
        #[arg(help = "Only list entries of this stage")]
        stage: Option<String>,
    },
    #[command(about = "Print the metadata of one entry")]
    Show {
        #[arg(help = "Stage name")]
        stage: String,
        #[arg(help = "Cache key (64 hex characters)")]
        key: String,
    },
    #[command(about = "Check every result artifact for corruption")]
    Verify {
        #[arg(help = "Only verify entries of this stage")]
        stage: Option<String>,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
