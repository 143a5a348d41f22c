//! Runtime configuration: CLI flags layered over an optional TOML file.
//!
//! Mirrors how the rest of the server is configured -- `clap` for flags that
//! matter at invocation time, `serde`/`toml` for anything worth checking into
//! a deploy's config repo.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::fh::MAX_DEPTH;

/// Default path-cache capacity (§3.2 `CACHE_ENTRIES`).
pub const DEFAULT_CACHE_ENTRIES: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: toml::de::Error },
    #[error("max_depth {requested} exceeds the compiled-in MAX_DEPTH ({max})")]
    MaxDepthExceedsCompiledLimit { requested: u8, max: usize },
}

/// CLI flags, parsed with `clap`.
#[derive(Debug, Parser)]
#[command(name = "nfs-mamont", about = "user-space NFSv3 server")]
pub struct Cli {
    /// Directory to export.
    #[arg(long)]
    pub export_root: Option<PathBuf>,

    /// Path-cache capacity.
    #[arg(long)]
    pub cache_entries: Option<usize>,

    /// Directory-trail cap; must not exceed the compiled-in MAX_DEPTH.
    #[arg(long)]
    pub max_depth: Option<u8>,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Optional TOML file layered underneath the flags above.
    #[arg(long)]
    pub config_file: Option<PathBuf>,
}

/// The subset of [`Config`] that can come from a TOML file. Every field is
/// optional so a file only needs to mention what it overrides.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    export_root: Option<PathBuf>,
    cache_entries: Option<usize>,
    max_depth: Option<u8>,
    log_filter: Option<String>,
}

/// Resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub export_root: PathBuf,
    pub cache_entries: usize,
    pub max_depth: u8,
    pub log_filter: String,
}

impl Config {
    /// Builds a [`Config`] from parsed CLI flags, optionally layered over a
    /// TOML file named by `--config-file`. CLI flags win over file values.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config_file {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };

        let export_root = cli.export_root.or(file.export_root).unwrap_or_else(|| PathBuf::from("."));
        let cache_entries = cli.cache_entries.or(file.cache_entries).unwrap_or(DEFAULT_CACHE_ENTRIES);
        let max_depth = cli.max_depth.or(file.max_depth).unwrap_or(MAX_DEPTH as u8);
        let log_filter = cli.log_filter.or(file.log_filter).unwrap_or_else(|| "info".to_string());

        if max_depth as usize > MAX_DEPTH {
            return Err(ConfigError::MaxDepthExceedsCompiledLimit { requested: max_depth, max: MAX_DEPTH });
        }

        Ok(Config { export_root, cache_entries, max_depth, log_filter })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}
