//! Command-line arguments and their mapping onto [`PipelineConfig`]

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use failwatch_pipeline::{OutputLayout, PipelineConfig, WatchBackend};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "failwatch",
    version,
    about = "Watch directories for result archives and pull out failing logs",
    after_help = "The last positional argument is the output root; every path before it is watched.\n\
                  Artifacts land in <OUTPUT_ROOT>/<subdir>/<member file name>."
)]
pub struct Cli {
    /// Watch directories followed by the output root
    #[arg(
        value_name = "WATCH_DIR... OUTPUT_ROOT",
        num_args = 2..,
        required_unless_present = "config"
    )]
    pub paths: Vec<PathBuf>,

    /// Load settings from a TOML file; flags override it
    #[arg(short, long, value_name = "FILE", env = "FAILWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subdirectory under the output root
    #[arg(long, value_name = "NAME")]
    pub subdir: Option<String>,

    /// How artifacts are grouped under the output root
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// Only watch the top level of each directory
    #[arg(long)]
    pub no_recursive: bool,

    /// Notification backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Scan interval of the poll backend in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Worker threads [default: 2 x CPU cores]
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Duplicate-event window in milliseconds [default: 1000]
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// How long an archive's size must stay unchanged, in milliseconds [default: 2000]
    #[arg(long, value_name = "MS")]
    pub stability_ms: Option<u64>,

    /// Size polling interval while waiting for an archive to settle [default: 100]
    #[arg(long, value_name = "MS")]
    pub stability_poll_ms: Option<u64>,

    /// Give up on archives still changing after this many seconds [default: 300]
    #[arg(long, value_name = "SECS")]
    pub max_wait_secs: Option<u64>,

    /// Seconds to wait for running tasks on shutdown, 0 waits forever [default: 30]
    #[arg(long, value_name = "SECS")]
    pub grace_secs: Option<u64>,

    /// Container extension to watch for (repeatable) [default: zip]
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Archive member suffix to inspect [default: .log]
    #[arg(long, value_name = "SUFFIX")]
    pub suffix: Option<String>,

    /// Failure keyword, case-insensitive (repeatable) [default: fail]
    #[arg(short = 'k', long = "keyword", value_name = "WORD")]
    pub keywords: Vec<String>,

    /// Debug output on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not write a log file
    #[arg(long)]
    pub no_log_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    /// <OUTPUT_ROOT>/<subdir>/
    Fixed,
    /// <OUTPUT_ROOT>/<archive's parent directory name>/
    ArchiveParent,
}

impl From<LayoutArg> for OutputLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Fixed => OutputLayout::Fixed,
            LayoutArg::ArchiveParent => OutputLayout::ArchiveParent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Native,
    Poll,
}

impl From<BackendArg> for WatchBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Native => WatchBackend::Native,
            BackendArg::Poll => WatchBackend::Poll,
        }
    }
}

impl Cli {
    /// Merge the config file (if any) with flags and validate the result.
    pub fn to_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        match self.paths.split_last() {
            Some((output_root, watch_roots)) if !watch_roots.is_empty() => {
                config.watch_roots = watch_roots.to_vec();
                config.output_root = Some(output_root.clone());
            }
            Some(_) => bail!("expected at least one watch directory and an output root"),
            None => {}
        }

        if let Some(subdir) = &self.subdir {
            config.subdir = subdir.clone();
        }
        if let Some(layout) = self.layout {
            config.layout = layout.into();
        }
        if self.no_recursive {
            config.recursive = false;
        }
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_backend_interval_ms = ms;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(ms) = self.stability_ms {
            config.stability_timeout_ms = ms;
        }
        if let Some(ms) = self.stability_poll_ms {
            config.stability_poll_ms = ms;
        }
        if let Some(secs) = self.max_wait_secs {
            config.stability_max_wait_secs = secs;
        }
        if let Some(secs) = self.grace_secs {
            config.shutdown_grace_secs = secs;
        }
        if !self.extensions.is_empty() {
            config.archive_extensions = self.extensions.clone();
        }
        if let Some(suffix) = &self.suffix {
            config.log_suffix = suffix.clone();
        }
        if !self.keywords.is_empty() {
            config.keywords = self.keywords.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
