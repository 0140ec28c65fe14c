//! Configuration for the watch pipeline

use crate::error::ConfigError;
use failwatch_extract::{MatchRules, DEFAULT_KEYWORD, DEFAULT_LOG_SUFFIX};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Where artifacts go below the output root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `<output_root>/<subdir>/<member>`
    #[default]
    Fixed,
    /// `<output_root>/<archive parent dir name>/<member>`, `subdir` when the
    /// archive has no named parent
    ArchiveParent,
}

/// Notification backend used for every watch root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackend {
    /// inotify / kqueue / FSEvents / ReadDirectoryChangesW
    #[default]
    Native,
    /// Periodic directory scans, for network filesystems
    Poll,
}

/// Main configuration for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directories to watch
    #[serde(default)]
    pub watch_roots: Vec<PathBuf>,

    /// Destination root for artifacts
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    /// Subdirectory under the output root
    #[serde(default = "default_subdir")]
    pub subdir: String,

    #[serde(default)]
    pub layout: OutputLayout,

    /// Watch roots recursively
    #[serde(default = "default_recursive")]
    pub recursive: bool,

    #[serde(default)]
    pub backend: WatchBackend,

    /// Scan cadence of the polling backend in milliseconds
    #[serde(default = "default_poll_backend_interval")]
    pub poll_backend_interval_ms: u64,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Duplicate-notification window in milliseconds
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// How long a file size must stay unchanged, in milliseconds
    #[serde(default = "default_stability_timeout")]
    pub stability_timeout_ms: u64,

    /// File size poll interval in milliseconds
    #[serde(default = "default_stability_poll")]
    pub stability_poll_ms: u64,

    /// Give up on files that keep changing for this long
    #[serde(default = "default_stability_max_wait")]
    pub stability_max_wait_secs: u64,

    /// Drain grace period on shutdown; 0 waits without limit
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Container extensions, without the dot
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,

    /// Archive member suffix
    #[serde(default = "default_log_suffix")]
    pub log_suffix: String,

    /// Failure keywords; any match selects a member
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

fn default_subdir() -> String {
    "fail".to_string()
}

fn default_recursive() -> bool {
    true
}

fn default_poll_backend_interval() -> u64 {
    1000
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .saturating_mul(2)
}

fn default_debounce() -> u64 {
    1000
}

fn default_stability_timeout() -> u64 {
    2000
}

fn default_stability_poll() -> u64 {
    100
}

fn default_stability_max_wait() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_archive_extensions() -> Vec<String> {
    vec!["zip".to_string()]
}

fn default_log_suffix() -> String {
    DEFAULT_LOG_SUFFIX.to_string()
}

fn default_keywords() -> Vec<String> {
    vec![DEFAULT_KEYWORD.to_string()]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_roots: Vec::new(),
            output_root: None,
            subdir: default_subdir(),
            layout: OutputLayout::default(),
            recursive: default_recursive(),
            backend: WatchBackend::default(),
            poll_backend_interval_ms: default_poll_backend_interval(),
            workers: default_workers(),
            debounce_ms: default_debounce(),
            stability_timeout_ms: default_stability_timeout(),
            stability_poll_ms: default_stability_poll(),
            stability_max_wait_secs: default_stability_max_wait(),
            shutdown_grace_secs: default_shutdown_grace(),
            archive_extensions: default_archive_extensions(),
            log_suffix: default_log_suffix(),
            keywords: default_keywords(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_roots.is_empty() {
            return Err(ConfigError::Invalid("at least one watch root is required".into()));
        }
        if self.output_root.is_none() {
            return Err(ConfigError::Invalid("an output root is required".into()));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.stability_poll_ms == 0 {
            return Err(invalid("stability_poll_ms", "must be greater than 0"));
        }
        if self.stability_max_wait_secs.saturating_mul(1000) <= self.stability_timeout_ms {
            return Err(invalid(
                "stability_max_wait_secs",
                "must exceed stability_timeout_ms",
            ));
        }
        if self.backend == WatchBackend::Poll && self.poll_backend_interval_ms == 0 {
            return Err(invalid("poll_backend_interval_ms", "must be greater than 0"));
        }
        if self.log_suffix.trim().is_empty() {
            return Err(invalid("log_suffix", "must not be empty"));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(invalid("keywords", "needs at least one non-blank keyword"));
        }
        if self.archive_extensions.iter().all(|e| normalize_extension(e).is_empty()) {
            return Err(invalid("archive_extensions", "needs at least one extension"));
        }
        if !is_plain_relative(&self.subdir) {
            return Err(invalid(
                "subdir",
                "must be a relative path without '..' components",
            ));
        }
        Ok(())
    }

    pub fn match_rules(&self) -> MatchRules {
        MatchRules::new(&self.log_suffix, &self.keywords)
    }

    /// Lowercased extensions without leading dots.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.archive_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// `None` means wait for the drain without limit.
    pub fn shutdown_grace(&self) -> Option<Duration> {
        match self.shutdown_grace_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn poll_backend_interval(&self) -> Duration {
        Duration::from_millis(self.poll_backend_interval_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn is_plain_relative(subdir: &str) -> bool {
    let path = Path::new(subdir);
    !subdir.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

/// Resolves the destination directory of an archive's artifacts.
#[derive(Debug, Clone)]
pub struct DestinationPlan {
    output_root: PathBuf,
    subdir: String,
    layout: OutputLayout,
}

impl DestinationPlan {
    pub fn new(output_root: impl Into<PathBuf>, subdir: impl Into<String>, layout: OutputLayout) -> Self {
        Self {
            output_root: output_root.into(),
            subdir: subdir.into(),
            layout,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn destination_for(&self, archive: &Path) -> PathBuf {
        match self.layout {
            OutputLayout::Fixed => self.output_root.join(&self.subdir),
            OutputLayout::ArchiveParent => {
                let parent_name = archive
                    .parent()
                    .and_then(|p| p.file_name())
                    .filter(|name| {
                        matches!(Path::new(name).components().next(), Some(Component::Normal(_)))
                    });
                match parent_name {
                    Some(name) => self.output_root.join(name),
                    None => self.output_root.join(&self.subdir),
                }
            }
        }
    }
}
