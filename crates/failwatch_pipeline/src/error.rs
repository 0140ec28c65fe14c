//! Error types for the watch pipeline

use crate::orchestrator::LifecycleState;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Notification source errors
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to create {backend} watcher: {source}")]
    Create {
        backend: &'static str,
        source: notify::Error,
    },

    #[error("Failed to watch {}: {source}", root.display())]
    Subscribe { root: PathBuf, source: notify::Error },
}

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker pool is draining and no longer accepts jobs")]
    Closed,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Lifecycle errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Output root {} is not usable: {source}", path.display())]
    OutputRoot { path: PathBuf, source: io::Error },

    #[error("None of the configured watch roots is a usable directory")]
    NoUsableRoots,

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: LifecycleState,
    },
}

/// Result type alias
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
