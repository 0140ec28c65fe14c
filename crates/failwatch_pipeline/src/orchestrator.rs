//! Pipeline lifecycle
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! `start` prepares the output root, resolves the watch roots and subscribes
//! to every one of them; a failed subscription tears down the ones already
//! made. `run_until_shutdown` then blocks the calling thread on the control
//! channel until a shutdown request arrives or every root has failed.
//! `stop` closes event intake, drains the pool within the grace period and
//! releases the subscriptions, in that order, and runs at most once per
//! start.

use crate::cancel::ShutdownToken;
use crate::config::{DestinationPlan, PipelineConfig};
use crate::debounce::Debouncer;
use crate::dispatch::WatchDispatcher;
use crate::error::{ConfigError, OrchestratorError, Result};
use crate::handler::{ArchiveHandler, FailLogHandler};
use crate::intake::Intake;
use crate::pool::{PoolStats, WorkerPool};
use crate::stability::{StabilityConfig, StabilityProbe};
use crate::stats::{RunStats, StatsSnapshot};
use crate::watch::{NotifySource, Subscription, WatchRoot, WatchSource};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Messages the running orchestrator waits on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Shutdown { reason: String },
    RootFailed { root: PathBuf, error: String },
}

/// Cloneable handle for requesting shutdown from other threads.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Sender<ControlEvent>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Ask the orchestrator to stop. Returns `false` if a request was
    /// already made; repeated requests do not restart or shorten the drain.
    pub fn request(&self, reason: &str) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(ControlEvent::Shutdown {
            reason: reason.to_string(),
        });
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Summary returned by [`Orchestrator::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every accepted task finished within the grace period
    pub drained: bool,
    /// Tasks left running when the grace period expired
    pub abandoned: usize,
    pub stats: StatsSnapshot,
    pub pool: PoolStats,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.drained && self.abandoned == 0
    }
}

/// Resources that exist only between `start` and `stop`.
struct Active {
    dispatcher: Arc<WatchDispatcher>,
    pool: Arc<WorkerPool>,
    token: ShutdownToken,
    subscriptions: Vec<Box<dyn Subscription>>,
}

pub struct Orchestrator {
    config: PipelineConfig,
    source: Arc<dyn WatchSource>,
    handler: Arc<dyn ArchiveHandler>,
    state: Mutex<LifecycleState>,
    active: Mutex<Option<Active>>,
    control_tx: Sender<ControlEvent>,
    control_rx: Mutex<Receiver<ControlEvent>>,
    shutdown_requested: Arc<AtomicBool>,
    /// Set once a start has succeeded
    has_run: AtomicBool,
    stats: Arc<RunStats>,
}

impl Orchestrator {
    /// Build an orchestrator with the `notify` backend and failing-log extraction.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let source = NotifySource::new(config.backend, config.poll_backend_interval());
        let handler = FailLogHandler::new(config.match_rules());
        Self::new(config, Arc::new(source), Arc::new(handler))
    }

    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn WatchSource>,
        handler: Arc<dyn ArchiveHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let (control_tx, control_rx) = mpsc::channel();
        Ok(Self {
            config,
            source,
            handler,
            state: Mutex::new(LifecycleState::Stopped),
            active: Mutex::new(None),
            control_tx,
            control_rx: Mutex::new(control_rx),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            has_run: AtomicBool::new(false),
            stats: Arc::new(RunStats::new()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.control_tx.clone(),
            requested: Arc::clone(&self.shutdown_requested),
        }
    }

    /// Roots with a live subscription.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.lock_active()
            .as_ref()
            .map(|active| {
                active
                    .subscriptions
                    .iter()
                    .map(|s| s.root().to_path_buf())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: LifecycleState) {
        *self.lock_state() = next;
    }

    /// Subscribe to every usable root and start the pool.
    ///
    /// Returns the roots being watched.
    pub fn start(&self) -> Result<Vec<WatchRoot>> {
        {
            let mut state = self.lock_state();
            if *state != LifecycleState::Stopped {
                return Err(OrchestratorError::InvalidState {
                    action: "start",
                    state: *state,
                });
            }
            *state = LifecycleState::Starting;
        }

        // Requests made before the first start stay queued; leftovers from a
        // previous run do not apply to this one.
        if self.has_run.load(Ordering::SeqCst) {
            self.shutdown_requested.store(false, Ordering::SeqCst);
            let rx = self.control_rx.lock().unwrap_or_else(PoisonError::into_inner);
            while rx.try_recv().is_ok() {}
        }

        match self.establish() {
            Ok((active, roots)) => {
                *self.lock_active() = Some(active);
                self.has_run.store(true, Ordering::SeqCst);
                self.set_state(LifecycleState::Running);
                info!(roots = roots.len(), "Pipeline running");
                Ok(roots)
            }
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<(Active, Vec<WatchRoot>)> {
        let output_root = self
            .config
            .output_root
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("an output root is required".into()))?;
        let output_root = prepare_output_root(output_root)?;

        let roots = resolve_watch_roots(&self.config.watch_roots, self.config.recursive);
        if roots.is_empty() {
            return Err(OrchestratorError::NoUsableRoots);
        }

        let pool = Arc::new(WorkerPool::new("failwatch-worker", self.config.workers)?);
        let token = ShutdownToken::new();
        let intake = Intake::new(
            Debouncer::new(self.config.debounce_window()),
            StabilityProbe::new(StabilityConfig {
                poll_interval: Duration::from_millis(self.config.stability_poll_ms),
                settle_window: Duration::from_millis(self.config.stability_timeout_ms),
                max_wait: Duration::from_secs(self.config.stability_max_wait_secs),
            }),
            DestinationPlan::new(&output_root, self.config.subdir.clone(), self.config.layout),
            Arc::clone(&self.handler),
            Arc::clone(&pool),
            token.clone(),
            Arc::clone(&self.stats),
        );
        let dispatcher = Arc::new(WatchDispatcher::new(
            self.config.normalized_extensions(),
            intake,
            self.control_tx.clone(),
        ));

        let mut subscriptions: Vec<Box<dyn Subscription>> = Vec::with_capacity(roots.len());
        for root in &roots {
            match self.source.subscribe(root, dispatcher.sink()) {
                Ok(subscription) => {
                    info!(
                        root = %root.path.display(),
                        recursive = root.recursive,
                        backend = self.source.name(),
                        "Watching root"
                    );
                    subscriptions.push(subscription);
                }
                Err(e) => {
                    error!(root = %root.path.display(), error = %e, "Failed to watch root");
                    dispatcher.close();
                    let established = subscriptions.len();
                    drop(subscriptions);
                    debug!(released = established, "Released subscriptions after startup failure");
                    token.cancel();
                    pool.drain(None);
                    return Err(e.into());
                }
            }
        }

        debug!(
            output_root = %output_root.display(),
            workers = pool.size(),
            "Pipeline resources ready"
        );
        Ok((
            Active {
                dispatcher,
                pool,
                token,
                subscriptions,
            },
            roots,
        ))
    }

    /// Block until shutdown is requested or every root has failed, then stop.
    pub fn run_until_shutdown(&self) -> Result<ShutdownReport> {
        let state = self.state();
        if state != LifecycleState::Running {
            return Err(OrchestratorError::InvalidState {
                action: "run",
                state,
            });
        }

        {
            let rx = self.control_rx.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                match rx.recv() {
                    Ok(ControlEvent::Shutdown { reason }) => {
                        info!(reason = %reason, "Shutdown requested");
                        break;
                    }
                    Ok(ControlEvent::RootFailed { root, error }) => {
                        let remaining = self.drop_root(&root);
                        warn!(
                            root = %root.display(),
                            error = %error,
                            remaining,
                            "Dropped failed watch root"
                        );
                        if remaining == 0 {
                            warn!("No watch roots left, shutting down");
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        }

        self.stop().ok_or_else(|| OrchestratorError::InvalidState {
            action: "stop",
            state: self.state(),
        })
    }

    /// Release the subscription for `root`; returns how many remain.
    fn drop_root(&self, root: &Path) -> usize {
        let mut active = self.lock_active();
        match active.as_mut() {
            Some(active) => {
                active.subscriptions.retain(|s| s.root() != root);
                active.subscriptions.len()
            }
            None => 0,
        }
    }

    /// Graceful shutdown. Returns `None` if the pipeline was not running,
    /// including when another caller already stopped it.
    pub fn stop(&self) -> Option<ShutdownReport> {
        {
            let mut state = self.lock_state();
            if *state != LifecycleState::Running {
                return None;
            }
            *state = LifecycleState::Stopping;
        }
        self.shutdown_requested.store(true, Ordering::SeqCst);

        let Some(active) = self.lock_active().take() else {
            self.set_state(LifecycleState::Stopped);
            return None;
        };

        info!("Stopping event intake");
        active.dispatcher.close();
        active.token.cancel();

        let grace = self.config.shutdown_grace();
        let drain = active.pool.drain(grace);
        if !drain.completed {
            warn!(
                abandoned = drain.abandoned,
                grace_secs = grace.map(|g| g.as_secs()).unwrap_or(0),
                "Shutdown incomplete: tasks still running after grace period"
            );
        }

        let released = active.subscriptions.len();
        drop(active.subscriptions);
        debug!(released, "Released watch subscriptions");

        self.set_state(LifecycleState::Stopped);

        let stats = self.stats.snapshot();
        info!(
            accepted = stats.archives_accepted,
            extracted = stats.archives_extracted,
            artifacts = stats.artifacts_written,
            bytes = stats.bytes_written,
            failed = stats.tasks_failed,
            abandoned_probes = stats.probes_abandoned,
            "Shutdown complete"
        );

        Some(ShutdownReport {
            drained: drain.completed,
            abandoned: drain.abandoned,
            stats,
            pool: active.pool.stats(),
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Running {
            let _ = self.stop();
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("source", &self.source.name())
            .field("roots", &self.config.watch_roots)
            .finish()
    }
}

/// Create the output root and check that files can be created in it.
pub fn prepare_output_root(path: &Path) -> Result<PathBuf> {
    let unusable = |source| OrchestratorError::OutputRoot {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(path).map_err(unusable)?;
    let resolved = path.canonicalize().map_err(unusable)?;
    tempfile::Builder::new()
        .prefix(".failwatch-probe-")
        .tempfile_in(&resolved)
        .map_err(unusable)?;
    Ok(resolved)
}

/// Resolve configured roots to absolute directories.
///
/// Missing paths and non-directories are logged and skipped; duplicates
/// collapse to one root.
pub fn resolve_watch_roots(paths: &[PathBuf], recursive: bool) -> Vec<WatchRoot> {
    let mut roots: Vec<WatchRoot> = Vec::with_capacity(paths.len());
    for path in paths {
        let resolved = match path.canonicalize() {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(root = %path.display(), error = %e, "Watch root does not exist, skipping");
                continue;
            }
        };
        if !resolved.is_dir() {
            warn!(root = %path.display(), "Watch root is not a directory, skipping");
            continue;
        }
        if roots.iter().any(|r| r.path == resolved) {
            debug!(root = %resolved.display(), "Duplicate watch root");
            continue;
        }
        roots.push(WatchRoot::new(resolved, recursive));
    }
    roots
}
