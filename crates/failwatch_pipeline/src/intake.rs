//! Gate between qualifying events and the worker pool
//!
//! `offer` runs on the notification thread, so it only touches the
//! debounce map and the pool queue. The stability probe and the extraction
//! both run inside the pool job.

use crate::cancel::ShutdownToken;
use crate::config::DestinationPlan;
use crate::debounce::{Admission, AdmissionTicket, Debouncer};
use crate::error::PoolError;
use crate::handler::{ArchiveHandler, ExtractionTask};
use crate::pool::{JobResult, WorkerPool};
use crate::stability::{Stability, StabilityProbe};
use crate::stats::RunStats;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to an offered path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Admitted and queued for probing
    Queued,
    /// Dropped: a job for the path is already active
    InFlight,
    /// Dropped: enqueued within the debounce window
    Debounced,
    /// Dropped: the pool no longer accepts jobs
    Closed,
}

pub struct Intake {
    debouncer: Debouncer,
    probe: StabilityProbe,
    plan: DestinationPlan,
    handler: Arc<dyn ArchiveHandler>,
    pool: Arc<WorkerPool>,
    token: ShutdownToken,
    stats: Arc<RunStats>,
}

impl Intake {
    pub fn new(
        debouncer: Debouncer,
        probe: StabilityProbe,
        plan: DestinationPlan,
        handler: Arc<dyn ArchiveHandler>,
        pool: Arc<WorkerPool>,
        token: ShutdownToken,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            debouncer,
            probe,
            plan,
            handler,
            pool,
            token,
            stats,
        }
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Admit `path` and queue its probe-then-extract job. Never blocks on I/O.
    pub fn offer(&self, path: &Path) -> Offer {
        if self.token.is_cancelled() {
            return Offer::Closed;
        }

        let ticket = match self.debouncer.admit(path) {
            Admission::Admitted(ticket) => ticket,
            Admission::InFlight => {
                self.stats.record_suppressed();
                debug!(archive = %path.display(), "Dropping event, archive already in flight");
                return Offer::InFlight;
            }
            Admission::Debounced => {
                self.stats.record_suppressed();
                debug!(archive = %path.display(), "Dropping duplicate event within debounce window");
                return Offer::Debounced;
            }
        };

        let job = ArchiveJob {
            ticket,
            probe: self.probe,
            plan: self.plan.clone(),
            handler: Arc::clone(&self.handler),
            token: self.token.clone(),
            stats: Arc::clone(&self.stats),
        };

        // A rejected job is dropped with its ticket, which frees the path.
        match self.pool.submit(path.display().to_string(), move || job.run()) {
            Ok(()) => Offer::Queued,
            Err(PoolError::Closed) => {
                debug!(archive = %path.display(), "Pool closed, dropping event");
                Offer::Closed
            }
            Err(e) => {
                warn!(archive = %path.display(), error = %e, "Failed to queue archive");
                Offer::Closed
            }
        }
    }
}

/// Probe-then-extract job for one admitted path.
struct ArchiveJob {
    ticket: AdmissionTicket,
    probe: StabilityProbe,
    plan: DestinationPlan,
    handler: Arc<dyn ArchiveHandler>,
    token: ShutdownToken,
    stats: Arc<RunStats>,
}

impl ArchiveJob {
    fn run(mut self) -> JobResult {
        let outcome = self.probe.wait(self.ticket.job_mut(), &self.token);
        let archive = self.ticket.path().to_path_buf();

        let size = match outcome {
            Stability::Stable { size } => size,
            Stability::Vanished => {
                self.stats.record_abandoned_probe();
                debug!(archive = %archive.display(), "Archive vanished before it settled");
                return Ok(());
            }
            Stability::NotAFile => {
                debug!(archive = %archive.display(), "Path is not a regular file, ignoring");
                return Ok(());
            }
            Stability::Unsettled { waited } => {
                self.stats.record_abandoned_probe();
                warn!(
                    archive = %archive.display(),
                    waited_secs = waited.as_secs(),
                    "Archive never stopped changing, giving up"
                );
                return Ok(());
            }
            Stability::Cancelled => {
                self.stats.record_abandoned_probe();
                debug!(archive = %archive.display(), "Shutdown requested, abandoning probe");
                return Ok(());
            }
        };

        self.ticket.promote();
        self.stats.record_accepted();
        let task = ExtractionTask {
            destination: self.plan.destination_for(&archive),
            archive,
        };
        info!(
            archive = %task.archive.display(),
            size,
            queued_ms = self.ticket.job().queued_at.elapsed().as_millis() as u64,
            "Archive accepted"
        );

        match self.handler.handle(&task) {
            Ok(report) => {
                self.stats.record_extracted(
                    report.artifacts.len() as u64,
                    report.bytes_written(),
                    report.skipped.len() as u64,
                );
                if report.artifacts.is_empty() {
                    info!(
                        archive = %task.archive.display(),
                        scanned = report.members_scanned,
                        "No failing logs found"
                    );
                } else {
                    info!(
                        archive = %task.archive.display(),
                        artifacts = report.artifacts.len(),
                        bytes = report.bytes_written(),
                        destination = %task.destination.display(),
                        "Extracted failing logs"
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.stats.record_failed();
                debug!(archive = %task.archive.display(), kind = err.kind(), "Extraction aborted");
                Err(Box::new(err))
            }
        }
    }
}
