//! Per-path admission control
//!
//! A path is admitted at most once at a time. While a job for it is being
//! probed or extracted, further events are dropped; after it was handed to
//! extraction, events within the debounce window are dropped as well.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Entries older than this many windows are pruned on the next admission.
const PRUNE_AFTER_WINDOWS: u32 = 60;
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    /// Admitted, stability probe running
    Probing,
    /// Handed to extraction at the given instant
    Extracting { enqueued_at: Instant },
    /// Last extraction finished; debounce measured from its enqueue time
    Settled { enqueued_at: Instant },
}

/// A path waiting to become an extraction task.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub path: PathBuf,
    /// Size seen by the most recent probe poll
    pub last_size: Option<u64>,
    /// When the size last changed
    pub last_seen: Instant,
    /// When the job was admitted
    pub queued_at: Instant,
}

impl PendingJob {
    fn new(path: PathBuf) -> Self {
        let now = Instant::now();
        Self {
            path,
            last_size: None,
            last_seen: now,
            queued_at: now,
        }
    }
}

/// Result of offering a path to the debouncer.
#[derive(Debug)]
pub enum Admission {
    Admitted(AdmissionTicket),
    /// A job for the path is still being probed or extracted
    InFlight,
    /// The last job for the path was enqueued within the window
    Debounced,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<PathBuf, PathState>,
}

/// Mutex-guarded `path -> state` map owned by one running pipeline.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    entries: Arc<Mutex<Entries>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(Entries::default())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-then-insert under one lock acquisition.
    pub fn admit(&self, path: &Path) -> Admission {
        let now = Instant::now();
        let mut entries = self.lock();

        if entries.map.len() >= PRUNE_THRESHOLD {
            let horizon = self.window * PRUNE_AFTER_WINDOWS;
            entries.map.retain(|_, state| match state {
                PathState::Settled { enqueued_at } => now.duration_since(*enqueued_at) < horizon,
                _ => true,
            });
        }

        match entries.map.get(path) {
            Some(PathState::Probing) | Some(PathState::Extracting { .. }) => {
                return Admission::InFlight;
            }
            Some(PathState::Settled { enqueued_at })
                if now.duration_since(*enqueued_at) < self.window =>
            {
                return Admission::Debounced;
            }
            _ => {}
        }

        let previous = entries.map.insert(path.to_path_buf(), PathState::Probing);
        drop(entries);

        Admission::Admitted(AdmissionTicket {
            debouncer: self.clone(),
            job: PendingJob::new(path.to_path_buf()),
            previous,
            promoted: None,
        })
    }

    /// Number of tracked paths.
    pub fn tracked(&self) -> usize {
        self.lock().map.len()
    }

    /// Whether a job for `path` is currently probing or extracting.
    pub fn is_in_flight(&self, path: &Path) -> bool {
        matches!(
            self.lock().map.get(path),
            Some(PathState::Probing) | Some(PathState::Extracting { .. })
        )
    }

    fn set(&self, path: &Path, state: PathState) {
        self.lock().map.insert(path.to_path_buf(), state);
    }

    fn release(&self, path: &Path, promoted: Option<Instant>, previous: Option<PathState>) {
        let mut entries = self.lock();
        match (promoted, previous) {
            (Some(enqueued_at), _) => {
                entries.map.insert(path.to_path_buf(), PathState::Settled { enqueued_at });
            }
            (None, Some(settled @ PathState::Settled { .. })) => {
                entries.map.insert(path.to_path_buf(), settled);
            }
            (None, _) => {
                entries.map.remove(path);
            }
        }
    }
}

/// Exclusive claim on one path. Dropping it releases the path.
///
/// An unpromoted ticket (the job was abandoned) restores the path's previous
/// debounce state; a promoted ticket starts a new debounce window from its
/// promotion time.
#[derive(Debug)]
pub struct AdmissionTicket {
    debouncer: Debouncer,
    job: PendingJob,
    previous: Option<PathState>,
    promoted: Option<Instant>,
}

impl AdmissionTicket {
    pub fn job(&self) -> &PendingJob {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut PendingJob {
        &mut self.job
    }

    pub fn path(&self) -> &Path {
        &self.job.path
    }

    /// Mark the job as handed to extraction.
    pub fn promote(&mut self) {
        if self.promoted.is_none() {
            let now = Instant::now();
            self.promoted = Some(now);
            self.debouncer
                .set(&self.job.path, PathState::Extracting { enqueued_at: now });
        }
    }

    pub fn is_promoted(&self) -> bool {
        self.promoted.is_some()
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.debouncer
            .release(&self.job.path, self.promoted, self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn admitted(admission: Admission) -> AdmissionTicket {
        match admission {
            Admission::Admitted(ticket) => ticket,
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[test]
    fn test_second_event_while_probing_is_in_flight() {
        let debouncer = Debouncer::new(Duration::from_secs(1));
        let path = Path::new("/in/run42.zip");

        let _ticket = admitted(debouncer.admit(path));
        assert!(matches!(debouncer.admit(path), Admission::InFlight));
        assert!(debouncer.is_in_flight(path));
    }

    #[test]
    fn test_distinct_paths_are_independent() {
        let debouncer = Debouncer::new(Duration::from_secs(1));
        let _a = admitted(debouncer.admit(Path::new("/in/a.zip")));
        let _b = admitted(debouncer.admit(Path::new("/in/b.zip")));
        assert_eq!(debouncer.tracked(), 2);
    }

    #[test]
    fn test_promoted_path_is_debounced_after_release() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let path = Path::new("/in/run42.zip");

        let mut ticket = admitted(debouncer.admit(path));
        ticket.promote();
        assert!(matches!(debouncer.admit(path), Admission::InFlight));
        drop(ticket);

        assert!(!debouncer.is_in_flight(path));
        assert!(matches!(debouncer.admit(path), Admission::Debounced));
    }

    #[test]
    fn test_window_expiry_readmits() {
        let debouncer = Debouncer::new(Duration::from_millis(20));
        let path = Path::new("/in/run42.zip");

        let mut ticket = admitted(debouncer.admit(path));
        ticket.promote();
        drop(ticket);

        thread::sleep(Duration::from_millis(40));
        let _again = admitted(debouncer.admit(path));
    }

    #[test]
    fn test_abandoned_ticket_frees_path() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let path = Path::new("/in/vanished.zip");

        let ticket = admitted(debouncer.admit(path));
        drop(ticket);

        assert_eq!(debouncer.tracked(), 0);
        let _again = admitted(debouncer.admit(path));
    }

    #[test]
    fn test_abandoned_ticket_keeps_previous_window() {
        let debouncer = Debouncer::new(Duration::from_millis(200));
        let path = Path::new("/in/run42.zip");

        let mut first = admitted(debouncer.admit(path));
        first.promote();
        drop(first);

        // Window passes, a second job is admitted and then abandoned.
        thread::sleep(Duration::from_millis(250));
        let second = admitted(debouncer.admit(path));
        drop(second);

        assert_eq!(debouncer.tracked(), 1);
        let _third = admitted(debouncer.admit(path));
    }

    #[test]
    fn test_concurrent_admission_admits_once() {
        let debouncer = Debouncer::new(Duration::from_secs(60));
        let admitted_count = Arc::new(AtomicUsize::new(0));
        let tickets = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let debouncer = debouncer.clone();
                let admitted_count = Arc::clone(&admitted_count);
                let tickets = Arc::clone(&tickets);
                thread::spawn(move || {
                    if let Admission::Admitted(ticket) = debouncer.admit(Path::new("/in/hot.zip")) {
                        admitted_count.fetch_add(1, Ordering::SeqCst);
                        tickets.lock().unwrap().push(ticket);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted_count.load(Ordering::SeqCst), 1);
    }
}
