//! Bounded worker pool (sync version)
//!
//! N named threads pull boxed jobs from one shared std channel. `submit`
//! never blocks on job execution. Every job returns an explicit
//! [`JobResult`]; errors and panics are caught at the job boundary, logged
//! with the job label, and counted. Nothing a job does can take a worker
//! down.
//!
//! # Drain
//!
//! [`WorkerPool::drain`] closes the intake (later submissions get
//! [`PoolError::Closed`]), then waits until every accepted job has finished
//! or the grace period runs out. Jobs still queued or running at that point
//! are reported as abandoned; their threads are detached.

use crate::error::PoolError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Error returned by a job. Logged by the pool, never propagated.
pub type JobError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Explicit result every job hands back to the pool.
pub type JobResult = Result<(), JobError>;

type JobFn = Box<dyn FnOnce() -> JobResult + Send + 'static>;

struct Job {
    label: String,
    run: JobFn,
}

/// Count of accepted-but-unfinished jobs with a wakeup for drain.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn begin(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn current(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for zero outstanding jobs. Returns `false` on timeout.
    fn wait_idle(&self, grace: Option<Duration>) -> bool {
        let deadline = grace.map(|g| Instant::now() + g);
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            match deadline {
                None => {
                    count = self.idle.wait(count).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    count = self
                        .idle
                        .wait_timeout(count, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Job outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
}

/// What `drain` observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Every accepted job finished
    pub completed: bool,
    /// Jobs still queued or running when the grace period ran out
    pub abandoned: usize,
}

pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    outstanding: Arc<Outstanding>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `size` workers named `<name>-<n>`.
    pub fn new(name: &str, size: usize) -> Result<Self, PoolError> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let outstanding = Arc::new(Outstanding::default());

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            let outstanding = Arc::clone(&outstanding);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(rx, counters, outstanding))
                .map_err(PoolError::Spawn)?;
            workers.push(handle);
        }
        debug!(pool = name, workers = size, "Worker pool started");

        Ok(Self {
            name: name.to_string(),
            size,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            outstanding,
            counters,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs accepted but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.outstanding.current()
    }

    pub fn is_accepting(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Queue a job and return immediately.
    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> JobResult + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return Err(PoolError::Closed);
        };

        self.outstanding.begin();
        let job = Job {
            label: label.into(),
            run: Box::new(job),
        };
        if tx.send(job).is_err() {
            self.outstanding.finish();
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    /// Stop accepting jobs and wait for the accepted ones.
    ///
    /// `grace` of `None` waits without limit. Safe to call more than once.
    pub fn drain(&self, grace: Option<Duration>) -> DrainReport {
        // Dropping the sender lets idle workers exit once the queue is empty.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let completed = self.outstanding.wait_idle(grace);
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        if completed {
            for worker in workers {
                if worker.join().is_err() {
                    error!(pool = %self.name, "Worker thread exited abnormally");
                }
            }
            DrainReport {
                completed: true,
                abandoned: 0,
            }
        } else {
            let abandoned = self.outstanding.current();
            warn!(
                pool = %self.name,
                abandoned,
                "Drain grace period expired with jobs still outstanding"
            );
            DrainReport {
                completed: false,
                abandoned,
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers finish the queue and exit on their own.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("outstanding", &self.outstanding.current())
            .finish()
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>, counters: Arc<Counters>, outstanding: Arc<Outstanding>) {
    loop {
        let next = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        let Ok(job) = next else {
            break;
        };
        run_job(job, &counters);
        outstanding.finish();
    }
}

fn run_job(job: Job, counters: &Counters) {
    let Job { label, run } = job;
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(())) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(err)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(job = %label, error = %err, "Job failed");
        }
        Err(payload) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(job = %label, panic = %panic_message(payload.as_ref()), "Job panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_submit_runs_jobs() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let ran = Arc::clone(&ran);
            pool.submit(format!("job-{i}"), move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        let report = pool.drain(None);
        assert!(report.completed);
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().succeeded, 10);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("bounded", 3).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..12 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pool.submit(format!("job-{i}"), move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        assert!(pool.drain(None).completed);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_submit_does_not_wait_for_execution() {
        let pool = WorkerPool::new("nonblocking", 1).unwrap();
        let started = Instant::now();
        for i in 0..5 {
            pool.submit(format!("slow-{i}"), || {
                thread::sleep(Duration::from_millis(50));
                Ok(())
            })
            .unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        pool.drain(None);
    }

    #[test]
    fn test_failures_and_panics_are_contained() {
        let pool = WorkerPool::new("faulty", 1).unwrap();
        let after = Arc::new(AtomicUsize::new(0));

        pool.submit("/in/bad.zip", || Err("corrupt archive".into()))
            .unwrap();
        pool.submit("/in/worse.zip", || panic!("boom")).unwrap();
        {
            let after = Arc::clone(&after);
            pool.submit("/in/good.zip", move || {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        assert!(pool.drain(None).completed);
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                succeeded: 1,
                failed: 1,
                panicked: 1
            }
        );
    }

    #[test]
    fn test_submit_after_drain_is_rejected() {
        let pool = WorkerPool::new("closed", 1).unwrap();
        pool.drain(None);

        assert!(!pool.is_accepting());
        assert!(matches!(pool.submit("late", || Ok(())), Err(PoolError::Closed)));
        // Second drain is a no-op.
        assert!(pool.drain(Some(Duration::from_millis(10))).completed);
    }

    #[test]
    fn test_drain_waits_for_running_jobs() {
        let pool = WorkerPool::new("drain", 2).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..4 {
            let done = Arc::clone(&done);
            pool.submit(format!("job-{i}"), move || {
                thread::sleep(Duration::from_millis(30));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        let report = pool.drain(Some(Duration::from_secs(10)));
        assert_eq!(report, DrainReport { completed: true, abandoned: 0 });
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_drain_grace_abandons_stragglers() {
        let pool = WorkerPool::new("grace", 1).unwrap();
        let release = crate::cancel::ShutdownToken::new();
        for i in 0..3 {
            let release = release.clone();
            pool.submit(format!("stuck-{i}"), move || {
                release.wait_timeout(Duration::from_secs(30));
                Ok(())
            })
            .unwrap();
        }

        let started = Instant::now();
        let report = pool.drain(Some(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!report.completed);
        assert_eq!(report.abandoned, 3);

        release.cancel();
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let pool = WorkerPool::new("tiny", 0).unwrap();
        assert_eq!(pool.size(), 1);
        pool.drain(None);
    }
}
