//! Write-completion detection by size polling

use crate::cancel::ShutdownToken;
use crate::debounce::PendingJob;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// Probe timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityConfig {
    /// Time between size checks
    pub poll_interval: Duration,
    /// How long the size must stay unchanged
    pub settle_window: Duration,
    /// Give up after this long without settling
    pub max_wait: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            settle_window: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable { size: u64 },
    /// The file disappeared while being probed
    Vanished,
    /// The path exists but is not a regular file
    NotAFile,
    /// Still changing when `max_wait` ran out
    Unsettled { waited: Duration },
    /// Shutdown was requested
    Cancelled,
}

enum Observation {
    Size(u64),
    Vanished,
    NotAFile,
}

fn observe(path: &Path) -> Observation {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Observation::Size(meta.len()),
        Ok(_) => Observation::NotAFile,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Observation::Vanished,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Stat failed during stability probe");
            Observation::Vanished
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityProbe {
    config: StabilityConfig,
}

impl StabilityProbe {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Block until the job's file has kept one size for the settle window.
    ///
    /// Updates `job.last_size` and `job.last_seen` as it observes changes.
    pub fn wait(&self, job: &mut PendingJob, token: &ShutdownToken) -> Stability {
        let started = Instant::now();
        match observe(&job.path) {
            Observation::Size(size) => {
                job.last_size = Some(size);
                job.last_seen = started;
            }
            Observation::Vanished => return Stability::Vanished,
            Observation::NotAFile => return Stability::NotAFile,
        }

        loop {
            if token.wait_timeout(self.config.poll_interval) {
                return Stability::Cancelled;
            }

            let now = Instant::now();
            let size = match observe(&job.path) {
                Observation::Size(size) => size,
                Observation::Vanished => return Stability::Vanished,
                Observation::NotAFile => return Stability::NotAFile,
            };

            if job.last_size != Some(size) {
                job.last_size = Some(size);
                job.last_seen = now;
            } else if now.duration_since(job.last_seen) >= self.config.settle_window {
                return Stability::Stable { size };
            }

            let waited = now.duration_since(started);
            if waited >= self.config.max_wait {
                return Stability::Unsettled { waited };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::thread;
    use tempfile::TempDir;

    fn fast() -> StabilityProbe {
        StabilityProbe::new(StabilityConfig {
            poll_interval: Duration::from_millis(10),
            settle_window: Duration::from_millis(100),
            max_wait: Duration::from_secs(10),
        })
    }

    fn job_for(path: PathBuf) -> PendingJob {
        let now = Instant::now();
        PendingJob {
            path,
            last_size: None,
            last_seen: now,
            queued_at: now,
        }
    }

    #[test]
    fn test_quiet_file_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("done.zip");
        fs::write(&path, b"PK complete").unwrap();

        let mut job = job_for(path);
        let started = Instant::now();
        let outcome = fast().wait(&mut job, &ShutdownToken::new());

        assert_eq!(outcome, Stability::Stable { size: 11 });
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(job.last_size, Some(11));
    }

    #[test]
    fn test_growth_resets_window() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("growing.zip");
        fs::write(&path, b"x").unwrap();

        let writer = {
            let path = path.clone();
            thread::spawn(move || {
                let mut file = OpenOptions::new().append(true).open(&path).unwrap();
                for _ in 0..5 {
                    thread::sleep(Duration::from_millis(40));
                    file.write_all(b"more").unwrap();
                    file.flush().unwrap();
                }
            })
        };

        let mut job = job_for(path);
        let started = Instant::now();
        let outcome = fast().wait(&mut job, &ShutdownToken::new());
        writer.join().unwrap();

        assert_eq!(outcome, Stability::Stable { size: 21 });
        // Five appends 40 ms apart, then a full settle window.
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_never_settling_file_is_abandoned() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("endless.zip");
        fs::write(&path, b"x").unwrap();

        let token = ShutdownToken::new();
        let writer = {
            let path = path.clone();
            let token = token.clone();
            thread::spawn(move || {
                let mut file = OpenOptions::new().append(true).open(&path).unwrap();
                while !token.wait_timeout(Duration::from_millis(15)) {
                    file.write_all(b"x").unwrap();
                    file.flush().unwrap();
                }
            })
        };

        let probe = StabilityProbe::new(StabilityConfig {
            poll_interval: Duration::from_millis(10),
            settle_window: Duration::from_millis(200),
            max_wait: Duration::from_millis(400),
        });
        let mut job = job_for(path);
        let outcome = probe.wait(&mut job, &ShutdownToken::new());
        token.cancel();
        writer.join().unwrap();

        assert!(matches!(outcome, Stability::Unsettled { waited } if waited >= Duration::from_millis(400)));
    }

    #[test]
    fn test_missing_file_vanishes() {
        let temp = TempDir::new().unwrap();
        let mut job = job_for(temp.path().join("never.zip"));
        assert_eq!(fast().wait(&mut job, &ShutdownToken::new()), Stability::Vanished);
    }

    #[test]
    fn test_deleted_mid_probe_vanishes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("temp.zip");
        fs::write(&path, b"partial").unwrap();

        let remover = {
            let path = path.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                fs::remove_file(&path).unwrap();
            })
        };

        let mut job = job_for(path);
        let outcome = fast().wait(&mut job, &ShutdownToken::new());
        remover.join().unwrap();
        assert_eq!(outcome, Stability::Vanished);
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("folder.zip");
        fs::create_dir(&dir).unwrap();

        let mut job = job_for(dir);
        assert_eq!(fast().wait(&mut job, &ShutdownToken::new()), Stability::NotAFile);
    }

    #[test]
    fn test_shutdown_cancels_probe() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("slow.zip");
        fs::write(&path, b"x").unwrap();

        let token = ShutdownToken::new();
        token.cancel();
        let mut job = job_for(path);
        assert_eq!(fast().wait(&mut job, &token), Stability::Cancelled);
    }
}
