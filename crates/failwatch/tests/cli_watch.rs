//! Process-level tests for the failwatch binary

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn failwatch_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_failwatch"))
}

fn failwatch(home: &Path) -> Command {
    let mut cmd = Command::new(failwatch_bin());
    cmd.env("FAILWATCH_HOME", home)
        .env_remove("FAILWATCH_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("failwatch did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_too_few_arguments_is_usage_error() {
    let temp = TempDir::new().unwrap();
    let output = failwatch(temp.path())
        .arg(temp.path())
        .output()
        .expect("Failed to run failwatch");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn test_no_usable_watch_root_exits_with_failure() {
    let temp = TempDir::new().unwrap();
    let output = failwatch(temp.path())
        .args(["--no-log-file"])
        .arg(temp.path().join("does-not-exist"))
        .arg(temp.path().join("out"))
        .output()
        .expect("Failed to run failwatch");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("watch roots"), "stderr: {stderr}");
}

#[test]
fn test_log_file_is_written_under_home() {
    let temp = TempDir::new().unwrap();
    let output = failwatch(temp.path())
        .arg(temp.path().join("missing"))
        .arg(temp.path().join("out"))
        .output()
        .expect("Failed to run failwatch");

    assert_eq!(output.status.code(), Some(1));
    let logs = temp.path().join("logs");
    assert!(logs.join("failwatch.log").exists());
}

#[test]
fn test_unwritable_log_home_keeps_console_logging() {
    let temp = TempDir::new().unwrap();
    let home = temp.path().join("home-is-a-file");
    fs::write(&home, b"not a directory").unwrap();

    let output = failwatch(&home)
        .arg(temp.path().join("missing"))
        .arg(temp.path().join("out"))
        .output()
        .expect("Failed to run failwatch");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Log file disabled"), "stderr: {stderr}");
    assert!(
        stderr.contains("Watch root does not exist, skipping"),
        "stderr: {stderr}"
    );
}

#[cfg(unix)]
#[test]
fn test_extracts_then_stops_on_sigterm() {
    let temp = TempDir::new().unwrap();
    let incoming = temp.path().join("incoming");
    let output_root = temp.path().join("triage");
    fs::create_dir_all(&incoming).unwrap();

    let mut child = failwatch(temp.path())
        .args([
            "--no-log-file",
            "--debounce-ms",
            "200",
            "--stability-ms",
            "200",
            "--grace-secs",
            "10",
        ])
        .arg(&incoming)
        .arg(&output_root)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn failwatch");

    // Wait for startup (the output root is created before watching begins).
    let deadline = Instant::now() + Duration::from_secs(10);
    while !output_root.exists() {
        assert!(Instant::now() < deadline, "failwatch never started");
        thread::sleep(Duration::from_millis(50));
    }
    thread::sleep(Duration::from_millis(500));

    let staging = temp.path().join("run42.zip");
    {
        let mut zip = ZipWriter::new(File::create(&staging).unwrap());
        zip.start_file("boot.log", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"[00:09] FAIL: timeout waiting for dut\n").unwrap();
        zip.start_file("env.log", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"[00:00] env OK\n").unwrap();
        zip.finish().unwrap();
    }
    fs::rename(&staging, incoming.join("run42.zip")).unwrap();

    let artifact = output_root.join("fail").join("boot.log");
    let deadline = Instant::now() + Duration::from_secs(20);
    while !artifact.exists() {
        assert!(Instant::now() < deadline, "artifact never appeared");
        thread::sleep(Duration::from_millis(50));
    }

    let pid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    thread::sleep(Duration::from_millis(20));
    // A second signal during the drain must not change the outcome.
    unsafe {
        libc::kill(pid, libc::SIGINT);
    }

    let status = wait_with_timeout(&mut child, Duration::from_secs(20));
    assert!(status.success(), "exit status: {status:?}");
    assert_eq!(
        fs::read(&artifact).unwrap(),
        b"[00:09] FAIL: timeout waiting for dut\n"
    );
    assert!(!output_root.join("fail").join("env.log").exists());
}
