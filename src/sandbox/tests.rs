//! Unit tests for sandbox scanning and report-once accounting.

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::rstest;
use tempfile::TempDir;

use crate::test_support::CountingScanner;

use super::*;

fn sandbox_with(files: &[(&str, &str)]) -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("create sandbox dir");
    let path = Utf8PathBuf::from(dir.path().display().to_string());
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).expect("write log file");
    }
    (dir, path)
}

fn pattern_monitor(path: &Utf8PathBuf, ignore: bool) -> SandboxMonitor {
    let scanner = Arc::new(PatternScanner::new().expect("default patterns compile"));
    SandboxMonitor::new(path.clone(), "sandbox-test", ignore, scanner)
}

#[rstest]
#[case("out of memory while parsing", true)]
#[case("java.lang.RuntimeException: boom", true)]
#[case("ERROR: water leak", true)]
#[case("assertion failed: lost quorum", true)]
#[case("all quiet on port 54321", false)]
#[case("Exception noise during ShutdownRequested", false)]
fn pattern_scanner_classifies_lines(#[case] line: &str, #[case] fatal: bool) {
    let (_dir, path) = sandbox_with(&[("node-0.stdout.log", line)]);
    let scanner = PatternScanner::new().expect("default patterns compile");
    let found = scanner
        .scan(&ScanRequest {
            log_dir: &path,
            test_name: "sandbox-test",
            ignore_errors: false,
        })
        .expect("scan succeeds");
    assert_eq!(found, fatal);
}

#[rstest]
fn non_log_files_are_skipped() {
    let (_dir, path) = sandbox_with(&[("peers.txt", "ERROR: not a log file")]);
    let scanner = PatternScanner::new().expect("default patterns compile");
    let found = scanner
        .scan(&ScanRequest {
            log_dir: &path,
            test_name: "sandbox-test",
            ignore_errors: false,
        })
        .expect("scan succeeds");
    assert!(!found);
}

#[rstest]
fn missing_directory_is_an_io_error() {
    let scanner = PatternScanner::new().expect("default patterns compile");
    let missing = Utf8PathBuf::from("definitely/not/here");
    let err = scanner
        .scan(&ScanRequest {
            log_dir: &missing,
            test_name: "sandbox-test",
            ignore_errors: false,
        })
        .expect_err("missing dir should fail");
    assert!(matches!(err, SandboxError::Io { .. }));
}

#[rstest]
fn monitor_reports_once_and_caches() {
    let scanner = Arc::new(CountingScanner::new(true));
    let monitor = SandboxMonitor::new(
        "sandbox",
        "sandbox-test",
        false,
        Arc::clone(&scanner) as Arc<dyn LogScanner>,
    );

    assert_eq!(
        monitor.check(false).expect("first check"),
        ScanOutcome::ErrorsFound
    );
    assert!(monitor.already_reported());
    // Second and third checks return the cached result without scanning.
    assert_eq!(
        monitor.check(false).expect("second check"),
        ScanOutcome::AlreadyReported
    );
    assert_eq!(
        monitor.check(false).expect("third check"),
        ScanOutcome::AlreadyReported
    );
    assert_eq!(scanner.scan_count(), 1);
}

#[rstest]
fn assert_clean_raises_once_then_suppresses() {
    let scanner = Arc::new(CountingScanner::new(true));
    let monitor = SandboxMonitor::new(
        "sandbox",
        "sandbox-test",
        false,
        Arc::clone(&scanner) as Arc<dyn LogScanner>,
    );

    let err = monitor
        .assert_clean(false)
        .expect_err("first detection raises");
    assert!(matches!(err, SandboxError::ErrorsDetected { .. }));
    // Racing call sites must not surface the same failure again.
    monitor
        .assert_clean(false)
        .expect("already-reported failure is suppressed");
    assert_eq!(scanner.scan_count(), 1);
}

#[rstest]
fn ignore_policy_downgrades_findings() {
    let (_dir, path) = sandbox_with(&[("node-0.stderr.log", "ERROR: boom")]);
    let monitor = pattern_monitor(&path, true);
    monitor
        .assert_clean(false)
        .expect("base ignore policy downgrades the finding");

    let (_dir2, path2) = sandbox_with(&[("node-0.stderr.log", "ERROR: boom")]);
    let strict = pattern_monitor(&path2, false);
    strict
        .assert_clean(true)
        .expect("extra ignore downgrades the finding");
}

#[rstest]
fn clean_logs_stay_clean() {
    let (_dir, path) = sandbox_with(&[("node-0.stdout.log", "cloud formed of size 2")]);
    let monitor = pattern_monitor(&path, false);
    assert_eq!(monitor.check(false).expect("scan"), ScanOutcome::Clean);
    assert_eq!(monitor.check(false).expect("scan"), ScanOutcome::Clean);
    assert!(!monitor.already_reported());
}
