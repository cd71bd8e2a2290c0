//! Sandbox log scanning and report-once error accounting.
//!
//! The harness treats the actual log-scraping heuristics as an external
//! collaborator behind [`LogScanner`]; [`PatternScanner`] is the default
//! implementation, matching fatal patterns over the accumulated node logs in
//! the sandbox directory. [`SandboxMonitor`] wraps a scanner with the
//! cluster-wide report-once flag: several call sites (mid-run stalls,
//! per-test teardown, class-level teardown) may race to check the logs, and a
//! single detected failure must be surfaced exactly once.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use regex::RegexSet;
use thiserror::Error;
use tracing::warn;

/// Errors raised by sandbox scanning.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SandboxError {
    /// Raised when the sandbox directory or a log file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the fatal-pattern set cannot be compiled.
    #[error("invalid log pattern: {message}")]
    Pattern {
        /// Regex compiler error message.
        message: String,
    },
    /// Raised when fatal patterns were found in the node logs.
    #[error("fatal patterns found in node logs under {log_dir} (test {test_name})")]
    ErrorsDetected {
        /// Sandbox directory that was scanned.
        log_dir: Utf8PathBuf,
        /// Test the logs belong to.
        test_name: String,
    },
}

/// What happened on one monitor check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanOutcome {
    /// A previous check already found and reported errors; no scan was run.
    AlreadyReported,
    /// The scan ran and found nothing fatal.
    Clean,
    /// The scan ran and found fatal patterns; the report-once flag is now
    /// set.
    ErrorsFound,
}

/// One scan request handed to a [`LogScanner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanRequest<'a> {
    /// Directory holding the accumulated node logs.
    pub log_dir: &'a Utf8Path,
    /// Name of the running test, for diagnostics.
    pub test_name: &'a str,
    /// Whether found patterns should be downgraded to warnings.
    pub ignore_errors: bool,
}

/// External collaborator that scans accumulated output for fatal patterns.
pub trait LogScanner: Send + Sync {
    /// Scans the logs and reports whether fatal patterns were found.
    ///
    /// When `ignore_errors` is set the scanner still reports what it found so
    /// the caller can log it, but implementations should not treat the scan
    /// as fatal themselves.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the logs cannot be read.
    fn scan(&self, request: &ScanRequest<'_>) -> Result<bool, SandboxError>;
}

/// Default fatal patterns: crash markers the worker processes are known to
/// emit before dying.
const DEFAULT_PATTERNS: [&str; 4] = [
    r"(?i)exception",
    r"\bERROR\b",
    r"(?i)out of memory",
    r"(?i)assertion (failed|error)",
];

/// Substrings that downgrade an otherwise fatal line (shutdown noise).
const BENIGN_MARKERS: [&str; 2] = ["ShutdownRequested", "connection reset by peer"];

/// Regex-based scanner over `*.log` files in the sandbox directory.
#[derive(Clone, Debug)]
pub struct PatternScanner {
    patterns: RegexSet,
}

impl PatternScanner {
    /// Creates a scanner with the default fatal patterns.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Pattern`] when a pattern fails to compile.
    pub fn new() -> Result<Self, SandboxError> {
        Self::with_patterns(&DEFAULT_PATTERNS)
    }

    /// Creates a scanner with caller-supplied patterns.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Pattern`] when a pattern fails to compile.
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, SandboxError> {
        let compiled = RegexSet::new(patterns.iter().map(AsRef::as_ref)).map_err(|err| {
            SandboxError::Pattern {
                message: err.to_string(),
            }
        })?;
        Ok(Self { patterns: compiled })
    }

    fn line_is_fatal(&self, line: &str) -> bool {
        self.patterns.is_match(line) && !BENIGN_MARKERS.iter().any(|marker| line.contains(marker))
    }
}

impl LogScanner for PatternScanner {
    fn scan(&self, request: &ScanRequest<'_>) -> Result<bool, SandboxError> {
        let entries = fs::read_dir(request.log_dir).map_err(|err| SandboxError::Io {
            path: request.log_dir.to_path_buf(),
            message: err.to_string(),
        })?;

        let mut found = false;
        for entry in entries {
            let entry = entry.map_err(|err| SandboxError::Io {
                path: request.log_dir.to_path_buf(),
                message: err.to_string(),
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|err| SandboxError::Io {
                path: Utf8PathBuf::from(path.display().to_string()),
                message: err.to_string(),
            })?;
            for line in text.lines() {
                if self.line_is_fatal(line) {
                    warn!(
                        test = request.test_name,
                        file = %path.display(),
                        line,
                        "fatal pattern in node log"
                    );
                    found = true;
                }
            }
        }
        Ok(found)
    }
}

/// Report-once wrapper around a [`LogScanner`].
///
/// The flag is set the first time a scan finds errors and never clears for
/// the cluster's lifetime; later checks return a cached outcome without
/// scanning again.
pub struct SandboxMonitor {
    log_dir: Utf8PathBuf,
    test_name: String,
    ignore_errors: bool,
    reported: AtomicBool,
    scanner: Arc<dyn LogScanner>,
}

impl std::fmt::Debug for SandboxMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxMonitor")
            .field("log_dir", &self.log_dir)
            .field("test_name", &self.test_name)
            .field("ignore_errors", &self.ignore_errors)
            .field("reported", &self.reported.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SandboxMonitor {
    /// Creates a monitor over the given scanner.
    #[must_use]
    pub fn new(
        log_dir: impl Into<Utf8PathBuf>,
        test_name: impl Into<String>,
        ignore_errors: bool,
        scanner: Arc<dyn LogScanner>,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            test_name: test_name.into(),
            ignore_errors,
            reported: AtomicBool::new(false),
            scanner,
        }
    }

    /// Returns the sandbox directory the monitor scans.
    #[must_use]
    pub fn log_dir(&self) -> &Utf8Path {
        &self.log_dir
    }

    /// Returns the test name the monitor reports under.
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Returns whether the monitor's base policy downgrades findings.
    #[must_use]
    pub const fn ignores_errors(&self) -> bool {
        self.ignore_errors
    }

    /// Returns whether an error has already been reported for this cluster.
    #[must_use]
    pub fn already_reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }

    /// Runs one check, honouring report-once semantics.
    ///
    /// The first check that finds errors sets the flag; every later check
    /// returns [`ScanOutcome::AlreadyReported`] without touching the logs.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the scan itself fails.
    pub fn check(&self, extra_ignore: bool) -> Result<ScanOutcome, SandboxError> {
        if self.already_reported() {
            return Ok(ScanOutcome::AlreadyReported);
        }
        let request = ScanRequest {
            log_dir: &self.log_dir,
            test_name: &self.test_name,
            ignore_errors: self.ignore_errors || extra_ignore,
        };
        let found = self.scanner.scan(&request)?;
        if found {
            self.reported.store(true, Ordering::Release);
            return Ok(ScanOutcome::ErrorsFound);
        }
        Ok(ScanOutcome::Clean)
    }

    /// Runs one check and raises when fresh fatal patterns were found.
    ///
    /// An already-reported failure is suppressed so only the first detecting
    /// call site surfaces it. The monitor's ignore policy (or `extra_ignore`)
    /// downgrades a finding to a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ErrorsDetected`] on a fresh finding, or any
    /// scan failure.
    pub fn assert_clean(&self, extra_ignore: bool) -> Result<(), SandboxError> {
        match self.check(extra_ignore)? {
            ScanOutcome::Clean | ScanOutcome::AlreadyReported => Ok(()),
            ScanOutcome::ErrorsFound => {
                if self.ignore_errors || extra_ignore {
                    warn!(
                        log_dir = %self.log_dir,
                        "fatal patterns found but suppressed by ignore policy"
                    );
                    return Ok(());
                }
                Err(SandboxError::ErrorsDetected {
                    log_dir: self.log_dir.clone(),
                    test_name: self.test_name.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests;
