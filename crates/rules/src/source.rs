//! Where rule documents come from.
//!
//! A [`RuleSource`] exposes a cheap change marker and a full load. The
//! catalog polls the marker on every lookup and only loads when it moved.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::error::{Result, RuleError};
use crate::spec::{parse_rule_specs, RuleSpec};

/// Opaque change marker of a rule source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Modification time of a backing file.
    Modified(SystemTime),
    /// Monotonic revision of an in-memory document.
    Revision(u64),
}

/// Read-only provider of rule specs.
pub trait RuleSource: Send + Sync {
    /// Current change marker. Must be cheap; called on every lookup.
    fn current_marker(&self) -> Result<Marker>;

    /// Load and parse every rule spec, in document order.
    fn load(&self) -> Result<Vec<RuleSpec>>;

    /// Human-readable description for logs (path, "inline", ...).
    fn describe(&self) -> String;
}

// ── File source ────────────────────────────────────────────────────

/// YAML rule file on disk, keyed by its modification time.
///
/// All filesystem access runs on a helper thread and is abandoned after
/// `timeout`, so a wedged mount cannot stall error reporting. At most one
/// helper thread is in flight; while it is still blocked every further call
/// fails fast with [`RuleError::SourceUnavailable`].
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_bounded<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> std::io::Result<T> + Send + 'static,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(RuleError::SourceUnavailable(format!(
                "{what} {}: previous access still pending",
                self.path.display()
            )));
        }

        let (tx, rx) = mpsc::channel();
        let path = self.path.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let spawned = thread::Builder::new()
            .name("quell-rule-source".to_string())
            .spawn(move || {
                let result = op(path);
                in_flight.store(false, Ordering::Release);
                // Receiver may be gone after a timeout.
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            self.in_flight.store(false, Ordering::Release);
            return Err(e.into());
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RuleError::SourceUnavailable(format!(
                "{what} {}: {e}",
                self.path.display()
            ))),
            Err(RecvTimeoutError::Timeout) => Err(RuleError::SourceUnavailable(format!(
                "{what} {} timed out after {}ms",
                self.path.display(),
                self.timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(RuleError::SourceUnavailable(format!(
                "{what} {}: worker thread exited",
                self.path.display()
            ))),
        }
    }
}

impl RuleSource for FileRuleSource {
    fn current_marker(&self) -> Result<Marker> {
        let modified = self.run_bounded("stat", |path| fs::metadata(path)?.modified())?;
        Ok(Marker::Modified(modified))
    }

    fn load(&self) -> Result<Vec<RuleSpec>> {
        let contents = self.run_bounded("read", fs::read_to_string)?;
        debug!(path = %self.path.display(), bytes = contents.len(), "read rule file");
        parse_rule_specs(&contents)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ── In-memory source ───────────────────────────────────────────────

/// Rule document held in memory; every [`replace`](Self::replace) bumps the revision.
#[derive(Debug, Default)]
pub struct InMemoryRuleSource {
    inner: Mutex<(u64, String)>,
}

impl InMemoryRuleSource {
    pub fn new(yaml: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new((1, yaml.into())),
        }
    }

    /// Swap in a new document.
    pub fn replace(&self, yaml: impl Into<String>) {
        let mut inner = self.inner.lock().expect("rule source lock poisoned");
        inner.0 += 1;
        inner.1 = yaml.into();
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().expect("rule source lock poisoned").0
    }
}

impl RuleSource for InMemoryRuleSource {
    fn current_marker(&self) -> Result<Marker> {
        Ok(Marker::Revision(self.revision()))
    }

    fn load(&self) -> Result<Vec<RuleSpec>> {
        let yaml = self.inner.lock().expect("rule source lock poisoned").1.clone();
        parse_rule_specs(&yaml)
    }

    fn describe(&self) -> String {
        "inline".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_source_reads_marker_and_rules() {
        let dir = TempDir::new().expect("create tempdir");
        let path = dir.path().join("rules.yml");
        fs::write(&path, "Rule:\n  error: boom\n").unwrap();

        let source = FileRuleSource::new(&path, Duration::from_secs(2));
        assert!(matches!(source.current_marker().unwrap(), Marker::Modified(_)));
        let specs = source.load().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "Rule");
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = TempDir::new().expect("create tempdir");
        let source = FileRuleSource::new(dir.path().join("absent.yml"), Duration::from_secs(2));
        assert!(matches!(
            source.current_marker(),
            Err(RuleError::SourceUnavailable(_))
        ));
        assert!(matches!(source.load(), Err(RuleError::SourceUnavailable(_))));
    }

    #[test]
    fn pending_access_fails_fast_without_spawning() {
        let dir = TempDir::new().expect("create tempdir");
        let path = dir.path().join("rules.yml");
        fs::write(&path, "Rule:\n  error: boom\n").unwrap();
        let source = FileRuleSource::new(&path, Duration::from_secs(2));

        // Simulate a helper thread stuck on a wedged mount.
        source.in_flight.store(true, Ordering::SeqCst);
        match source.current_marker() {
            Err(RuleError::SourceUnavailable(msg)) => assert!(msg.contains("still pending")),
            other => panic!("expected SourceUnavailable, got: {other:?}"),
        }

        source.in_flight.store(false, Ordering::SeqCst);
        assert!(source.current_marker().is_ok());
        // Completed accesses release the guard.
        assert!(source.current_marker().is_ok());
        assert_eq!(source.load().unwrap().len(), 1);
    }

    #[test]
    fn timed_out_access_holds_the_guard_until_it_finishes() {
        let source = FileRuleSource::new("unused.yml", Duration::from_millis(20));
        let err = source
            .run_bounded("stat", |_| {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, RuleError::SourceUnavailable(ref msg) if msg.contains("timed out")));
        assert!(matches!(
            source.run_bounded("stat", |_| Ok(())),
            Err(RuleError::SourceUnavailable(ref msg)) if msg.contains("still pending")
        ));

        thread::sleep(Duration::from_millis(600));
        assert!(source.run_bounded("stat", |_| Ok(())).is_ok());
    }

    #[test]
    fn in_memory_revision_bumps_on_replace() {
        let source = InMemoryRuleSource::new("");
        assert_eq!(source.current_marker().unwrap(), Marker::Revision(1));
        source.replace("Rule:\n  error: x\n");
        assert_eq!(source.current_marker().unwrap(), Marker::Revision(2));
        assert_eq!(source.load().unwrap().len(), 1);
    }
}
