//! Single-slot run tracking for duplicate error suppression.
//!
//! A run is a sequence of consecutively admitted records with the same
//! backtrace. The first `threshold` records of a run are emitted one by one;
//! after that the run is summarized: further occurrences are counted and
//! reported as one aggregated notification per `period`, or as soon as a
//! record with a different backtrace ends the run.
//!
//! Only one run is tracked at a time. An intervening different error always
//! ends the current run.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use quell_core::config::SummarizerConfig;
use quell_core::ErrorRecord;

/// Phase of the tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Still below the threshold; every occurrence is emitted.
    NotSummarized,
    /// Threshold reached; occurrences are counted and reported periodically.
    Summarized,
}

/// Aggregated report for a summarized run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// First record of the run.
    pub representative: ErrorRecord,
    /// Start of the counting window.
    pub first_seen: DateTime<Utc>,
    /// Occurrences since `first_seen`.
    pub count: u64,
}

/// What the caller should do for one admitted record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Send the admitted record on its own.
    Emit,
    /// Send one notification covering a summarized run.
    EmitSummary(RunSummary),
    /// Do nothing.
    Suppress,
}

/// Read-only copy of the tracked run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub signature: Vec<String>,
    pub state: RunState,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub representative: ErrorRecord,
}

#[derive(Debug)]
struct Run {
    signature: Vec<String>,
    state: RunState,
    count: u64,
    first_seen: DateTime<Utc>,
    representative: ErrorRecord,
}

impl Run {
    fn start(signature: Vec<String>, record: &ErrorRecord, now: DateTime<Utc>) -> Self {
        Self {
            signature,
            state: RunState::NotSummarized,
            count: 1,
            first_seen: now,
            representative: record.clone(),
        }
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            representative: self.representative.clone(),
            first_seen: self.first_seen,
            count: self.count,
        }
    }
}

/// Deduplicates consecutive identical errors.
///
/// All operations run under one lock, independent of the rule catalog's.
#[derive(Debug)]
pub struct RunSummarizer {
    config: SummarizerConfig,
    run: Mutex<Option<Run>>,
}

impl RunSummarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self {
            config,
            run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Admit a record at the current time.
    pub fn admit(&self, record: &ErrorRecord) -> Vec<Decision> {
        self.admit_at(record, Utc::now())
    }

    /// Admit a record observed at `now`.
    ///
    /// Returns up to two decisions, in order: a summary flushing the previous
    /// run, then the decision for `record` itself.
    pub fn admit_at(&self, record: &ErrorRecord, now: DateTime<Utc>) -> Vec<Decision> {
        let signature = record.signature();
        let mut slot = self.run.lock().expect("summarizer lock poisoned");
        let mut decisions = Vec::with_capacity(2);

        match slot.as_mut() {
            Some(run) if run.signature == signature => {
                run.count += 1;
                let decision = match run.state {
                    RunState::NotSummarized => {
                        if run.count >= self.config.threshold {
                            debug!(frames = signature.len(), "run reached threshold, summarizing");
                            run.state = RunState::Summarized;
                            run.count = 0;
                            run.first_seen = now;
                        }
                        Decision::Emit
                    }
                    RunState::Summarized if self.period_elapsed(run.first_seen, now) => {
                        let summary = run.summary();
                        info!(count = summary.count, first_seen = %summary.first_seen, "summary period elapsed");
                        run.count = 0;
                        run.first_seen = now;
                        Decision::EmitSummary(summary)
                    }
                    RunState::Summarized => Decision::Suppress,
                };
                decisions.push(decision);
                return decisions;
            }
            Some(run) => {
                if run.state == RunState::Summarized && run.count > 0 {
                    info!(count = run.count, first_seen = %run.first_seen, "run ended by a different error");
                    decisions.push(Decision::EmitSummary(run.summary()));
                }
            }
            None => {}
        }

        *slot = Some(Run::start(signature, record, now));
        decisions.push(Decision::Emit);
        decisions
    }

    /// Forget the tracked run without flushing it.
    pub fn reset(&self) {
        *self.run.lock().expect("summarizer lock poisoned") = None;
    }

    /// Snapshot of the tracked run, if any.
    pub fn current_run(&self) -> Option<RunSnapshot> {
        self.run
            .lock()
            .expect("summarizer lock poisoned")
            .as_ref()
            .map(|run| RunSnapshot {
                signature: run.signature.clone(),
                state: run.state,
                count: run.count,
                first_seen: run.first_seen,
                representative: run.representative.clone(),
            })
    }

    fn period_elapsed(&self, first_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - first_seen)
            .to_std()
            .map(|elapsed| elapsed > self.config.period)
            .unwrap_or(false)
    }
}

impl Default for RunSummarizer {
    fn default() -> Self {
        Self::new(SummarizerConfig::default())
    }
}
