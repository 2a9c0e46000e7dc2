//! Notification side of error triage.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification sinks
//! - `RunSummarizer`, collapsing bursts of identical errors into summaries
//! - Minijinja rendering of notification subject and body
//! - `Dispatcher`, applying rule suppression before run accounting and
//!   forwarding the resulting notifications to every sink
//! - Log and webhook sink implementations

pub mod dispatcher;
pub mod log;
pub mod summarizer;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use summarizer::{Decision, RunState, RunSummarizer, RunSummary};
pub use traits::{Notification, NotificationKind, Notifier, NotifyError};
