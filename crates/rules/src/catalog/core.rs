//! Core [`RuleCatalog`] struct: marker-driven reload plus first-match lookup.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use quell_core::ErrorRecord;

use crate::error::Result;
use crate::pattern::PatternRule;
use crate::source::{Marker, RuleSource};

/// Rules keyed by name, in load order.
pub type RuleSet = IndexMap<String, Arc<PatternRule>>;

/// Result of a single [`RuleCatalog::refresh`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Marker did not move; nothing was read.
    Unchanged,
    /// Source was reloaded and the rule set replaced.
    Reloaded { rules: usize },
    /// Reading or building failed; the previous rule set is kept.
    Failed { error: String },
}

struct CatalogState {
    rules: Arc<RuleSet>,
    last_marker: Option<Marker>,
    last_error: Option<String>,
}

/// Rule set cache bound to one [`RuleSource`].
///
/// Both [`find`](Self::find) and [`refresh`](Self::refresh) run under a
/// single lock, so callers on multiple threads see a consistent rule set.
/// Refresh failures never escape: they are logged through `tracing` and
/// recorded in [`last_error`](Self::last_error).
pub struct RuleCatalog {
    source: Box<dyn RuleSource>,
    state: Mutex<CatalogState>,
}

impl RuleCatalog {
    /// Create an empty catalog; the first lookup triggers the initial load.
    pub fn new(source: impl RuleSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn RuleSource>) -> Self {
        Self {
            source,
            state: Mutex::new(CatalogState {
                rules: Arc::new(RuleSet::new()),
                last_marker: None,
                last_error: None,
            }),
        }
    }

    /// Refresh, then return the first rule (in load order) matching `record`.
    pub fn find(&self, record: &ErrorRecord) -> Option<Arc<PatternRule>> {
        let mut state = self.state.lock().expect("catalog lock poisoned");
        self.refresh_locked(&mut state);
        state
            .rules
            .values()
            .find(|rule| rule.matches(record))
            .cloned()
    }

    /// Reload the rule set if the source marker changed since the last load.
    pub fn refresh(&self) -> RefreshOutcome {
        let mut state = self.state.lock().expect("catalog lock poisoned");
        self.refresh_locked(&mut state)
    }

    fn refresh_locked(&self, state: &mut CatalogState) -> RefreshOutcome {
        let marker = match self.source.current_marker() {
            Ok(marker) => marker,
            Err(e) => return Self::record_failure(state, &*self.source, e.to_string()),
        };

        if state.last_marker.as_ref() == Some(&marker) {
            return RefreshOutcome::Unchanged;
        }

        // Marker moves before parsing: a broken document is not retried
        // until the source changes again.
        state.last_marker = Some(marker);

        match self.build_rules() {
            Ok(rules) => {
                let count = rules.len();
                info!(source = %self.source.describe(), rules = count, "loaded error rules");
                state.rules = Arc::new(rules);
                state.last_error = None;
                RefreshOutcome::Reloaded { rules: count }
            }
            Err(e) => Self::record_failure(state, &*self.source, e.to_string()),
        }
    }

    fn build_rules(&self) -> Result<RuleSet> {
        let specs = self.source.load()?;
        let mut rules = RuleSet::with_capacity(specs.len());
        for spec in &specs {
            let rule = PatternRule::from_spec(spec)?;
            debug!(rule = %rule.name(), "built rule");
            rules.insert(rule.name().to_string(), Arc::new(rule));
        }
        Ok(rules)
    }

    fn record_failure(
        state: &mut CatalogState,
        source: &dyn RuleSource,
        error: String,
    ) -> RefreshOutcome {
        warn!(
            source = %source.describe(),
            error = %error,
            kept_rules = state.rules.len(),
            "failed to refresh error rules, keeping previous set"
        );
        state.last_error = Some(error.clone());
        RefreshOutcome::Failed { error }
    }

    /// Snapshot of the current rule set (no refresh).
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.state.lock().expect("catalog lock poisoned").rules)
    }

    /// Look up a rule by name (no refresh).
    pub fn rule(&self, name: &str) -> Option<Arc<PatternRule>> {
        self.state
            .lock()
            .expect("catalog lock poisoned")
            .rules
            .get(name)
            .cloned()
    }

    /// Message of the most recent failed refresh, cleared by a successful reload.
    pub fn last_error(&self) -> Option<String> {
        self.state
            .lock()
            .expect("catalog lock poisoned")
            .last_error
            .clone()
    }

    pub fn last_marker(&self) -> Option<Marker> {
        self.state
            .lock()
            .expect("catalog lock poisoned")
            .last_marker
            .clone()
    }

    pub fn source(&self) -> &dyn RuleSource {
        &*self.source
    }
}
