//! Routes classified errors to notification sinks.
//!
//! For every record the dispatcher first consults the rule catalog. A
//! matching rule with `send_email: false` stops the notification path right
//! there, before the summarizer sees the record, so filtered errors never
//! touch run state. Everything else goes through the summarizer and each
//! resulting decision is rendered and delivered to all channels. Individual
//! channel failures don't block other channels.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use quell_core::ErrorRecord;
use quell_rules::{PatternRule, RuleCatalog};

use crate::summarizer::{Decision, RunSummarizer, RunSummary};
use crate::templating::{title, NotificationTemplates, TemplateContext, TemplateRenderer};
use crate::traits::{DispatchResult, Notification, NotificationKind, Notifier, NotifyError};

/// Everything the dispatcher decided for one record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchOutcome {
    /// Name of the first matching rule.
    pub rule: Option<String>,
    /// A matching rule disabled notifications for this record.
    pub suppressed_by_rule: bool,
    /// Metric to increment, when the matching rule allows it.
    pub metric: Option<String>,
    /// Whether the record should still be forwarded to the error tracker.
    pub send_to_error_tracker: bool,
    /// Summarizer decisions, empty when suppressed by rule.
    pub decisions: Vec<Decision>,
    /// Per-channel delivery results.
    pub deliveries: Vec<DispatchResult>,
}

impl DispatchOutcome {
    /// Kind of every notification produced, in delivery order (one entry
    /// per notification, not per channel).
    pub fn notification_kinds(&self) -> Vec<NotificationKind> {
        self.decisions
            .iter()
            .filter_map(|d| match d {
                Decision::Emit => Some(NotificationKind::Individual),
                Decision::EmitSummary(_) => Some(NotificationKind::Summary),
                Decision::Suppress => None,
            })
            .collect()
    }
}

/// Combines rule lookup, run summarization and delivery.
pub struct Dispatcher {
    catalog: Arc<RuleCatalog>,
    summarizer: Arc<RunSummarizer>,
    channels: Vec<Box<dyn Notifier>>,
    renderer: TemplateRenderer,
    templates: NotificationTemplates,
    subject_prefix: String,
}

impl Dispatcher {
    /// Create a dispatcher with no channels and the default templates.
    pub fn new(catalog: Arc<RuleCatalog>, summarizer: Arc<RunSummarizer>) -> Self {
        Self {
            catalog,
            summarizer,
            channels: Vec::new(),
            renderer: TemplateRenderer::new(),
            templates: NotificationTemplates::default(),
            subject_prefix: String::new(),
        }
    }

    /// Add a delivery channel.
    pub fn with_channel(mut self, channel: Box<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Replace the subject/body templates, validating them first.
    pub fn with_templates(mut self, templates: NotificationTemplates) -> Result<Self, NotifyError> {
        self.renderer.validate_templates(&templates)?;
        self.templates = templates;
        Ok(self)
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn summarizer(&self) -> &RunSummarizer {
        &self.summarizer
    }

    /// Classify and deliver a record observed now.
    pub async fn dispatch(&self, record: &ErrorRecord) -> DispatchOutcome {
        self.dispatch_at(record, Utc::now()).await
    }

    /// Classify and deliver a record observed at `now`.
    pub async fn dispatch_at(&self, record: &ErrorRecord, now: DateTime<Utc>) -> DispatchOutcome {
        let rule = self.catalog.find(record);

        let mut outcome = DispatchOutcome {
            rule: rule.as_ref().map(|r| r.name().to_string()),
            suppressed_by_rule: false,
            metric: rule
                .as_ref()
                .filter(|r| r.send_metric())
                .map(|r| r.metric_name().to_string()),
            send_to_error_tracker: rule.as_ref().map_or(true, |r| r.send_to_error_tracker()),
            decisions: Vec::new(),
            deliveries: Vec::new(),
        };

        if let Some(rule) = rule.as_ref().filter(|r| !r.send_notification()) {
            info!(
                rule = %rule.name(),
                error = %title(record.error_message().unwrap_or_default()),
                "notification suppressed by rule"
            );
            outcome.suppressed_by_rule = true;
            return outcome;
        }

        let decisions = self.summarizer.admit_at(record, now);
        for decision in &decisions {
            let notification = match decision {
                Decision::Emit => self.compose(record, rule.as_deref(), None, now),
                Decision::EmitSummary(summary) => {
                    self.compose(&summary.representative, None, Some(summary), now)
                }
                Decision::Suppress => {
                    debug!("duplicate error suppressed by run summarizer");
                    continue;
                }
            };
            outcome.deliveries.extend(self.deliver(&notification).await);
        }
        outcome.decisions = decisions;
        outcome
    }

    /// Render a notification, falling back to a plain rendering when the
    /// templates fail at runtime.
    fn compose(
        &self,
        record: &ErrorRecord,
        rule: Option<&PatternRule>,
        summary: Option<&RunSummary>,
        now: DateTime<Utc>,
    ) -> Notification {
        let ctx = TemplateContext::new(record, rule, summary, &self.subject_prefix, now);

        let subject = self
            .renderer
            .render(&self.templates.subject, &ctx)
            .unwrap_or_else(|e| {
                warn!(error = %e, "subject template failed, using plain subject");
                format!("{}{}", ctx.prefix, ctx.title)
            });
        let body = self
            .renderer
            .render(&self.templates.body, &ctx)
            .unwrap_or_else(|e| {
                warn!(error = %e, "body template failed, using plain body");
                format!("{}\n\n{}", ctx.error, ctx.backtrace.join("\n"))
            });

        let mut metadata = HashMap::new();
        if let Some(rule) = rule {
            metadata.insert("rule".to_string(), rule.name().to_string());
        }
        if let Some(summary) = summary {
            metadata.insert("occurrences".to_string(), summary.count.to_string());
            metadata.insert("first_seen".to_string(), summary.first_seen.to_rfc3339());
        }

        Notification {
            kind: ctx.kind,
            subject,
            body,
            record: record.clone(),
            metadata,
        }
    }

    /// Deliver a notification to every channel.
    async fn deliver(&self, notification: &Notification) -> Vec<DispatchResult> {
        if self.channels.is_empty() {
            debug!("No notification channels configured");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(self.channels.len());

        for channel in &self.channels {
            let start = std::time::Instant::now();
            let result = channel.send(notification).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (success, error) = match result {
                Ok(()) => {
                    info!(
                        channel = channel.channel_name(),
                        kind = ?notification.kind,
                        duration_ms,
                        "Notification delivered"
                    );
                    (true, None)
                }
                Err(e) => {
                    warn!(
                        channel = channel.channel_name(),
                        kind = ?notification.kind,
                        error = %e,
                        duration_ms,
                        "Notification delivery failed"
                    );
                    (false, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                kind: notification.kind,
                success,
                error,
                duration_ms,
            });
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::{Duration, TimeZone};
    use quell_rules::InMemoryRuleSource;

    use crate::summarizer::RunState;

    const RULES: &str = r#"
Quiet timeouts:
  error: "Timeout"
  metric_name: timeouts
Loud payments:
  error: "PaymentError"
  send_email: true
  send_to_error_tracker: false
  notes: page billing
"#;

    struct MockNotifier {
        name: String,
        sent: Arc<Mutex<Vec<Notification>>>,
        send_count: Arc<AtomicUsize>,
        should_fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail {
                return Err(NotifyError::Delivery("mock failure".to_string()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
        fn channel_name(&self) -> &str {
            &self.name
        }
    }

    fn mock(name: &str, should_fail: bool) -> (Box<dyn Notifier>, Arc<Mutex<Vec<Notification>>>, Arc<AtomicUsize>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let notifier = MockNotifier {
            name: name.to_string(),
            sent: sent.clone(),
            send_count: count.clone(),
            should_fail,
        };
        (Box::new(notifier), sent, count)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn dispatcher() -> (Dispatcher, Arc<Mutex<Vec<Notification>>>) {
        let catalog = Arc::new(RuleCatalog::new(InMemoryRuleSource::new(RULES)));
        let summarizer = Arc::new(RunSummarizer::default());
        let (channel, sent, _) = mock("mock", false);
        let dispatcher = Dispatcher::new(catalog, summarizer)
            .with_channel(channel)
            .with_subject_prefix("[test] ");
        (dispatcher, sent)
    }

    fn record(error: &str, frame: &str) -> ErrorRecord {
        ErrorRecord::new(error, vec![frame.to_string()])
    }

    #[tokio::test]
    async fn unmatched_error_is_emitted() {
        let (dispatcher, sent) = dispatcher();
        let outcome = dispatcher
            .dispatch_at(&record("KeyError: missing", "a.rb:1"), t0())
            .await;

        assert_eq!(outcome.rule, None);
        assert!(!outcome.suppressed_by_rule);
        assert!(outcome.send_to_error_tracker);
        assert_eq!(outcome.metric, None);
        assert_eq!(outcome.decisions, vec![Decision::Emit]);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Individual);
        assert_eq!(sent[0].subject, "[test] KeyError: missing");
    }

    #[tokio::test]
    async fn rule_suppression_skips_the_summarizer() {
        let (dispatcher, sent) = dispatcher();
        let outcome = dispatcher
            .dispatch_at(&record("Net::ReadTimeout", "http.rb:9"), t0())
            .await;

        assert_eq!(outcome.rule.as_deref(), Some("Quiet timeouts"));
        assert!(outcome.suppressed_by_rule);
        assert_eq!(outcome.metric.as_deref(), Some("timeouts"));
        assert!(outcome.send_to_error_tracker);
        assert!(outcome.decisions.is_empty());
        assert!(sent.lock().unwrap().is_empty());
        assert!(dispatcher.summarizer().current_run().is_none());
    }

    #[tokio::test]
    async fn filtered_errors_do_not_disturb_a_summarized_run() {
        let (dispatcher, sent) = dispatcher();
        let noisy = record("KeyError", "a.rb:1");
        for i in 0..6 {
            dispatcher.dispatch_at(&noisy, t0() + Duration::minutes(i)).await;
        }
        // A rule-filtered error in between must not end the run.
        dispatcher
            .dispatch_at(&record("Timeout", "b.rb:2"), t0() + Duration::minutes(7))
            .await;

        let run = dispatcher.summarizer().current_run().unwrap();
        assert_eq!(run.state, RunState::Summarized);
        assert_eq!(run.count, 1);
        assert_eq!(run.representative, noisy);
        assert_eq!(sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn matching_rule_with_email_still_goes_through_summarizer() {
        let (dispatcher, sent) = dispatcher();
        let outcome = dispatcher
            .dispatch_at(&record("PaymentError: declined", "pay.rb:3"), t0())
            .await;

        assert_eq!(outcome.rule.as_deref(), Some("Loud payments"));
        assert!(!outcome.suppressed_by_rule);
        assert!(!outcome.send_to_error_tracker);
        assert_eq!(outcome.metric.as_deref(), Some("Loud_payments"));
        assert_eq!(outcome.decisions, vec![Decision::Emit]);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].metadata.get("rule").map(String::as_str), Some("Loud payments"));
        assert!(sent[0].body.contains("page billing"));
    }

    #[tokio::test]
    async fn run_switch_delivers_summary_then_new_error() {
        let (dispatcher, sent) = dispatcher();
        let noisy = record("KeyError", "a.rb:1");
        for i in 0..8 {
            dispatcher.dispatch_at(&noisy, t0() + Duration::minutes(i)).await;
        }
        let outcome = dispatcher
            .dispatch_at(&record("IndexError", "c.rb:4"), t0() + Duration::minutes(9))
            .await;

        assert_eq!(
            outcome.notification_kinds(),
            vec![NotificationKind::Summary, NotificationKind::Individual]
        );

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 7);
        let summary = &sent[5];
        assert_eq!(summary.kind, NotificationKind::Summary);
        assert_eq!(summary.subject, "[test] [3 SUMMARIZED] KeyError");
        assert_eq!(summary.metadata.get("occurrences").map(String::as_str), Some("3"));
        assert_eq!(summary.record, noisy);
        assert_eq!(sent[6].subject, "[test] IndexError");
    }

    #[tokio::test]
    async fn partial_failure_doesnt_block() {
        let catalog = Arc::new(RuleCatalog::new(InMemoryRuleSource::new("")));
        let (failing, _, fail_count) = mock("fail", true);
        let (ok, _, ok_count) = mock("ok", false);
        let dispatcher = Dispatcher::new(catalog, Arc::new(RunSummarizer::default()))
            .with_channel(failing)
            .with_channel(ok);

        let outcome = dispatcher.dispatch_at(&record("Boom", "x.rb:1"), t0()).await;
        assert_eq!(outcome.deliveries.len(), 2);
        assert!(!outcome.deliveries[0].success);
        assert!(outcome.deliveries[1].success);
        assert_eq!(fail_count.load(Ordering::SeqCst), 1);
        assert_eq!(ok_count.load(Ordering::SeqCst), 1); // second channel still sent
    }

    #[tokio::test]
    async fn no_channels_yields_no_deliveries() {
        let catalog = Arc::new(RuleCatalog::new(InMemoryRuleSource::new("")));
        let dispatcher = Dispatcher::new(catalog, Arc::new(RunSummarizer::default()));
        let outcome = dispatcher.dispatch_at(&record("Boom", "x.rb:1"), t0()).await;
        assert_eq!(outcome.decisions, vec![Decision::Emit]);
        assert!(outcome.deliveries.is_empty());
    }

    #[test]
    fn invalid_templates_are_rejected() {
        let catalog = Arc::new(RuleCatalog::new(InMemoryRuleSource::new("")));
        let result = Dispatcher::new(catalog, Arc::new(RunSummarizer::default())).with_templates(
            NotificationTemplates {
                subject: "{{ unclosed".to_string(),
                body: String::new(),
            },
        );
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }
}
