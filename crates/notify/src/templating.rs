//! Minijinja template rendering for notification messages.
//!
//! Subject and body are rendered from a [`TemplateContext`] built out of the
//! error record, the matching rule (if any) and, for summaries, the run
//! totals. Templates are arbitrary strings, so a fresh
//! [`minijinja::Environment`] is created per render call.

use chrono::{DateTime, SecondsFormat, Utc};

use quell_core::{dump_mapping, ErrorRecord, SectionName, SectionValue};
use quell_rules::PatternRule;

use crate::summarizer::RunSummary;
use crate::traits::{NotificationKind, NotifyError};

/// Longest subject title, in characters.
const TITLE_MAX_CHARS: usize = 120;

/// Default subject: optional prefix, summary marker, first line of the error.
pub const DEFAULT_SUBJECT: &str =
    "{{ prefix }}{% if summary %}[{{ summary.count }} SUMMARIZED] {% endif %}{{ title }}";

/// Default body: error, run totals, rule notes, remaining sections, backtrace.
pub const DEFAULT_BODY: &str = r#"{{ error }}
{% if summary %}
This error occurred {{ summary.count }} {{ "time" if summary.count == 1 else "times" }} since {{ summary.first_seen }}.
{% endif %}{% if rule %}
Rule: {{ rule.name }}{% if rule.notes %} ({{ rule.notes }}){% endif %}
{% endif %}{% for section in sections %}
{{ section.name | upper }}:
{{ section.rendered }}
{% endfor %}
BACKTRACE:
{% for frame in backtrace %}  {{ frame }}
{% endfor %}"#;

/// Context data available to notification templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    pub kind: NotificationKind,
    /// Configured subject prefix.
    pub prefix: String,
    /// First line of the error, truncated.
    pub title: String,
    /// Full error text.
    pub error: String,
    pub rule: Option<RuleContext>,
    /// Non-empty sections other than `error` and `backtrace`.
    pub sections: Vec<SectionContext>,
    pub backtrace: Vec<String>,
    pub summary: Option<SummaryContext>,
    /// Render time in RFC 3339.
    pub now: String,
}

/// Rule metadata exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleContext {
    pub name: String,
    pub notes: Option<String>,
}

/// A record section rendered as text.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SectionContext {
    pub name: String,
    pub rendered: String,
}

/// Run totals exposed to summary templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SummaryContext {
    pub count: u64,
    pub first_seen: String,
}

impl TemplateContext {
    /// Build the context for one notification.
    pub fn new(
        record: &ErrorRecord,
        rule: Option<&PatternRule>,
        summary: Option<&RunSummary>,
        prefix: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let error = record.error_message().unwrap_or_default().to_string();
        Self {
            kind: if summary.is_some() {
                NotificationKind::Summary
            } else {
                NotificationKind::Individual
            },
            prefix: prefix.to_string(),
            title: title(&error),
            error,
            rule: rule.map(|r| RuleContext {
                name: r.name().to_string(),
                notes: r.notes().map(str::to_string),
            }),
            sections: record
                .sections()
                .filter(|(name, _)| !matches!(name, SectionName::Error | SectionName::Backtrace))
                .filter_map(|(name, value)| {
                    render_section(value).map(|rendered| SectionContext {
                        name: name.to_string(),
                        rendered,
                    })
                })
                .collect(),
            backtrace: record.signature(),
            summary: summary.map(|s| SummaryContext {
                count: s.count,
                first_seen: s.first_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
            now: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// First non-blank line of `error`, cut to [`TITLE_MAX_CHARS`].
pub fn title(error: &str) -> String {
    let line = error
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("(no error message)");
    if line.chars().count() > TITLE_MAX_CHARS {
        let mut cut: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
        cut.push_str("...");
        cut
    } else {
        line.to_string()
    }
}

fn render_section(value: &SectionValue) -> Option<String> {
    match value {
        SectionValue::Str(s) if !s.is_empty() => Some(s.clone()),
        SectionValue::List(items) if !items.is_empty() => Some(items.join("\n")),
        SectionValue::Map(map) if !map.is_empty() => Some(dump_mapping(map).trim_end().to_string()),
        _ => None,
    }
}

/// Subject and body templates used to render notifications.
#[derive(Debug, Clone)]
pub struct NotificationTemplates {
    pub subject: String,
    pub body: String,
}

impl Default for NotificationTemplates {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }
}

/// Renders notification templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    /// Create a new template renderer.
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("upper", upper_filter);
        env.add_filter("first_line", first_line_filter);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Validate that a template string parses without errors.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    /// Validate both templates of a set.
    pub fn validate_templates(&self, templates: &NotificationTemplates) -> Result<(), NotifyError> {
        self.validate(&templates.subject)
            .map_err(|e| NotifyError::Config(format!("invalid subject template: {e}")))?;
        self.validate(&templates.body)
            .map_err(|e| NotifyError::Config(format!("invalid body template: {e}")))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Custom filter: uppercase a string.
fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Custom filter: first line of a multi-line string.
fn first_line_filter(value: String) -> String {
    value.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quell_rules::RuleSpec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn sample_record() -> ErrorRecord {
        ErrorRecord::new(
            "NoMethodError: undefined method `name' for nil\n  extra detail",
            vec!["app/models/user.rb:10".into(), "app/main.rb:1".into()],
        )
        .with_section(
            SectionName::Session,
            SectionValue::from(serde_json::json!({ "user_id": "42" })),
        )
        .with_section(SectionName::Environment, SectionValue::Absent)
    }

    #[test]
    fn title_takes_first_non_blank_line_and_truncates() {
        assert_eq!(title("\n  Boom happened \nmore"), "Boom happened");
        assert_eq!(title(""), "(no error message)");
        let long = "x".repeat(200);
        let t = title(&long);
        assert_eq!(t.chars().count(), TITLE_MAX_CHARS);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn individual_subject_uses_prefix_and_title() {
        let ctx = TemplateContext::new(&sample_record(), None, None, "[prod] ", now());
        let subject = TemplateRenderer::new().render(DEFAULT_SUBJECT, &ctx).unwrap();
        assert_eq!(subject, "[prod] NoMethodError: undefined method `name' for nil");
        assert_eq!(ctx.kind, NotificationKind::Individual);
    }

    #[test]
    fn summary_subject_and_body_carry_totals() {
        let summary = RunSummary {
            representative: sample_record(),
            first_seen: now(),
            count: 12,
        };
        let ctx = TemplateContext::new(&sample_record(), None, Some(&summary), "", now());
        let renderer = TemplateRenderer::new();

        let subject = renderer.render(DEFAULT_SUBJECT, &ctx).unwrap();
        assert!(subject.starts_with("[12 SUMMARIZED] NoMethodError"));

        let body = renderer.render(DEFAULT_BODY, &ctx).unwrap();
        assert!(body.contains("occurred 12 times since 2026-03-01T12:00:00Z"));
    }

    #[test]
    fn body_lists_sections_and_backtrace() {
        let ctx = TemplateContext::new(&sample_record(), None, None, "", now());
        let body = TemplateRenderer::new().render(DEFAULT_BODY, &ctx).unwrap();
        assert!(body.contains("SESSION:\nuser_id: 42"));
        assert!(!body.contains("ENVIRONMENT"));
        assert!(body.contains("  app/models/user.rb:10\n"));
        assert!(!body.contains("SUMMARIZED"));
    }

    #[test]
    fn body_mentions_rule_notes() {
        let spec = RuleSpec::new("Nil user")
            .section("error", "NoMethodError")
            .flag("send_email", true)
            .flag("notes", "owned by billing");
        let rule = PatternRule::from_spec(&spec).unwrap();

        let ctx = TemplateContext::new(&sample_record(), Some(&rule), None, "", now());
        let body = TemplateRenderer::new().render(DEFAULT_BODY, &ctx).unwrap();
        assert!(body.contains("Rule: Nil user (owned by billing)"));
    }

    #[test]
    fn validate_rejects_broken_templates() {
        let renderer = TemplateRenderer::new();
        assert!(renderer.validate("{{ unclosed").is_err());
        let templates = NotificationTemplates {
            subject: "{% if %}".to_string(),
            body: DEFAULT_BODY.to_string(),
        };
        match renderer.validate_templates(&templates).unwrap_err() {
            NotifyError::Config(msg) => assert!(msg.contains("subject")),
            other => panic!("expected Config error, got: {other:?}"),
        }
        assert!(renderer.validate_templates(&NotificationTemplates::default()).is_ok());
    }

    #[test]
    fn first_line_filter_is_available() {
        let ctx = TemplateContext::new(&sample_record(), None, None, "", now());
        let out = TemplateRenderer::new()
            .render("{{ error | first_line }}", &ctx)
            .unwrap();
        assert_eq!(out, "NoMethodError: undefined method `name' for nil");
    }
}
