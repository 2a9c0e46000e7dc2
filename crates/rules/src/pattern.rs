//! A single named rule: per-section patterns plus behavior flags.

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};

use quell_core::{dump_mapping, ErrorRecord, SectionName, SectionValue};

use crate::error::{Result, RuleError};
use crate::spec::{FlagValue, RuleSpec};

const SEND_EMAIL: &str = "send_email";
const SEND_TO_ERROR_TRACKER: &str = "send_to_error_tracker";
const SEND_METRIC: &str = "send_metric";
const METRIC_NAME: &str = "metric_name";
const NOTES: &str = "notes";

const FLAG_KEYS: [&str; 5] = [SEND_EMAIL, SEND_TO_ERROR_TRACKER, SEND_METRIC, METRIC_NAME, NOTES];

/// Behavior switches attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RuleFlags {
    /// Whether matching errors still produce a notification.
    pub send_notification: bool,
    pub send_to_error_tracker: bool,
    pub send_metric: bool,
    pub metric_name: String,
    pub notes: Option<String>,
}

impl RuleFlags {
    /// Defaults for a rule called `name`.
    pub fn defaults_for(name: &str) -> Self {
        Self {
            send_notification: false,
            send_to_error_tracker: true,
            send_metric: true,
            metric_name: name.replace(' ', "_"),
            notes: None,
        }
    }
}

/// A compiled rule.
///
/// Matches a record when every configured section pattern matches
/// the corresponding section of the record.
#[derive(Debug, Clone)]
pub struct PatternRule {
    name: String,
    sections: IndexMap<SectionName, Regex>,
    flags: RuleFlags,
}

impl PatternRule {
    /// Build a rule from raw section patterns and flags.
    ///
    /// Fails when a key is neither a section nor a flag, when a flag has the
    /// wrong type, when a pattern does not compile, or when every section
    /// pattern is blank.
    pub fn new<S, K, P>(name: &str, sections: S, flags: &IndexMap<String, FlagValue>) -> Result<Self>
    where
        S: IntoIterator<Item = (K, P)>,
        K: AsRef<str>,
        P: AsRef<str>,
    {
        let mut unknown = Vec::new();
        let mut raw = Vec::new();
        for (key, pattern) in sections {
            match SectionName::parse(key.as_ref()) {
                Some(section) => raw.push((section, pattern.as_ref().to_string())),
                None => unknown.push(key.as_ref().to_string()),
            }
        }
        unknown.extend(
            flags
                .keys()
                .filter(|k| !FLAG_KEYS.contains(&k.as_str()))
                .cloned(),
        );
        if !unknown.is_empty() {
            return Err(RuleError::Configuration(format!(
                "unknown keys in rule '{name}': {}",
                unknown.join(", ")
            )));
        }

        let flags = parse_flags(name, flags)?;

        let mut compiled = IndexMap::new();
        for (section, pattern) in raw {
            if pattern.trim().is_empty() {
                continue;
            }
            let regex = compile_pattern(&pattern).map_err(|source| RuleError::Pattern {
                rule: name.to_string(),
                section,
                source,
            })?;
            compiled.insert(section, regex);
        }

        if compiled.is_empty() {
            return Err(RuleError::Configuration(format!(
                "rule '{name}' has no non-blank section pattern"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            sections: compiled,
            flags,
        })
    }

    /// Build a rule from a parsed [`RuleSpec`].
    pub fn from_spec(spec: &RuleSpec) -> Result<Self> {
        Self::new(&spec.name, &spec.sections, &spec.flags)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> &RuleFlags {
        &self.flags
    }

    pub fn send_notification(&self) -> bool {
        self.flags.send_notification
    }

    pub fn send_to_error_tracker(&self) -> bool {
        self.flags.send_to_error_tracker
    }

    pub fn send_metric(&self) -> bool {
        self.flags.send_metric
    }

    pub fn metric_name(&self) -> &str {
        &self.flags.metric_name
    }

    pub fn notes(&self) -> Option<&str> {
        self.flags.notes.as_deref()
    }

    /// Sections this rule constrains, with their source patterns.
    pub fn patterns(&self) -> impl Iterator<Item = (SectionName, &str)> {
        self.sections.iter().map(|(s, r)| (*s, r.as_str()))
    }

    /// Whether every constrained section of `record` matches its pattern.
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        !self.sections.is_empty()
            && self
                .sections
                .iter()
                .all(|(section, pattern)| value_matches(pattern, record.section(*section)))
    }
}

/// Compile a section pattern: case-insensitive, `.` spans newlines and
/// `^`/`$` anchor at line boundaries.
fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .multi_line(true)
        .build()
}

fn value_matches(pattern: &Regex, value: &SectionValue) -> bool {
    match value {
        SectionValue::Str(s) => pattern.is_match(s),
        SectionValue::List(items) => items.iter().any(|item| pattern.is_match(item)),
        SectionValue::Map(map) => pattern.is_match(&dump_mapping(map)),
        SectionValue::Absent => false,
    }
}

fn parse_flags(name: &str, raw: &IndexMap<String, FlagValue>) -> Result<RuleFlags> {
    let mut flags = RuleFlags::defaults_for(name);
    for (key, value) in raw {
        match (key.as_str(), value) {
            (SEND_EMAIL, FlagValue::Bool(b)) => flags.send_notification = *b,
            (SEND_TO_ERROR_TRACKER, FlagValue::Bool(b)) => flags.send_to_error_tracker = *b,
            (SEND_METRIC, FlagValue::Bool(b)) => flags.send_metric = *b,
            (METRIC_NAME, FlagValue::Text(s)) if !s.trim().is_empty() => {
                flags.metric_name = s.clone()
            }
            (NOTES, FlagValue::Text(s)) => flags.notes = Some(s.clone()),
            (key, value) => {
                return Err(RuleError::Configuration(format!(
                    "flag '{key}' of rule '{name}' has invalid value {value:?}"
                )))
            }
        }
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(sections: &[(&str, &str)]) -> Result<PatternRule> {
        PatternRule::new("Test rule", sections.iter().copied(), &IndexMap::new())
    }

    fn record() -> ErrorRecord {
        let mut request = IndexMap::new();
        request.insert("path".to_string(), SectionValue::from("/admin/login"));
        request.insert("method".to_string(), SectionValue::from("POST"));
        ErrorRecord::new(
            "ActiveRecord::RecordNotFound: Couldn't find User\nwith id=12",
            vec!["app/models/user.rb:10".into(), "lib/auth.rb:44".into()],
        )
        .with_section(SectionName::Request, SectionValue::Map(request))
    }

    #[test]
    fn defaults_are_applied() {
        let r = rule(&[("error", "boom")]).unwrap();
        assert!(!r.send_notification());
        assert!(r.send_to_error_tracker());
        assert!(r.send_metric());
        assert_eq!(r.metric_name(), "Test_rule");
        assert_eq!(r.notes(), None);
    }

    #[test]
    fn flags_override_defaults() {
        let spec = RuleSpec::new("Noisy gem")
            .section("backtrace", "vendor/")
            .flag("send_email", true)
            .flag("send_metric", false)
            .flag("metric_name", "noisy")
            .flag("notes", "ticket 42");
        let r = PatternRule::from_spec(&spec).unwrap();
        assert!(r.send_notification());
        assert!(!r.send_metric());
        assert_eq!(r.metric_name(), "noisy");
        assert_eq!(r.notes(), Some("ticket 42"));
    }

    #[test]
    fn all_blank_patterns_are_rejected() {
        let err = rule(&[("error", ""), ("request", "   ")]).unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
        assert!(rule(&[]).is_err());
    }

    #[test]
    fn blank_patterns_are_dropped_individually() {
        let r = rule(&[("error", ""), ("backtrace", "auth")]).unwrap();
        let sections: Vec<SectionName> = r.patterns().map(|(s, _)| s).collect();
        assert_eq!(sections, vec![SectionName::Backtrace]);
        // An unconstrained, absent section does not block the match.
        assert!(r.matches(&record()));
    }

    #[test]
    fn unknown_keys_are_named_in_error() {
        let mut flags = IndexMap::new();
        flags.insert("send_sms".to_string(), FlagValue::Bool(true));
        let err = PatternRule::new("R", [("error", "x"), ("headers", "y")], &flags).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("headers"));
        assert!(msg.contains("send_sms"));
    }

    #[test]
    fn wrong_flag_type_is_rejected() {
        let spec = RuleSpec::new("R").section("error", "x").flag("send_email", "yes");
        assert!(PatternRule::from_spec(&spec).unwrap_err().is_configuration());
    }

    #[test]
    fn invalid_regex_is_a_pattern_error() {
        let err = rule(&[("error", "(unclosed")]).unwrap_err();
        match err {
            RuleError::Pattern { rule, section, .. } => {
                assert_eq!(rule, "Test rule");
                assert_eq!(section, SectionName::Error);
            }
            other => panic!("expected Pattern error, got: {other:?}"),
        }
    }

    #[test]
    fn string_match_is_case_insensitive_and_spans_lines() {
        assert!(rule(&[("error", "recordnotfound")]).unwrap().matches(&record()));
        assert!(rule(&[("error", "User.with id")]).unwrap().matches(&record()));
        assert!(rule(&[("error", "^with id=12$")]).unwrap().matches(&record()));
    }

    #[test]
    fn list_matches_when_any_element_matches() {
        assert!(rule(&[("backtrace", "lib/auth")]).unwrap().matches(&record()));
        assert!(!rule(&[("backtrace", "controllers")]).unwrap().matches(&record()));
    }

    #[test]
    fn mapping_is_matched_against_its_dump() {
        assert!(rule(&[("request", "method: post\npath: /admin")])
            .unwrap()
            .matches(&record()));
        assert!(!rule(&[("request", "path: /public")]).unwrap().matches(&record()));
    }

    #[test]
    fn absent_section_fails_the_conjunction() {
        let r = rule(&[("error", "RecordNotFound"), ("session", ".*")]).unwrap();
        assert!(!r.matches(&record()));
    }

    #[test]
    fn all_sections_must_match() {
        assert!(rule(&[("error", "RecordNotFound"), ("backtrace", "user.rb")])
            .unwrap()
            .matches(&record()));
        assert!(!rule(&[("error", "RecordNotFound"), ("backtrace", "billing")])
            .unwrap()
            .matches(&record()));
    }
}
