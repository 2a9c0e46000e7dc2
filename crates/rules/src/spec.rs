//! Raw rule specs as read from a rule document.
//!
//! A rule document is a YAML mapping of rule name to a mapping of keys.
//! Keys naming a record section carry a pattern string; every other key is
//! treated as a flag and validated later by [`PatternRule`](crate::PatternRule).
//! Document order is preserved and becomes the catalog's match order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use quell_core::SectionName;

use crate::error::{Result, RuleError};

/// A flag value: either a boolean switch or a string setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Text(String),
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> Self {
        FlagValue::Bool(b)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> Self {
        FlagValue::Text(s.to_string())
    }
}

/// One named rule before pattern compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    /// Section key → raw pattern. Blank patterns are kept here and dropped at build time.
    pub sections: IndexMap<String, String>,
    /// Flag key → value.
    pub flags: IndexMap<String, FlagValue>,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn section(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.sections.insert(key.into(), pattern.into());
        self
    }

    pub fn flag(mut self, key: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }
}

/// Parse a YAML rule document into specs, in document order.
///
/// An empty document yields no specs. A top level that is not a mapping,
/// or a rule body that is not a mapping, is rejected.
pub fn parse_rule_specs(yaml: &str) -> Result<Vec<RuleSpec>> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: Option<IndexMap<String, Option<IndexMap<String, Value>>>> =
        serde_yaml::from_str(yaml)?;

    let mut specs = Vec::new();
    for (name, body) in document.unwrap_or_default() {
        let mut spec = RuleSpec::new(name.clone());
        for (key, value) in body.unwrap_or_default() {
            if SectionName::parse(&key).is_some() {
                spec.sections.insert(key.clone(), section_pattern(&name, &key, value)?);
            } else if let Some(flag) = flag_value(&name, &key, value)? {
                spec.flags.insert(key.clone(), flag);
            }
        }
        specs.push(spec);
    }
    Ok(specs)
}

fn section_pattern(rule: &str, key: &str, value: Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(RuleError::Configuration(format!(
            "section '{key}' of rule '{rule}' must be a pattern string"
        ))),
    }
}

/// A flag left empty (`notes:`) is unset and keeps its default.
fn flag_value(rule: &str, key: &str, value: Value) -> Result<Option<FlagValue>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(FlagValue::Bool(b))),
        Value::String(s) => Ok(Some(FlagValue::Text(s))),
        Value::Number(n) => Ok(Some(FlagValue::Text(n.to_string()))),
        _ => Err(RuleError::Configuration(format!(
            "flag '{key}' of rule '{rule}' must be a boolean or a string"
        ))),
    }
}
