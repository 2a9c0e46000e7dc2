//! Structured error records as handed over by the enrichment layer.
//!
//! A record is an ordered set of named sections. Each section holds a
//! [`SectionValue`]: a string, a list of strings, a nested mapping, or
//! nothing at all. Records are read-only once constructed.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ── Section names ───────────────────────────────────────────────────

/// Canonical section keys of an [`ErrorRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    Error,
    Request,
    Session,
    Environment,
    Backtrace,
    EventResponse,
}

impl SectionName {
    /// All known sections, in canonical order.
    pub const ALL: [SectionName; 6] = [
        SectionName::Error,
        SectionName::Request,
        SectionName::Session,
        SectionName::Environment,
        SectionName::Backtrace,
        SectionName::EventResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionName::Error => "error",
            SectionName::Request => "request",
            SectionName::Session => "session",
            SectionName::Environment => "environment",
            SectionName::Backtrace => "backtrace",
            SectionName::EventResponse => "event_response",
        }
    }

    /// Look up a section by its key, returning `None` for unknown keys.
    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == key)
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::InvalidRecord(format!("unknown section '{s}'")))
    }
}

// ── Section values ──────────────────────────────────────────────────

/// Value held by one section of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SectionValue {
    Str(String),
    List(Vec<String>),
    Map(IndexMap<String, SectionValue>),
    Absent,
}

impl SectionValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, SectionValue::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SectionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            SectionValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, SectionValue>> {
        match self {
            SectionValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for SectionValue {
    fn from(s: &str) -> Self {
        SectionValue::Str(s.to_string())
    }
}

impl From<String> for SectionValue {
    fn from(s: String) -> Self {
        SectionValue::Str(s)
    }
}

impl From<Vec<String>> for SectionValue {
    fn from(items: Vec<String>) -> Self {
        SectionValue::List(items)
    }
}

impl From<IndexMap<String, SectionValue>> for SectionValue {
    fn from(map: IndexMap<String, SectionValue>) -> Self {
        SectionValue::Map(map)
    }
}

impl From<serde_json::Value> for SectionValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => SectionValue::Absent,
            Value::String(s) => SectionValue::Str(s),
            Value::Bool(b) => SectionValue::Str(b.to_string()),
            Value::Number(n) => SectionValue::Str(n.to_string()),
            Value::Array(items) => SectionValue::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(map) => SectionValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, SectionValue::from(v)))
                    .collect(),
            ),
        }
    }
}

static ABSENT: SectionValue = SectionValue::Absent;

// ── Error record ────────────────────────────────────────────────────

/// A single reported application error, split into named sections.
///
/// Built fresh per reported error; the triage engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorRecord {
    #[serde(deserialize_with = "deserialize_sections")]
    sections: IndexMap<SectionName, SectionValue>,
}

impl ErrorRecord {
    /// Create a record carrying the two mandatory sections.
    pub fn new(error: impl Into<String>, backtrace: Vec<String>) -> Self {
        let mut sections = IndexMap::new();
        sections.insert(SectionName::Error, SectionValue::Str(error.into()));
        sections.insert(SectionName::Backtrace, SectionValue::List(backtrace));
        Self { sections }
    }

    /// Create a record with no sections at all.
    ///
    /// Useful for callers that assemble records incrementally; a record
    /// without a backtrace still has a stable (empty) signature.
    pub fn empty() -> Self {
        Self {
            sections: IndexMap::new(),
        }
    }

    /// Builder-style setter for a section.
    pub fn with_section(mut self, name: SectionName, value: impl Into<SectionValue>) -> Self {
        self.sections.insert(name, value.into());
        self
    }

    /// Value of a section, or [`SectionValue::Absent`] when not set.
    pub fn section(&self, name: SectionName) -> &SectionValue {
        self.sections.get(&name).unwrap_or(&ABSENT)
    }

    /// Iterate over the sections that are present, in insertion order.
    pub fn sections(&self) -> impl Iterator<Item = (SectionName, &SectionValue)> {
        self.sections.iter().map(|(k, v)| (*k, v))
    }

    /// The `error` section when it is a string.
    pub fn error_message(&self) -> Option<&str> {
        self.section(SectionName::Error).as_str()
    }

    /// Identity of this record for run-based deduplication.
    ///
    /// A list backtrace is used as-is; a string backtrace counts as a single
    /// frame; anything else yields the empty signature.
    pub fn signature(&self) -> Vec<String> {
        match self.section(SectionName::Backtrace) {
            SectionValue::List(frames) => frames.clone(),
            SectionValue::Str(frame) => vec![frame.clone()],
            _ => Vec::new(),
        }
    }

    /// Parse a record from a JSON object keyed by section name.
    pub fn from_json(value: serde_json::Value) -> Result<Self, CoreError> {
        let object = match value {
            serde_json::Value::Object(object) => object,
            other => {
                return Err(CoreError::InvalidRecord(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let unknown: Vec<&str> = object
            .keys()
            .filter(|k| SectionName::parse(k).is_none())
            .map(|k| k.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(CoreError::InvalidRecord(format!(
                "unknown sections: {}",
                unknown.join(", ")
            )));
        }

        let sections = object
            .into_iter()
            .filter_map(|(k, v)| SectionName::parse(&k).map(|name| (name, SectionValue::from(v))))
            .collect();
        Ok(Self { sections })
    }

    pub fn from_json_str(input: &str) -> Result<Self, CoreError> {
        Self::from_json(serde_json::from_str(input)?)
    }
}

fn deserialize_sections<'de, D>(
    deserializer: D,
) -> Result<IndexMap<SectionName, SectionValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    ErrorRecord::from_json(value)
        .map(|record| record.sections)
        .map_err(serde::de::Error::custom)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
