//! Operator-defined rules for classifying and suppressing reported errors.
//!
//! This crate provides:
//! - YAML rule definitions parsed into [`RuleSpec`]s
//! - [`PatternRule`]: per-section case-insensitive regexes plus behavior flags
//! - [`RuleSource`] implementations backed by a file or an in-memory document
//! - [`RuleCatalog`]: a cached rule set that reloads when its source changes

pub mod catalog;
pub mod error;
pub mod pattern;
pub mod source;
pub mod spec;

pub use catalog::{RefreshOutcome, RuleCatalog, RuleSet};
pub use error::{Result, RuleError};
pub use pattern::{PatternRule, RuleFlags};
pub use source::{FileRuleSource, InMemoryRuleSource, Marker, RuleSource};
pub use spec::{parse_rule_specs, FlagValue, RuleSpec};
