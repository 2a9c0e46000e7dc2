//! Error types for rule construction and loading.

use quell_core::SectionName;

/// Errors that can occur while building or loading rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem or thread I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Malformed or invalid rule spec (unknown keys, all-blank patterns, bad flag types).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A section pattern is not a valid regular expression.
    #[error("invalid pattern for section '{section}' in rule '{rule}': {source}")]
    Pattern {
        rule: String,
        section: SectionName,
        #[source]
        source: regex::Error,
    },

    /// The rule source could not be reached (missing file, timeout).
    #[error("Rule source unavailable: {0}")]
    SourceUnavailable(String),
}

impl RuleError {
    /// Whether this error stems from the content of the rules rather than
    /// from reaching the source.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RuleError::Configuration(_) | RuleError::Pattern { .. } | RuleError::Parse(_)
        )
    }
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
