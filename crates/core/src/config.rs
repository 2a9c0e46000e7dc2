use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub rules: RulesConfig,
    pub summarizer: SummarizerConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `QUELL_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("QUELL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            rules: RulesConfig::from_env_profiled(p),
            summarizer: SummarizerConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  rules:       path={}, timeout={}ms",
            self.rules.path.display(),
            self.rules.timeout.as_millis()
        );
        tracing::info!(
            "  summarizer:  threshold={}, period={}s",
            self.summarizer.threshold,
            self.summarizer.period.as_secs()
        );
        tracing::info!(
            "  notify:      webhook={}, subject_prefix={:?}",
            if self.notify.webhook_url.is_some() { "configured" } else { "(none)" },
            self.notify.subject_prefix
        );
    }
}

// ── Rules ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// YAML file holding the suppression/classification rules.
    pub path: PathBuf,
    /// Upper bound for rule-source I/O during a refresh.
    pub timeout: Duration,
}

impl RulesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: PathBuf::from(profiled_env_or(p, "QUELL_RULES_PATH", "data/rules/quell_rules.yml")),
            timeout: Duration::from_millis(profiled_env_u64(p, "QUELL_RULES_TIMEOUT_MS", 2000)),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/rules/quell_rules.yml"),
            timeout: Duration::from_millis(2000),
        }
    }
}

// ── Summarizer ────────────────────────────────────────────────

/// Number of consecutive identical errors before individual emails stop.
pub const DEFAULT_SUMMARY_THRESHOLD: u64 = 5;

/// Window after which a summarized run reports its accumulated count.
pub const DEFAULT_SUMMARY_PERIOD: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizerConfig {
    pub threshold: u64,
    pub period: Duration,
}

impl SummarizerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            threshold: profiled_env_u64(p, "QUELL_SUMMARY_THRESHOLD", DEFAULT_SUMMARY_THRESHOLD)
                .max(1),
            period: Duration::from_secs(profiled_env_u64(
                p,
                "QUELL_SUMMARY_PERIOD_SECS",
                DEFAULT_SUMMARY_PERIOD.as_secs(),
            )),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SUMMARY_THRESHOLD,
            period: DEFAULT_SUMMARY_PERIOD,
        }
    }
}

// ── Notify ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Optional webhook endpoint receiving every notification as JSON.
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    /// Prepended to every rendered subject line.
    pub subject_prefix: String,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhook_url: profiled_env_opt(p, "QUELL_WEBHOOK_URL"),
            webhook_timeout: Duration::from_millis(profiled_env_u64(
                p,
                "QUELL_WEBHOOK_TIMEOUT_MS",
                5000,
            )),
            subject_prefix: profiled_env_or(p, "QUELL_SUBJECT_PREFIX", ""),
        }
    }
}
