mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use quell_core::{dump_mapping, Config, ErrorRecord, SectionName};
use quell_notify::log::LogNotifier;
use quell_notify::webhook::WebhookNotifier;
use quell_notify::{Dispatcher, RunSummarizer};
use quell_rules::{FileRuleSource, RefreshOutcome, RuleCatalog};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    quell_core::config::load_dotenv();
    let args = CliArgs::parse();

    let mut config = Config::from_env();
    if let Some(path) = args.rules {
        config.rules.path = path;
    }
    config.log_summary();

    match args.command {
        Command::Rules => list_rules(&config),
        Command::Check { record } => check(&config, &record),
        Command::Dispatch { input } => dispatch(&config, input.as_deref()).await,
        Command::Dump { record, section } => dump(&record, &section),
    }
}

/// Build the catalog and load it once, failing loudly on a broken rules file.
fn load_catalog(config: &Config) -> Result<RuleCatalog> {
    let catalog = RuleCatalog::new(FileRuleSource::new(&config.rules.path, config.rules.timeout));
    match catalog.refresh() {
        RefreshOutcome::Reloaded { rules } => {
            info!(rules, path = %config.rules.path.display(), "rules loaded");
            Ok(catalog)
        }
        RefreshOutcome::Failed { error } => {
            bail!("failed to load rules from {}: {error}", config.rules.path.display())
        }
        RefreshOutcome::Unchanged => Ok(catalog),
    }
}

fn read_record(path: &Path) -> Result<ErrorRecord> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read record {}", path.display()))?;
    ErrorRecord::from_json_str(&raw).with_context(|| format!("invalid record in {}", path.display()))
}

fn list_rules(config: &Config) -> Result<()> {
    let catalog = load_catalog(config)?;
    for rule in catalog.rules().values() {
        let patterns: serde_json::Map<String, serde_json::Value> = rule
            .patterns()
            .map(|(section, pattern)| (section.to_string(), pattern.into()))
            .collect();
        let line = serde_json::json!({
            "name": rule.name(),
            "patterns": patterns,
            "flags": rule.flags(),
        });
        println!("{line}");
    }
    Ok(())
}

fn check(config: &Config, record: &Path) -> Result<()> {
    let catalog = load_catalog(config)?;
    let record = read_record(record)?;
    match catalog.find(&record) {
        Some(rule) => {
            let line = serde_json::json!({ "rule": rule.name(), "flags": rule.flags() });
            println!("{line}");
        }
        None => println!("{}", serde_json::json!({ "rule": null })),
    }
    Ok(())
}

async fn dispatch(config: &Config, input: Option<&Path>) -> Result<()> {
    let catalog = Arc::new(load_catalog(config)?);
    let summarizer = Arc::new(RunSummarizer::new(config.summarizer));

    let mut dispatcher = Dispatcher::new(catalog, summarizer)
        .with_subject_prefix(config.notify.subject_prefix.clone())
        .with_channel(Box::new(LogNotifier));
    if let Some(url) = &config.notify.webhook_url {
        let webhook = WebhookNotifier::new(url, config.notify.webhook_timeout)
            .context("failed to configure webhook channel")?;
        dispatcher = dispatcher.with_channel(Box::new(webhook));
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = match ErrorRecord::from_json_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping invalid record");
                println!("{}", serde_json::json!({ "line": line_no, "error": e.to_string() }));
                continue;
            }
        };
        let outcome = dispatcher.dispatch(&record).await;
        println!("{}", serde_json::to_string(&outcome)?);
    }

    if let Some(run) = dispatcher.summarizer().current_run() {
        info!(
            state = ?run.state,
            count = run.count,
            first_seen = %run.first_seen,
            "input exhausted with an open run"
        );
    }
    Ok(())
}

fn dump(record: &Path, section: &str) -> Result<()> {
    let name: SectionName = section.parse()?;
    let record = read_record(record)?;
    match record.section(name).as_map() {
        Some(map) => {
            print!("{}", dump_mapping(map));
            Ok(())
        }
        None => bail!("section '{name}' is not a mapping"),
    }
}
