use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Error triage for reported application exceptions.
///
/// Classifies error records against operator-defined rules and collapses
/// bursts of identical errors into periodic summaries.
#[derive(Parser, Debug)]
#[command(name = "quell", about = "Classify, suppress and summarize error notifications")]
pub struct CliArgs {
    /// Rules file
    #[arg(long, global = true, env = "QUELL_RULES_PATH")]
    pub rules: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the rules file and list every rule with its flags
    Rules,

    /// Print the first rule matching a JSON error record
    Check {
        /// JSON file holding one error record
        #[arg(long)]
        record: PathBuf,
    },

    /// Run newline-delimited JSON records through the dispatcher
    Dispatch {
        /// Input file (reads stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Print the canonical text dump of a mapping section
    Dump {
        /// JSON file holding one error record
        #[arg(long)]
        record: PathBuf,

        /// Section to dump: request, session or environment
        #[arg(long)]
        section: String,
    },
}
