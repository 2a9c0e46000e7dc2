//! Shared types for the quell error triage engine.
//!
//! This crate provides:
//! - `ErrorRecord` and its closed `SectionValue` sum type
//! - Canonical mapping dump used for pattern matching against nested sections
//! - Env-driven configuration with profile support

pub mod config;
pub mod dump;
pub mod error;
pub mod record;

pub use config::Config;
pub use dump::dump_mapping;
pub use error::*;
pub use record::*;
