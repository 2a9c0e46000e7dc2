//! Cached rule set that follows its [`RuleSource`](crate::RuleSource).
//!
//! Every lookup first checks the source's change marker and reloads the
//! whole rule set when it moved. Reload failures are logged and the last
//! good rule set stays in effect.

mod core;


pub use self::core::{RefreshOutcome, RuleCatalog, RuleSet};
