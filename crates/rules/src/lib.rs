//! Threshold rule engine for monitoring snapshots.
//!
//! This crate provides:
//! - YAML rule definitions with numeric and presence conditions
//! - Rule set loading and validation
//! - Snapshot evaluation producing alerts in rule order
//! - Minijinja message templates
//! - Per-(subject, rule) cool-down deduplication

pub mod dedup;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod schema;
pub mod templating;

pub use dedup::Deduplicator;
pub use error::RuleError;
pub use evaluator::RuleEvaluator;
pub use loader::RuleSet;
pub use schema::{Condition, Rule};
pub use templating::TemplateRenderer;
