//! Minijinja rendering for alert messages.
//!
//! Templates are arbitrary strings taken from the rule file, so they are
//! compiled per render rather than registered up front.

use std::collections::BTreeMap;

use ecoalert_core::{FieldValue, Severity, Snapshot};
use serde::Serialize;

use crate::error::{Result, RuleError};
use crate::schema::Rule;

/// Values available to a message template.
#[derive(Debug, Clone, Serialize)]
pub struct MessageContext<'a> {
    pub subject: &'a str,
    pub source: &'a str,
    pub rule: RuleContext<'a>,
    pub fields: &'a BTreeMap<String, FieldValue>,
    /// Observation time in RFC 3339.
    pub observed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleContext<'a> {
    pub id: &'a str,
    pub severity: Severity,
    pub description: Option<&'a str>,
}

impl<'a> MessageContext<'a> {
    pub fn new(rule: &'a Rule, snapshot: &'a Snapshot) -> Self {
        Self {
            subject: &snapshot.subject,
            source: &snapshot.source,
            rule: RuleContext {
                id: &rule.id,
                severity: rule.severity,
                description: rule.description.as_deref(),
            },
            fields: &snapshot.fields,
            observed_at: snapshot.observed_at.to_rfc3339(),
        }
    }
}

/// Renders message templates with a shared filter set.
#[derive(Debug)]
pub struct TemplateRenderer {
    env: minijinja::Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        Self { env }
    }

    pub fn render(&self, template: &str, ctx: &MessageContext<'_>) -> Result<String> {
        self.env
            .render_str(template, ctx)
            .map_err(|e| RuleError::Template(e.to_string()))
    }

    /// Check template syntax without rendering it.
    pub fn validate(&self, template: &str) -> Result<()> {
        self.env
            .template_from_str(template)
            .map_err(|e| RuleError::Template(e.to_string()))?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// `{{ value | round(1) }}`: round a number to N decimal places (default 0).
fn round_filter(value: f64, places: Option<i32>) -> f64 {
    let factor = 10_f64.powi(places.unwrap_or(0));
    (value * factor).round() / factor
}
