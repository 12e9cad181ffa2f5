//! Applies rules to a snapshot and produces alerts.

use chrono::{DateTime, Utc};
use ecoalert_core::{Alert, Snapshot};
use tracing::{debug, warn};

use crate::schema::Rule;
use crate::templating::{MessageContext, TemplateRenderer};

// ── Rule evaluator ──────────────────────────────────────────────────

/// Evaluates rules against snapshots.
///
/// Evaluation is pure apart from logging: no I/O, no state. Alerts come out
/// in the order the rules were configured.
#[derive(Debug, Default)]
pub struct RuleEvaluator {
    renderer: TemplateRenderer,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate every enabled rule, timestamping alerts with the current time.
    pub fn evaluate(&self, snapshot: &Snapshot, rules: &[Rule]) -> Vec<Alert> {
        self.evaluate_at(snapshot, rules, Utc::now())
    }

    /// Like [`evaluate`](Self::evaluate) with a fixed clock.
    pub fn evaluate_at(&self, snapshot: &Snapshot, rules: &[Rule], now: DateTime<Utc>) -> Vec<Alert> {
        rules
            .iter()
            .filter(|rule| rule.enabled && rule.matches(snapshot))
            .map(|rule| self.raise(rule, snapshot, now))
            .collect()
    }

    fn raise(&self, rule: &Rule, snapshot: &Snapshot, raised_at: DateTime<Utc>) -> Alert {
        let ctx = MessageContext::new(rule, snapshot);
        // Templates are syntax-checked at load time; a render failure here is a
        // data problem (e.g. a filter applied to a missing field).
        let message = match self.renderer.render(&rule.message, &ctx) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    subject = %snapshot.subject,
                    error = %e,
                    "Failed to render alert message, using raw template"
                );
                rule.message.clone()
            }
        };
        debug!(rule_id = %rule.id, subject = %snapshot.subject, "Rule matched");
        Alert {
            source_subject: snapshot.subject.clone(),
            rule_id: rule.id.clone(),
            severity: rule.severity,
            raised_at,
            message,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
