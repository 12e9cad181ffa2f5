//! Loading and validating the YAML rule set.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, RuleError};
use crate::schema::Rule;
use crate::templating::TemplateRenderer;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// An ordered, validated, immutable list of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set from already-parsed rules, validating them.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        validate(&rules)?;
        Ok(Self { rules })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(yaml)?;
        Self::new(file.rules)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            rules = set.rules.len(),
            enabled = set.rules.iter().filter(|r| r.enabled).count(),
            "Loaded rule set"
        );
        Ok(set)
    }

    /// Rules in configuration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn validate(rules: &[Rule]) -> Result<()> {
    let renderer = TemplateRenderer::new();
    let mut seen = HashSet::new();

    for rule in rules {
        if rule.id.trim().is_empty() {
            return Err(RuleError::validation("", "rule id must not be empty"));
        }
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleError::validation(&rule.id, "duplicate rule id"));
        }
        if rule.when.is_empty() {
            return Err(RuleError::validation(&rule.id, "`when` needs at least one condition"));
        }
        for cond in &rule.when {
            if cond.field.trim().is_empty() {
                return Err(RuleError::validation(&rule.id, "condition field must not be empty"));
            }
            if !cond.has_operator() {
                return Err(RuleError::validation(
                    &rule.id,
                    format!("condition on '{}' has no operator", cond.field),
                ));
            }
            if cond.present == Some(false) && cond.has_numeric_operator() {
                return Err(RuleError::validation(
                    &rule.id,
                    format!("condition on '{}' requires absence and a numeric comparison", cond.field),
                ));
            }
            if let Some([min, max]) = cond.in_range {
                if min.partial_cmp(&max) != Some(std::cmp::Ordering::Less) {
                    return Err(RuleError::validation(
                        &rule.id,
                        format!("in_range on '{}' must satisfy min < max", cond.field),
                    ));
                }
            }
        }
        if rule.cooldown.is_some() && rule.cooldown().is_none() {
            return Err(RuleError::validation(
                &rule.id,
                format!("invalid cooldown '{}'", rule.cooldown.as_deref().unwrap_or_default()),
            ));
        }
        renderer
            .validate(&rule.message)
            .map_err(|e| RuleError::validation(&rule.id, format!("message template: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn expect_validation(yaml: &str, needle: &str) {
        match RuleSet::from_yaml_str(yaml) {
            Err(RuleError::Validation { message, .. }) => {
                assert!(message.contains(needle), "unexpected message: {message}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_file_yields_empty_set() {
        let set = RuleSet::from_yaml_str("rules: []").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        expect_validation(
            r#"
rules:
  - { id: a, severity: info, when: [{ field: temp, gt: 1 }], message: x }
  - { id: a, severity: info, when: [{ field: temp, lt: 1 }], message: y }
"#,
            "duplicate",
        );
    }

    #[test]
    fn rejects_condition_without_operator() {
        expect_validation(
            "rules:\n  - { id: a, severity: info, when: [{ field: temp }], message: x }",
            "no operator",
        );
    }

    #[test]
    fn rejects_inverted_range() {
        expect_validation(
            "rules:\n  - { id: a, severity: info, when: [{ field: ids, in_range: [300, 200] }], message: x }",
            "min < max",
        );
    }

    #[test]
    fn rejects_bad_cooldown() {
        expect_validation(
            "rules:\n  - { id: a, severity: info, when: [{ field: t, gt: 1 }], message: x, cooldown: soon }",
            "cooldown",
        );
    }

    #[test]
    fn rejects_broken_template() {
        expect_validation(
            "rules:\n  - { id: a, severity: info, when: [{ field: t, gt: 1 }], message: \"{{ subject\" }",
            "template",
        );
    }

    #[test]
    fn rejects_unknown_severity() {
        let err = RuleSet::from_yaml_str(
            "rules:\n  - { id: a, severity: apocalyptic, when: [{ field: t, gt: 1 }], message: x }",
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::Parse(_)));
    }

    #[test]
    fn loads_from_file_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
rules:
  - id: second-listed-first
    severity: warning
    when: [{{ field: temp, gt: 30 }}]
    message: hot
  - id: first-listed-second
    severity: info
    when: [{{ field: temp, gt: 20 }}]
    message: warm
"#
        )
        .unwrap();

        let set = RuleSet::from_file(file.path()).unwrap();
        let ids: Vec<&str> = set.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["second-listed-first", "first-listed-second"]);
        assert!(set.get("first-listed-second").is_some());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RuleSet::from_file("/nonexistent/rules.yml").unwrap_err();
        assert!(matches!(err, RuleError::Io(_)));
    }
}
