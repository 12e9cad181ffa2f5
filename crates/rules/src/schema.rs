//! Rule definitions as written in the YAML rule file.
//!
//! ```yaml
//! rules:
//!   - id: extreme-heat
//!     severity: critical
//!     when:
//!       - field: temp
//!         gt: 38
//!     message: "Extreme heat in {{ subject }}: {{ fields.temp }}°C"
//!     cooldown: 6h
//! ```

use std::time::Duration;

use ecoalert_core::{parse_duration, Severity, Snapshot};
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

/// A single threshold rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Conditions combined with AND semantics.
    pub when: Vec<Condition>,
    /// Minijinja template for the alert message.
    pub message: String,
    /// Overrides the global cool-down for alerts raised by this rule.
    #[serde(default)]
    pub cooldown: Option<String>,
}

impl Rule {
    /// Parsed cool-down override, if one is set and well-formed.
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown.as_deref().and_then(parse_duration)
    }

    /// True when every condition holds for `snapshot`.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        self.when.iter().all(|c| c.matches(snapshot))
    }
}

/// Comparison against one snapshot field.
///
/// Numeric operators apply to numeric fields and to numeric lists; a list
/// matches when any single element satisfies every numeric operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    #[serde(default)]
    pub gt: Option<f64>,
    #[serde(default)]
    pub gte: Option<f64>,
    #[serde(default)]
    pub lt: Option<f64>,
    #[serde(default)]
    pub lte: Option<f64>,
    #[serde(default)]
    pub eq: Option<f64>,
    #[serde(default)]
    pub neq: Option<f64>,
    /// Half-open range `[min, max)`.
    #[serde(default)]
    pub in_range: Option<[f64; 2]>,
    /// `true` requires the field to exist, `false` requires it to be absent.
    #[serde(default)]
    pub present: Option<bool>,
}

impl Condition {
    pub fn has_numeric_operator(&self) -> bool {
        self.gt.is_some()
            || self.gte.is_some()
            || self.lt.is_some()
            || self.lte.is_some()
            || self.eq.is_some()
            || self.neq.is_some()
            || self.in_range.is_some()
    }

    pub fn has_operator(&self) -> bool {
        self.has_numeric_operator() || self.present.is_some()
    }

    /// Check if a value passes all numeric operators.
    pub fn matches_value(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        if let Some(v) = self.gt {
            if value <= v {
                return false;
            }
        }
        if let Some(v) = self.gte {
            if value < v {
                return false;
            }
        }
        if let Some(v) = self.lt {
            if value >= v {
                return false;
            }
        }
        if let Some(v) = self.lte {
            if value > v {
                return false;
            }
        }
        if let Some(v) = self.eq {
            if (value - v).abs() > f64::EPSILON {
                return false;
            }
        }
        if let Some(v) = self.neq {
            if (value - v).abs() <= f64::EPSILON {
                return false;
            }
        }
        if let Some([min, max]) = self.in_range {
            if value < min || value >= max {
                return false;
            }
        }
        true
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        let field = snapshot.field(&self.field);
        if let Some(want_present) = self.present {
            if field.is_some() != want_present {
                return false;
            }
        }
        if !self.has_numeric_operator() {
            return true;
        }
        match field {
            Some(value) => value.numbers().into_iter().any(|n| self.matches_value(n)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(field: &str) -> Condition {
        Condition {
            field: field.to_string(),
            ..Condition::default()
        }
    }

    #[test]
    fn gt_is_strict() {
        let c = Condition {
            gt: Some(38.0),
            ..cond("temp")
        };
        assert!(c.matches_value(38.1));
        assert!(!c.matches_value(38.0));
    }

    #[test]
    fn in_range_is_half_open() {
        let c = Condition {
            in_range: Some([200.0, 300.0]),
            ..cond("condition_ids")
        };
        assert!(c.matches_value(200.0));
        assert!(c.matches_value(299.0));
        assert!(!c.matches_value(300.0));
        assert!(!c.matches_value(199.0));
    }

    #[test]
    fn nan_never_matches() {
        let c = Condition {
            lt: Some(0.0),
            ..cond("temp")
        };
        assert!(!c.matches_value(f64::NAN));
    }

    #[test]
    fn list_matches_if_any_element_matches() {
        let c = Condition {
            in_range: Some([502.0, 600.0]),
            ..cond("condition_ids")
        };
        let rainy = Snapshot::new("Lima", "test").with_field("condition_ids", vec![800.0, 503.0]);
        let clear = Snapshot::new("Lima", "test").with_field("condition_ids", vec![800.0, 501.0]);
        assert!(c.matches(&rainy));
        assert!(!c.matches(&clear));
    }

    #[test]
    fn missing_field_fails_numeric_condition() {
        let c = Condition {
            gt: Some(0.0),
            ..cond("humidity")
        };
        assert!(!c.matches(&Snapshot::new("Lima", "test")));
    }

    #[test]
    fn presence_checks() {
        let has = Snapshot::new("Lima", "test").with_field("alerts", "flood");
        let present = Condition {
            present: Some(true),
            ..cond("alerts")
        };
        let absent = Condition {
            present: Some(false),
            ..cond("alerts")
        };
        assert!(present.matches(&has));
        assert!(!absent.matches(&has));
        assert!(absent.matches(&Snapshot::new("Lima", "test")));
    }

    #[test]
    fn rule_conditions_are_anded() {
        let rule: Rule = serde_yaml::from_str(
            r#"
id: muggy-heat
severity: warning
when:
  - field: temp
    gt: 30
  - field: humidity
    gte: 80
message: "Muggy in {{ subject }}"
cooldown: 6h
"#,
        )
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.cooldown(), Some(Duration::from_secs(6 * 3600)));

        let both = Snapshot::new("Lima", "test")
            .with_field("temp", 31.0)
            .with_field("humidity", 85.0);
        let one = Snapshot::new("Lima", "test")
            .with_field("temp", 31.0)
            .with_field("humidity", 40.0);
        assert!(rule.matches(&both));
        assert!(!rule.matches(&one));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<Condition, _> = serde_yaml::from_str("field: temp\ngreater: 3");
        assert!(result.is_err());
    }
}
