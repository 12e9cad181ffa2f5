//! Error types for rule loading and rendering.

/// Errors that can occur while loading, validating or rendering rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Rule validation error (e.g. missing operators, duplicate IDs).
    #[error("Validation error in rule '{rule_id}': {message}")]
    Validation { rule_id: String, message: String },

    /// Message template failed to parse or render.
    #[error("Template error: {0}")]
    Template(String),
}

impl RuleError {
    pub(crate) fn validation(rule_id: &str, message: impl Into<String>) -> Self {
        RuleError::Validation {
            rule_id: rule_id.to_string(),
            message: message.into(),
        }
    }
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
