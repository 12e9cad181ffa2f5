use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal at startup; nothing is registered with the
/// scheduler once one of them has been returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("env var not found: {0}")]
    MissingEnv(String),
}
