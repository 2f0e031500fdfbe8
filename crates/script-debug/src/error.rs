//! Adapter error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while applying debug configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML configuration is malformed.
    #[error("invalid toml configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Merged configuration does not match the expected shape.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    /// A configuration level must be a JSON object.
    #[error("configuration must be an object")]
    NotAnObject,

    /// A source map rule is structurally invalid.
    #[error("invalid source map '{server}': {reason}")]
    InvalidSourceMap { server: String, reason: &'static str },

    /// A skip pattern is not a valid glob.
    #[error("invalid skip pattern '{pattern}': {source}")]
    InvalidSkipPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Exception filter name is not advertised by the adapter.
    #[error("unknown exception filter '{0}'")]
    UnknownExceptionFilter(String),
}

/// Errors reported by the interpreter while serving hook requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// Frame index does not exist on the current stack.
    #[error("frame {0} does not exist")]
    UnknownFrame(u32),

    /// Variables reference is unknown or expired.
    #[error("unknown variables reference {0}")]
    UnknownReference(u32),

    /// Expression failed to evaluate.
    #[error("{0}")]
    Evaluation(String),

    /// Operation is not supported by the interpreter.
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}
