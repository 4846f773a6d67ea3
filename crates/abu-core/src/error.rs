//! Error types for rule construction.

use thiserror::Error;

/// Why a rule line could not be turned into a rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("empty rule text")]
    Empty,

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option '{0}' is only allowed on exception rules")]
    ExceptionOnlyOption(String),

    #[error("invalid domain list '{0}'")]
    InvalidDomains(String),

    #[error("invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("pattern '{0}' would match every request")]
    TooWide(String),

    #[error("'{0}' is not a cosmetic rule")]
    NotCosmetic(String),

    #[error("'{0}' is not a script rule")]
    NotScript(String),

    #[error("empty selector or script body in '{0}'")]
    EmptyContent(String),

    #[error("invalid scriptlet call '{0}'")]
    InvalidScriptlet(String),
}
