use thiserror::Error;

/// Why a line could not be rewritten into canonical syntax.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("malformed +js() call in '{0}'")]
    MalformedScriptlet(String),

    #[error("malformed :style() in '{0}'")]
    MalformedStyle(String),

    #[error("no snippets in '{0}'")]
    EmptySnippet(String),
}
