//! Error types shared by the indexing, extraction and expansion stages.

use std::time::Duration;
use thiserror::Error;

/// The primary error type for library operations.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// An error originating from I/O on the dump, index or definitions files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line of the index file does not follow `title\toffset:length`.
    #[error("Malformed index line {line}: {reason}")]
    IndexParse { line: usize, reason: String },

    /// An index entry points past the end of the dump it is read against.
    #[error("Index/dump mismatch for {title:?}: {offset}+{length} exceeds dump size {file_len}")]
    IndexMismatch {
        title: String,
        offset: u64,
        length: u64,
        file_len: u64,
    },

    /// A line of a sections file does not follow `title\t{json}`.
    #[error("Malformed sections line {line}: {reason}")]
    SectionsParse { line: usize, reason: String },

    /// A record of the template-type definitions could not be understood.
    #[error("Invalid template definition on line {line}: {reason}")]
    TypeTable { line: usize, reason: String },

    /// Following `aka` entries from this template returns to it.
    #[error("Alias cycle through template {0:?}")]
    AliasCycle(String),

    /// Engine configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A title pattern or an ignore pattern is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Byte offsets into a compressed stream cannot be used for random access.
    #[error("Cannot index compressed dump {0}; decompress it first")]
    CompressedDump(String),

    /// Template rewriting did not reach a fixed point within the cap.
    #[error("Template expansion did not converge after {iterations} passes")]
    NonTerminatingExpansion { iterations: usize },
}

/// A convenience `Result` alias using [`ExtractError`].
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Failure reported by an inflection provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no inflection provider configured")]
    Unavailable,

    #[error("no inflection data for stem {0:?}")]
    NoEntry(String),

    #[error("inflection provider timed out after {0:?}")]
    TimedOut(Duration),

    #[error("inflection provider failed: {0}")]
    Failed(String),
}

/// A handler that could not render its invocation. Recovered by rendering
/// the empty string; kept so callers can tell bugs apart from missing forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerFailure {
    /// Malformed arity or name shape for the handler.
    Argument { template: String, reason: String },
    /// The inflection provider raised or timed out.
    Provider { template: String, error: ProviderError },
}

impl std::fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerFailure::Argument { template, reason } => {
                write!(f, "{{{{{}}}}}: {}", template, reason)
            }
            HandlerFailure::Provider { template, error } => {
                write!(f, "{{{{{}}}}}: {}", template, error)
            }
        }
    }
}
