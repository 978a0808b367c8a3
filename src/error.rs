//! Error types shared by the directive parsers and the shell runners.

use std::io;
use std::time::Duration;

/// A `[tags]:#` or `[prompt]:#` directive that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    /// The line does not follow `[tags]:# (tag1 tag2 ...)`.
    #[error("invalid tags directive format: {line}")]
    InvalidTags { line: String },

    /// The line does not follow `[prompt]:# (name "text" [opt1 opt2] default)`.
    #[error("invalid prompt format: {line}")]
    InvalidPrompt { line: String },

    /// The operator's answer is not one of the declared options.
    #[error("invalid response for {var}. Must be one of [{}]", options.join(" "))]
    InvalidResponse { var: String, options: Vec<String> },
}

impl DirectiveError {
    /// True for grammar errors, false for rejected answers.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            DirectiveError::InvalidTags { .. } | DirectiveError::InvalidPrompt { .. }
        )
    }
}

/// Failures of the persistent shell transport.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The interpreter (or its output reader) could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Writing to or reading from a running shell failed.
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The shell's output did not contain the expected marker or status line.
    #[error("protocol error: expected {expected}, got {found}")]
    Protocol { expected: String, found: String },

    /// The snippet did not finish before the configured deadline.
    #[error("snippet timed out after {after:?}")]
    Timeout { after: Duration },
}
