//! Error types for the reply pipeline.

use std::error::Error as StdError;
use std::io;

/// Error type returned by external capabilities (prompt sources, backends,
/// tool executors, generators, reply handlers).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Everything that can abort a `get_reply` call.
///
/// Tool execution failures are deliberately absent: they are rendered inline
/// as `[Error: <message>]` and never abort a reply.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A prompt source failed while composing or refining its part.
    #[error("prompt source '{id}' failed: {source}")]
    Provider {
        id: String,
        #[source]
        source: BoxError,
    },

    /// The language-model backend failed. Surfaced unmodified, never retried.
    #[error("backend error: {0}")]
    Backend(#[source] BoxError),

    /// A reply handler failed.
    #[error("reply handler '{name}' failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: BoxError,
    },

    /// The cancellation signal fired before or during a generation pass.
    #[error("aborted")]
    Aborted,

    /// A tool marker did not compile into a pattern.
    #[error("invalid pattern for tool '{id}': {source}")]
    Pattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// True for the distinguished cancellation condition.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_names_source() {
        let err = PipelineError::Provider {
            id: "world".to_string(),
            source: "lore file missing".into(),
        };
        assert_eq!(
            err.to_string(),
            "prompt source 'world' failed: lore file missing"
        );
        assert!(!err.is_aborted());
    }

    #[test]
    fn test_aborted_is_distinguished() {
        assert!(PipelineError::Aborted.is_aborted());
        assert_eq!(PipelineError::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_io_error_converts() {
        let err: PipelineError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
