use std::fmt;

use thiserror::Error;

/// Parlance's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage names used to tag errors surfaced from a recognition
/// session.
///
/// A session moves `Received → Staged(raw) → Normalized → Decoding →
/// Finalized`; a failure in any stage short-circuits the rest and surfaces as
/// [`Error::Stage`] carrying the stage that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Persisting the raw input stream to a temp file.
    Staging,
    /// External transcode to canonical PCM.
    Normalizing,
    /// Feeding samples to the decoder.
    Decoding,
    /// End-of-stream flush producing the final transcript.
    Finalizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Staging => "staging",
            Stage::Normalizing => "normalizing",
            Stage::Decoding => "decoding",
            Stage::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// Parlance's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries
/// aren't forced to adopt `anyhow` in their own public APIs; binaries are
/// free to wrap it.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested language has no configured model.
    #[error("unsupported language: '{language}'")]
    UnsupportedLanguage { language: String },

    /// A remote model prefix listed zero artifacts at load time.
    #[error("no model artifacts found under prefix '{prefix}'")]
    EmptyModelSource { prefix: String },

    /// The external transcoder exited non-zero (or was killed on timeout);
    /// carries its captured diagnostic text.
    #[error("audio transcode failed: {detail}")]
    Transcode { detail: String },

    /// A model failed to construct from its (local or materialized) directory.
    #[error("failed to load model for '{language}': {detail}")]
    ModelLoad { language: String, detail: String },

    /// The decoder failed while consuming samples or flushing.
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// Malformed language/model configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Temp-file or remote-transfer failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A pipeline error tagged with the session stage that raised it.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with the pipeline stage it was raised in.
    ///
    /// Already-tagged errors pass through unchanged so nested helpers can tag
    /// defensively without double-wrapping.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            tagged @ Error::Stage { .. } => tagged,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The untagged root of this error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Error::Io(io),
            other => Error::Recognition(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_tags_once() {
        let err = Error::Recognition("boom".into())
            .at(Stage::Decoding)
            .at(Stage::Finalizing);
        assert_eq!(err.stage(), Some(Stage::Decoding));
        assert!(matches!(err.root(), Error::Recognition(_)));
    }

    #[test]
    fn stage_display_is_lowercase() {
        assert_eq!(Stage::Normalizing.to_string(), "normalizing");
        let err = Error::Transcode {
            detail: "bad input".into(),
        }
        .at(Stage::Normalizing);
        assert!(err.to_string().starts_with("normalizing failed:"));
    }
}
