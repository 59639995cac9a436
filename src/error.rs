//! Error taxonomy for Kokoro export and inference.
//!
//! Construction-time failures (`Config`, `Load`, `Validation`) are fatal for
//! the handle being built. Per-request failures (`Length`, `Runtime`) abort
//! only that request; a loaded model stays usable afterwards.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing configuration, vocabulary or request parameters.
    #[error("config error: {0}")]
    Config(String),

    /// A weight bundle, voice pack or graph artifact is missing required parts.
    #[error("load error: {0}")]
    Load(String),

    /// A token sequence or lookup index is outside the supported range.
    #[error("length error: {0}")]
    Length(String),

    /// An exported graph failed its structural check.
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// The graph runtime rejected or failed to execute a request.
    #[error("graph runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub(crate) fn length(msg: impl Into<String>) -> Self {
        Self::Length(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_category() {
        let err = Error::load("missing sub-module 'decoder'");
        assert_eq!(err.to_string(), "load error: missing sub-module 'decoder'");

        let err = Error::validation("dangling edge");
        assert!(err.to_string().starts_with("graph validation failed"));
    }

    #[test]
    fn test_candle_error_converts() {
        let err: Error = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(err, Error::Candle(_)));
    }
}
