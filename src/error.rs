//! Engine-wide error types.

use thiserror::Error;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
///
/// Policy denials are deliberately NOT represented here: a suppressed
/// notification is a first-class [`DispatchResult`](crate::DispatchResult)
/// outcome, not an error.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid channel credentials. The affected channel is
    /// disabled for the lifetime of the process and reported once.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed subscription or preference input, rejected at the store
    /// boundary with every failing check listed.
    #[error("Validation failed: {}", reasons.join("; "))]
    Validation { reasons: Vec<String> },

    /// Network/HTTP failure talking to a provider, scoped to one send attempt.
    #[error("Transport error on channel {channel}: {detail}")]
    Transport { channel: String, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(reasons: Vec<String>) -> Self {
        Self::Validation { reasons }
    }

    pub fn transport(channel: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Transport {
            channel: channel.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_reason() {
        let err = Error::validation(vec![
            "endpoint must use https".to_string(),
            "auth key is empty".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("endpoint must use https"));
        assert!(text.contains("auth key is empty"));
    }
}
