//! Error types for the animehub library

use thiserror::Error;

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Upstream API errors
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error! status: {status} ({url})")]
    Http { status: u16, url: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // Source resolution errors
    #[error("no playable source for episode {episode_id}")]
    NoPlayableSource { episode_id: String },

    #[error("quality {0} is not offered by this source")]
    UnknownQuality(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    // Local errors
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("player error: {0}")]
    Player(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn player(msg: impl Into<String>) -> Self {
        Error::Player(msg.into())
    }

    /// Returns true if retrying the same request may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short message for the retry/back prompt
    pub fn user_message(&self) -> String {
        match self {
            Error::Network(_) => "Could not reach the server. Check your connection.".to_string(),
            Error::Http { status, .. } => format!("HTTP error! status: {status}"),
            Error::Decode { .. } => "The server sent a response we could not read.".to_string(),
            Error::NoPlayableSource { .. } => "No playable video source was found.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_recoverable() {
        let err = Error::Http {
            status: 503,
            url: "https://example.com".into(),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.user_message(), "HTTP error! status: 503");
    }

    #[test]
    fn client_errors_are_not_recoverable() {
        let err = Error::Http {
            status: 404,
            url: "https://example.com".into(),
        };
        assert!(!err.is_recoverable());
        assert!(!Error::UnknownQuality("4K".into()).is_recoverable());
    }
}
