use std::path::PathBuf;
use thiserror::Error;

/// Failures of a translator invocation. The message is shown verbatim in the
/// result window, so keep it readable.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("{0} is not configured, set it in Settings")]
    MissingSetting(&'static str),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed (HTTP {status}), check the API key")]
    Unauthorized { status: u16 },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty response")]
    Empty,

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<reqwest::Error> for TranslateError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TranslateError::Malformed(e.to_string())
        } else {
            TranslateError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot determine the home directory")]
    NoHome,

    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HotkeyError {
    #[error("empty hotkey")]
    Empty,

    #[error("unknown key name `{0}`")]
    UnknownKey(String),

    #[error("key state queries are not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
}
